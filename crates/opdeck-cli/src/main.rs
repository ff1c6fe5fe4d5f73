//! `opdeck` binary entrypoint.

#[tokio::main]
async fn main() {
    let exit_code = opdeck_cli::run().await;
    std::process::exit(exit_code);
}
