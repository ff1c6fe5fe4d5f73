//! Argument parsing, settings resolution, and command dispatch.

use anyhow::anyhow;
use clap::{Args, Parser, Subcommand, ValueEnum};
use opdeck_config::{ConfigError, OpdeckConfig};
use opdeck_engine::PollPolicy;
use opdeck_telemetry::{LogFormat, LoggingConfig, init_logging};
use reqwest::Url;
use tracing::{debug, info};
use uuid::Uuid;

use crate::client::{ApiClient, AppContext, CliError, CliResult, parse_url};
use crate::commands::{OperationPlan, drive};

/// Parses CLI arguments, runs the requested operation, and returns the
/// process exit code.
pub async fn run() -> i32 {
    let cli = Cli::parse();
    let trace_id = Uuid::new_v4().to_string();

    match execute(cli, &trace_id).await {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {}", err.display_message());
            err.exit_code()
        }
    }
}

async fn execute(cli: Cli, trace_id: &str) -> CliResult<()> {
    let config = opdeck_config::load().map_err(|err| CliError::validation(describe(&err)))?;
    let config = apply_overrides(&cli, config)?;
    install_logging(&config)?;

    let command_name = command_label(&cli.command);
    let api_url = opdeck_config::validate_api_url(&config.client.api_url)
        .map_err(|err| CliError::validation(describe(&err)))?;
    info!(command = command_name, trace_id, %api_url, "command started");

    let api = ApiClient::new(
        api_url,
        config.client.timeout(),
        config.client.api_token.as_deref(),
        trace_id,
    )?;
    let ctx = AppContext::new(api, poll_policy(&config), config.engine.event_buffer)?;
    let plan = OperationPlan::from_command(cli.command)?;

    let result = drive(&ctx, plan, cli.output).await;
    debug!(command = command_name, metrics = ?ctx.metrics.snapshot(), "command finished");
    result
}

/// Layer command-line flags over the loaded configuration and re-validate.
pub(crate) fn apply_overrides(cli: &Cli, mut config: OpdeckConfig) -> CliResult<OpdeckConfig> {
    if let Some(url) = &cli.api_url {
        config.client.api_url = url.to_string();
    }
    if let Some(token) = &cli.api_token {
        config.client.api_token = Some(token.clone());
    }
    if let Some(timeout) = cli.timeout {
        config.client.timeout_secs = timeout;
    }
    if let Some(interval) = cli.poll_interval_ms {
        config.engine.poll_interval_ms = interval;
    }
    if let Some(failures) = cli.max_poll_failures {
        config.engine.max_poll_failures = failures;
    }
    opdeck_config::validate(&config).map_err(|err| CliError::validation(describe(&err)))?;
    Ok(config)
}

pub(crate) fn poll_policy(config: &OpdeckConfig) -> PollPolicy {
    PollPolicy {
        interval: config.engine.poll_interval(),
        max_consecutive_failures: config.engine.max_consecutive_failures(),
        backoff_ceiling: config.engine.backoff_ceiling(),
    }
}

fn install_logging(config: &OpdeckConfig) -> CliResult<()> {
    let format = config
        .logging
        .format
        .as_deref()
        .map_or_else(LogFormat::infer, LogFormat::from_name);
    init_logging(&LoggingConfig {
        level: &config.logging.level,
        format,
        build_sha: env!("CARGO_PKG_VERSION"),
    })
    .map_err(|err| CliError::failure(anyhow!("failed to initialise logging: {err}")))
}

fn describe(err: &ConfigError) -> String {
    match err {
        ConfigError::InvalidField {
            section,
            field,
            value,
            reason,
        } => value.as_ref().map_or_else(
            || format!("invalid configuration: {section}.{field} {reason}"),
            |value| format!("invalid configuration: {section}.{field}='{value}' {reason}"),
        ),
        ConfigError::Io { path, source } => {
            format!("failed to read configuration file {}: {source}", path.display())
        }
        ConfigError::Parse { path, source } => match path {
            Some(path) => format!("failed to parse configuration file {}: {source}", path.display()),
            None => format!("failed to parse configuration: {source}"),
        },
    }
}

#[derive(Parser)]
#[command(name = "opdeck", about = "Run dashboard operations against the backend")]
pub(crate) struct Cli {
    #[arg(long, global = true, value_parser = parse_url, help = "Backend base URL")]
    pub(crate) api_url: Option<Url>,
    #[arg(long, global = true, help = "Bearer token sent with every request")]
    pub(crate) api_token: Option<String>,
    #[arg(long, global = true, help = "Per-request timeout in seconds")]
    pub(crate) timeout: Option<u64>,
    #[arg(long, global = true, help = "Delay between status polls")]
    pub(crate) poll_interval_ms: Option<u64>,
    #[arg(
        long,
        global = true,
        help = "Consecutive poll transport failures tolerated; 0 retries forever"
    )]
    pub(crate) max_poll_failures: Option<u32>,
    #[arg(
        long = "output",
        alias = "format",
        global = true,
        value_enum,
        default_value_t = OutputFormat::Table,
        help = "Render transitions as table rows or JSON lines"
    )]
    pub(crate) output: OutputFormat,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    #[command(subcommand)]
    Agent(AgentCommand),
    #[command(subcommand)]
    Software(SoftwareCommand),
    #[command(subcommand)]
    Equipment(EquipmentCommand),
    #[command(subcommand)]
    Logs(LogsCommand),
    #[command(subcommand)]
    Account(AccountCommand),
}

#[derive(Subcommand)]
pub(crate) enum AgentCommand {
    Run(EntityArgs),
    Stop(EntityArgs),
}

#[derive(Subcommand)]
pub(crate) enum SoftwareCommand {
    Install(EntityArgs),
    Launch(EntityArgs),
}

#[derive(Subcommand)]
pub(crate) enum EquipmentCommand {
    Connect(EntityArgs),
    Diagnose(EntityArgs),
    Firmware(FirmwareArgs),
}

#[derive(Subcommand)]
pub(crate) enum LogsCommand {
    Stream(EntityArgs),
}

#[derive(Subcommand)]
pub(crate) enum AccountCommand {
    #[command(name = "enroll-2fa")]
    EnrollTwoFactor,
    #[command(name = "verify-2fa")]
    VerifyTwoFactor(VerifyArgs),
}

#[derive(Args)]
pub(crate) struct EntityArgs {
    #[arg(help = "Identifier of the target entity")]
    pub(crate) id: String,
}

#[derive(Args)]
pub(crate) struct FirmwareArgs {
    #[arg(help = "Identifier of the equipment")]
    pub(crate) id: String,
    #[arg(long, help = "Firmware version to install")]
    pub(crate) version: String,
}

#[derive(Args)]
pub(crate) struct VerifyArgs {
    #[arg(long, help = "One-time code from the authenticator app")]
    pub(crate) code: String,
}

#[derive(Copy, Clone, Debug, Default, ValueEnum)]
pub(crate) enum OutputFormat {
    #[default]
    Table,
    Json,
}

const fn command_label(command: &Command) -> &'static str {
    match command {
        Command::Agent(AgentCommand::Run(_)) => "agent_run",
        Command::Agent(AgentCommand::Stop(_)) => "agent_stop",
        Command::Software(SoftwareCommand::Install(_)) => "software_install",
        Command::Software(SoftwareCommand::Launch(_)) => "software_launch",
        Command::Equipment(EquipmentCommand::Connect(_)) => "equipment_connect",
        Command::Equipment(EquipmentCommand::Diagnose(_)) => "equipment_diagnose",
        Command::Equipment(EquipmentCommand::Firmware(_)) => "equipment_firmware",
        Command::Logs(LogsCommand::Stream(_)) => "logs_stream",
        Command::Account(AccountCommand::EnrollTwoFactor) => "account_enroll_2fa",
        Command::Account(AccountCommand::VerifyTwoFactor(_)) => "account_verify_2fa",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use anyhow::Result;

    fn parse(args: &[&str]) -> Result<Cli> {
        Ok(Cli::try_parse_from(args)?)
    }

    #[test]
    fn global_flags_parse_after_subcommands() -> Result<()> {
        let cli = parse(&[
            "opdeck",
            "equipment",
            "firmware",
            "eq-3",
            "--version",
            "2.1.0",
            "--api-url",
            "http://backend:9000",
            "--poll-interval-ms",
            "250",
            "--output",
            "json",
        ])?;
        assert_eq!(command_label(&cli.command), "equipment_firmware");
        assert!(matches!(cli.output, OutputFormat::Json));
        assert_eq!(cli.poll_interval_ms, Some(250));
        assert_eq!(
            cli.api_url.as_ref().map(Url::as_str),
            Some("http://backend:9000/")
        );
        Ok(())
    }

    #[test]
    fn account_commands_use_kebab_names() -> Result<()> {
        let enroll = parse(&["opdeck", "account", "enroll-2fa"])?;
        assert_eq!(command_label(&enroll.command), "account_enroll_2fa");
        let verify = parse(&["opdeck", "account", "verify-2fa", "--code", "123456"])?;
        assert_eq!(command_label(&verify.command), "account_verify_2fa");
        assert!(parse(&["opdeck", "account", "verify-2fa"]).is_err());
        Ok(())
    }

    #[test]
    fn flags_override_configuration() -> Result<()> {
        let cli = parse(&[
            "opdeck",
            "software",
            "install",
            "sw-7",
            "--timeout",
            "3",
            "--max-poll-failures",
            "0",
        ])?;
        let config = apply_overrides(&cli, OpdeckConfig::default())
            .map_err(|err| anyhow::anyhow!(err.display_message()))?;
        assert_eq!(config.client.timeout(), Duration::from_secs(3));

        let policy = poll_policy(&config);
        assert_eq!(policy.max_consecutive_failures, None);
        assert_eq!(policy.interval, Duration::from_millis(1_000));
        Ok(())
    }

    #[test]
    fn zero_poll_interval_is_a_validation_error() -> Result<()> {
        let cli = parse(&[
            "opdeck",
            "agent",
            "run",
            "agent-1",
            "--poll-interval-ms",
            "0",
        ])?;
        let err = apply_overrides(&cli, OpdeckConfig::default()).err();
        assert!(matches!(
            err,
            Some(CliError::Validation(ref message)) if message.contains("engine.poll_interval_ms")
        ));
        Ok(())
    }
}
