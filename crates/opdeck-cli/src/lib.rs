#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::redundant_pub_crate)]

//! Command-line driver that runs dashboard operations end to end.
//!
//! Layout:
//! - `cli.rs`: argument parsing, settings resolution, and command dispatch
//! - `commands/`: operation plans and the transition-rendering driver
//! - `client.rs`: shared HTTP client and CLI errors
//! - `rest.rs`: REST executor and status fetcher for the operation store
//! - `output.rs`: transition and result renderers
//! - `main.rs`: thin entrypoint delegating to `run()`

pub(crate) mod cli;
pub(crate) mod client;
pub(crate) mod commands;
pub(crate) mod output;
pub(crate) mod rest;

pub use cli::run;
