#![forbid(unsafe_code)]
#![deny(
    dead_code,
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

//! Layered configuration for the operation engine and its REST client.
//!
//! Layout: `model.rs` (typed document), `defaults.rs` (baseline values),
//! `loader.rs` (file and environment layering), `validate.rs` (field checks),
//! `error.rs` (typed failures).

pub mod defaults;
pub mod error;
pub mod loader;
pub mod model;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{from_file, from_yaml_str, load, load_with};
pub use model::{ClientConfig, EngineConfig, LoggingSettings, OpdeckConfig};
pub use validate::{validate, validate_api_url};
