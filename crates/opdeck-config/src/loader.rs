//! Layered configuration loading: defaults, optional YAML file, environment.
//!
//! # Design
//! - Environment lookups are injected so tests never touch process state.
//! - Validation runs once, on the fully merged document.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::model::OpdeckConfig;
use crate::validate::{parse_number, validate};

/// Environment variable naming the YAML configuration file.
pub const CONFIG_PATH_ENV: &str = "OPDECK_CONFIG";
/// Backend base URL override.
pub const API_URL_ENV: &str = "OPDECK_API_URL";
/// Bearer token override.
pub const API_TOKEN_ENV: &str = "OPDECK_API_TOKEN";
/// Request timeout override, in seconds.
pub const HTTP_TIMEOUT_ENV: &str = "OPDECK_HTTP_TIMEOUT_SECS";
/// Poll interval override, in milliseconds.
pub const POLL_INTERVAL_ENV: &str = "OPDECK_POLL_INTERVAL_MS";
/// Poll failure budget override; `0` means unbounded.
pub const MAX_POLL_FAILURES_ENV: &str = "OPDECK_MAX_POLL_FAILURES";
/// Poll backoff ceiling override, in milliseconds.
pub const POLL_BACKOFF_CEILING_ENV: &str = "OPDECK_POLL_BACKOFF_CEILING_MS";
/// Transition feed capacity override.
pub const EVENT_BUFFER_ENV: &str = "OPDECK_EVENT_BUFFER";
/// Log level override.
pub const LOG_LEVEL_ENV: &str = "OPDECK_LOG_LEVEL";
/// Log format override.
pub const LOG_FORMAT_ENV: &str = "OPDECK_LOG_FORMAT";

/// Load configuration from the process environment.
///
/// # Errors
///
/// Returns an error when the configured file cannot be read or parsed, or when
/// any merged value fails validation.
pub fn load() -> ConfigResult<OpdeckConfig> {
    load_with(|key| std::env::var(key).ok())
}

/// Load configuration using `lookup` for environment values.
///
/// # Errors
///
/// Returns an error when the configured file cannot be read or parsed, or when
/// any merged value fails validation.
pub fn load_with<F>(lookup: F) -> ConfigResult<OpdeckConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match lookup(CONFIG_PATH_ENV).filter(|path| !path.trim().is_empty()) {
        Some(path) => from_file(Path::new(&path))?,
        None => OpdeckConfig::default(),
    };
    apply_env(&mut config, &lookup)?;
    validate(&config)?;
    debug!(
        api_url = %config.client.api_url,
        poll_interval_ms = config.engine.poll_interval_ms,
        max_poll_failures = config.engine.max_poll_failures,
        "configuration loaded"
    );
    Ok(config)
}

/// Read a YAML configuration file. Missing sections keep their defaults.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] or [`ConfigError::Parse`].
pub fn from_file(path: &Path) -> ConfigResult<OpdeckConfig> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: Some(path.to_path_buf()),
        source,
    })
}

/// Parse a YAML configuration document.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] when the document does not match the schema.
pub fn from_yaml_str(raw: &str) -> ConfigResult<OpdeckConfig> {
    serde_yaml::from_str(raw).map_err(|source| ConfigError::Parse { path: None, source })
}

fn apply_env<F>(config: &mut OpdeckConfig, lookup: &F) -> ConfigResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup(API_URL_ENV) {
        config.client.api_url = url;
    }
    if let Some(token) = lookup(API_TOKEN_ENV) {
        config.client.api_token = Some(token).filter(|token| !token.trim().is_empty());
    }
    if let Some(raw) = lookup(HTTP_TIMEOUT_ENV) {
        config.client.timeout_secs = parse_number("client", "timeout_secs", &raw)?;
    }
    if let Some(raw) = lookup(POLL_INTERVAL_ENV) {
        config.engine.poll_interval_ms = parse_number("engine", "poll_interval_ms", &raw)?;
    }
    if let Some(raw) = lookup(MAX_POLL_FAILURES_ENV) {
        config.engine.max_poll_failures = parse_number("engine", "max_poll_failures", &raw)?;
    }
    if let Some(raw) = lookup(POLL_BACKOFF_CEILING_ENV) {
        config.engine.poll_backoff_ceiling_ms = if raw.trim().is_empty() {
            None
        } else {
            Some(parse_number("engine", "poll_backoff_ceiling_ms", &raw)?)
        };
    }
    if let Some(raw) = lookup(EVENT_BUFFER_ENV) {
        config.engine.event_buffer = parse_number("engine", "event_buffer", &raw)?;
    }
    if let Some(level) = lookup(LOG_LEVEL_ENV) {
        config.logging.level = level;
    }
    if let Some(format) = lookup(LOG_FORMAT_ENV) {
        config.logging.format = Some(format);
    }
    Ok(())
}
