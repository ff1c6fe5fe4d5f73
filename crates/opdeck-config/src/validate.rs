//! Validation and parsing helpers for configuration values.

use std::str::FromStr;

use url::Url;

use crate::error::{ConfigError, ConfigResult};
use crate::model::OpdeckConfig;

const LOG_FORMATS: [&str; 3] = ["json", "pretty", "text"];

/// Check every field of a merged configuration.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] for the first field that fails.
pub fn validate(config: &OpdeckConfig) -> ConfigResult<()> {
    validate_api_url(&config.client.api_url)?;
    ensure_positive("client", "timeout_secs", config.client.timeout_secs)?;

    let engine = &config.engine;
    ensure_positive("engine", "poll_interval_ms", engine.poll_interval_ms)?;
    if let Some(ceiling) = engine.poll_backoff_ceiling_ms
        && ceiling < engine.poll_interval_ms
    {
        return Err(ConfigError::invalid(
            "engine",
            "poll_backoff_ceiling_ms",
            Some(&ceiling.to_string()),
            "must not be lower than poll_interval_ms",
        ));
    }
    if engine.event_buffer == 0 {
        return Err(ConfigError::invalid(
            "engine",
            "event_buffer",
            Some("0"),
            "must be positive",
        ));
    }

    if config.logging.level.trim().is_empty() {
        return Err(ConfigError::invalid(
            "logging",
            "level",
            None,
            "must not be empty",
        ));
    }
    if let Some(format) = config.logging.format.as_deref() {
        validate_log_format(format)?;
    }
    Ok(())
}

/// Parse the backend base URL, accepting only `http` and `https`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] for unparsable URLs or other schemes.
pub fn validate_api_url(value: &str) -> ConfigResult<Url> {
    let url = Url::parse(value)
        .map_err(|_| ConfigError::invalid("client", "api_url", Some(value), "must be a URL"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::invalid(
            "client",
            "api_url",
            Some(value),
            "scheme must be http or https",
        ));
    }
    Ok(url)
}

fn validate_log_format(value: &str) -> ConfigResult<()> {
    let normalized = value.trim().to_ascii_lowercase();
    if LOG_FORMATS.contains(&normalized.as_str()) {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            "logging",
            "format",
            Some(value),
            "must be json or pretty",
        ))
    }
}

fn ensure_positive(section: &str, field: &str, value: u64) -> ConfigResult<()> {
    if value == 0 {
        return Err(ConfigError::invalid(
            section,
            field,
            Some("0"),
            "must be positive",
        ));
    }
    Ok(())
}

pub(crate) fn parse_number<N: FromStr>(section: &str, field: &str, raw: &str) -> ConfigResult<N> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::invalid(section, field, Some(raw), "must be a whole number"))
}
