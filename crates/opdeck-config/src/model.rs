//! Typed configuration document.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults::{
    DEFAULT_API_URL, DEFAULT_EVENT_BUFFER, DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_LOG_LEVEL,
    DEFAULT_MAX_POLL_FAILURES, DEFAULT_POLL_INTERVAL_MS,
};

/// Complete configuration for the engine and its REST client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OpdeckConfig {
    /// Backend connection settings.
    pub client: ClientConfig,
    /// Operation store and poller settings.
    pub engine: EngineConfig,
    /// Log output settings.
    pub logging: LoggingSettings,
}

/// Backend connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Base URL of the dashboard backend.
    pub api_url: String,
    /// Bearer token sent with every request.
    pub api_token: Option<String>,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_token: None,
            timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
        }
    }
}

impl ClientConfig {
    /// Per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Operation store and poller settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Delay between status polls in milliseconds.
    pub poll_interval_ms: u64,
    /// Consecutive transport failures tolerated while polling; `0` retries forever.
    pub max_poll_failures: u32,
    /// Exponential backoff ceiling in milliseconds; unset keeps a fixed interval.
    pub poll_backoff_ceiling_ms: Option<u64>,
    /// Replay capacity of the transition feed.
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_poll_failures: DEFAULT_MAX_POLL_FAILURES,
            poll_backoff_ceiling_ms: None,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl EngineConfig {
    /// Delay between status polls.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Failure budget, `None` when unbounded.
    #[must_use]
    pub const fn max_consecutive_failures(&self) -> Option<u32> {
        if self.max_poll_failures == 0 {
            None
        } else {
            Some(self.max_poll_failures)
        }
    }

    /// Backoff ceiling, if backoff is enabled.
    #[must_use]
    pub fn backoff_ceiling(&self) -> Option<Duration> {
        self.poll_backoff_ceiling_ms.map(Duration::from_millis)
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSettings {
    /// Level or `EnvFilter` directive.
    pub level: String,
    /// `json` or `pretty`; unset picks a format for the build profile.
    pub format: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            format: None,
        }
    }
}
