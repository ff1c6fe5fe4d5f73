//! Default values applied before files and environment overrides.

/// Backend base URL used when nothing is configured.
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8080";
/// HTTP request timeout in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
/// Delay between status polls in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
/// Consecutive poll transport failures tolerated before an operation fails.
pub const DEFAULT_MAX_POLL_FAILURES: u32 = 5;
/// Replay capacity of the transition feed.
pub const DEFAULT_EVENT_BUFFER: usize = 1_024;
/// Log level when neither the config nor `RUST_LOG` set one.
pub const DEFAULT_LOG_LEVEL: &str = "info";
