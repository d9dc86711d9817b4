//! Default values applied when the configuration document omits a field.

/// Seconds between reconciliation ticks.
pub const TICK_INTERVAL_SECS: u64 = 2;
/// Seconds to wait after a failed tick before the next one.
pub const ERROR_BACKOFF_SECS: u64 = 10;
/// Per-request timeout for download clients and media managers.
pub const REQUEST_TIMEOUT_SECS: u64 = 10;
/// Consecutive unclaimed ticks before a torrent is dropped.
pub const NOT_FOUND_LIMIT: u32 = 10;
/// Concurrent transfers per connection.
pub const MAX_CONCURRENCY: usize = 3;
/// SSH port for SFTP endpoints.
pub const SFTP_PORT: u16 = 22;
/// Crash-recovery snapshot location.
pub const STATE_FILE: &str = "/var/lib/ferry/state.json";
/// Configuration file location when `FERRY_CONFIG` is unset.
pub const CONFIG_PATH: &str = "/etc/ferry/config.yaml";
/// Log level used when neither `RUST_LOG` nor the document sets one.
pub const LOG_LEVEL: &str = "info";
