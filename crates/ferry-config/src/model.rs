//! Typed configuration document.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;

/// Root configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FerryConfig {
    /// Reconciliation engine knobs.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Logging preferences.
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Download clients in scan order.
    #[serde(default)]
    pub download_clients: Vec<DownloadClientConfig>,
    /// Media managers whose queues drive discovery.
    #[serde(default)]
    pub media_managers: Vec<MediaManagerConfig>,
    /// Directed home-to-target routes.
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
}

impl FerryConfig {
    /// Download client by name.
    #[must_use]
    pub fn client(&self, name: &str) -> Option<&DownloadClientConfig> {
        self.download_clients.iter().find(|client| client.name == name)
    }

    /// Connection by name.
    #[must_use]
    pub fn connection(&self, name: &str) -> Option<&ConnectionConfig> {
        self.connections.iter().find(|conn| conn.name == name)
    }

    /// Connections whose `from` or `to` names the client.
    #[must_use]
    pub fn connections_for_client(&self, client: &str) -> Vec<&ConnectionConfig> {
        self.connections
            .iter()
            .filter(|conn| conn.from == client || conn.to == client)
            .collect()
    }
}

/// Reconciliation engine knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds between ticks.
    pub tick_interval_secs: u64,
    /// Seconds to back off after a failed tick.
    pub error_backoff_secs: u64,
    /// Per-request timeout for remote services.
    pub request_timeout_secs: u64,
    /// Consecutive unclaimed ticks before a torrent is dropped.
    pub not_found_limit: u32,
    /// Crash-recovery snapshot file.
    pub state_file: PathBuf,
}

impl EngineConfig {
    /// Tick interval as a duration.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    /// Back-off as a duration.
    #[must_use]
    pub const fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    /// Request timeout as a duration.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: defaults::TICK_INTERVAL_SECS,
            error_backoff_secs: defaults::ERROR_BACKOFF_SECS,
            request_timeout_secs: defaults::REQUEST_TIMEOUT_SECS,
            not_found_limit: defaults::NOT_FOUND_LIMIT,
            state_file: PathBuf::from(defaults::STATE_FILE),
        }
    }
}

/// Logging preferences; `RUST_LOG` and `FERRY_LOG_FORMAT` take precedence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive.
    pub level: String,
    /// `json` or `pretty`; inferred from the build profile when absent.
    pub format: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_owned(),
            format: None,
        }
    }
}

/// Download client definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadClientConfig {
    /// Unique client name.
    pub name: String,
    /// Adapter type tag, e.g. `deluge`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Host name or address.
    pub host: String,
    /// Web UI port.
    pub port: u16,
    /// Optional user name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Web UI password.
    pub password: String,
    /// Use HTTPS for the web UI.
    #[serde(default)]
    pub use_tls: bool,
}

impl DownloadClientConfig {
    /// Base URL of the client's web endpoint.
    #[must_use]
    pub fn base_url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

/// Media manager definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaManagerConfig {
    /// Unique manager name.
    pub name: String,
    /// `radarr` or `sonarr`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Base URL, e.g. `http://radarr:7878`.
    pub url: String,
    /// API key sent as `X-Api-Key`.
    pub api_key: String,
}

/// Directed route between two download clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Unique route name.
    pub name: String,
    /// Home client name.
    pub from: String,
    /// Target client name.
    pub to: String,
    /// Concurrent transfers for this route.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Transport pair.
    pub transfer_config: TransferConfig,
    /// Directory holding `{hash}.torrent` files on the home side.
    pub source_dot_torrent_path: String,
    /// Payload root on the home side.
    pub source_torrent_download_path: String,
    /// Directory receiving `.torrent` copies on the target side.
    pub destination_dot_torrent_tmp_dir: String,
    /// Payload root on the target side.
    pub destination_torrent_download_path: String,
}

const fn default_max_concurrency() -> usize {
    defaults::MAX_CONCURRENCY
}

/// Transport endpoints for both sides of a route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Home side.
    pub from: TransportEndpoint,
    /// Target side.
    pub to: TransportEndpoint,
}

/// How one side of a route reaches its filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportEndpoint {
    /// Directly mounted filesystem.
    Local,
    /// Remote filesystem over SFTP.
    Sftp(SftpEndpoint),
}

impl TransportEndpoint {
    /// Type tag.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Sftp(_) => "sftp",
        }
    }
}

/// SFTP connection details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SftpEndpoint {
    /// SSH host.
    pub host: String,
    /// SSH port.
    #[serde(default = "default_sftp_port")]
    pub port: u16,
    /// SSH user.
    pub username: String,
    /// Password authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Private key file for public-key authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<PathBuf>,
}

const fn default_sftp_port() -> u16 {
    defaults::SFTP_PORT
}
