//! Core torrent domain types and DTOs shared across the workspace.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::TorrentState;

/// Content hash identifying a torrent, always lower-cased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct TorrentId(String);

impl TorrentId {
    /// Normalise a raw hash into an identifier.
    #[must_use]
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_ascii_lowercase())
    }

    /// Borrow the normalised hash.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TorrentId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for TorrentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<TorrentId> for String {
    fn from(value: TorrentId) -> Self {
        value.0
    }
}

impl fmt::Display for TorrentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TorrentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Type tag of a media manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaManagerKind {
    /// Radarr (movies).
    Radarr,
    /// Sonarr (series).
    Sonarr,
}

impl MediaManagerKind {
    /// Lower-case configuration tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Radarr => "radarr",
            Self::Sonarr => "sonarr",
        }
    }

    /// Parse a configuration tag, ignoring case.
    #[must_use]
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "radarr" => Some(Self::Radarr),
            "sonarr" => Some(Self::Sonarr),
            _ => None,
        }
    }
}

impl fmt::Display for MediaManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File entry reported by a download client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientFile {
    /// Path relative to the torrent's save path.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
}

/// Last observed view of a torrent on one download client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ClientTorrentInfo {
    /// Name reported by the client.
    pub name: String,
    /// Native state label, e.g. `Seeding`.
    pub state: String,
    /// Download progress percent (0-100).
    pub progress: f64,
    /// Total payload size in bytes.
    pub total_size: u64,
    /// Save path on the client host.
    pub save_path: Option<String>,
    /// Files belonging to the torrent.
    #[serde(default)]
    pub files: Vec<ClientFile>,
}

impl ClientTorrentInfo {
    /// First path component of every file, deduplicated in order of appearance.
    ///
    /// These are the payload roots moved by a transfer.
    #[must_use]
    pub fn top_level_segments(&self) -> Vec<String> {
        let mut segments: Vec<String> = Vec::new();
        for file in &self.files {
            let Some(first) = file
                .path
                .split(['/', '\\'])
                .find(|segment| !segment.is_empty())
            else {
                continue;
            };
            if !segments.iter().any(|existing| existing == first) {
                segments.push(first.to_owned());
            }
        }
        segments
    }
}

/// Live transfer telemetry written by the transfer engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TransferTelemetry {
    /// Percent complete within the current file (0-100).
    pub progress: f64,
    /// Bytes per second since the previous progress report.
    pub transfer_speed: f64,
    /// File currently being copied.
    pub current_file: Option<String>,
    /// One-based index of the current file.
    pub current_file_count: u32,
    /// Total files in the payload.
    pub total_files: u32,
}

/// Tracked unit of content moving between download clients.
///
/// Client and media-manager references are names resolved through the
/// registries. The state is only changed through
/// [`TorrentCatalog::set_state`](crate::TorrentCatalog::set_state).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Torrent {
    /// Lower-cased content hash.
    pub id: TorrentId,
    /// Display name only; never used as a key.
    pub name: String,
    state: TorrentState,
    /// Name of the client holding the source copy.
    pub home_client: Option<String>,
    /// Name of the client holding the destination copy.
    pub target_client: Option<String>,
    /// Last view reported by the home client.
    pub home_client_info: Option<ClientTorrentInfo>,
    /// Last view reported by the target client.
    pub target_client_info: Option<ClientTorrentInfo>,
    /// Transfer telemetry.
    #[serde(default)]
    pub telemetry: TransferTelemetry,
    /// Consecutive ticks where no client claimed the torrent.
    #[serde(default)]
    pub not_found_attempts: u32,
    /// Name of the media manager whose queue owns the torrent.
    pub media_manager: Option<String>,
    /// Type tag of that media manager.
    pub media_manager_kind: Option<MediaManagerKind>,
    /// Reason recorded when the torrent entered `ERROR`.
    pub failure_reason: Option<String>,
    /// History identifier of the latest transfer.
    pub transfer_id: Option<Uuid>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
}

impl Torrent {
    /// Construct a freshly discovered torrent in `MANAGER_QUEUED`.
    #[must_use]
    pub fn new(id: TorrentId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            state: TorrentState::ManagerQueued,
            home_client: None,
            target_client: None,
            home_client_info: None,
            target_client_info: None,
            telemetry: TransferTelemetry::default(),
            not_found_attempts: 0,
            media_manager: None,
            media_manager_kind: None,
            failure_reason: None,
            transfer_id: None,
            updated_at: Utc::now(),
        }
    }

    /// Override the initial state before the torrent enters a catalog.
    #[must_use]
    pub fn with_state(mut self, state: TorrentState) -> Self {
        self.state = state;
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> TorrentState {
        self.state
    }

    pub(crate) fn replace_state(&mut self, state: TorrentState) -> TorrentState {
        let previous = self.state;
        self.state = state;
        previous
    }
}

/// Options applied when registering a torrent on a client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddTorrentOptions {
    /// Directory the client should treat as the payload location.
    pub download_location: Option<String>,
    /// Whether the client should add the torrent paused.
    #[serde(default)]
    pub add_paused: bool,
}

/// Request to register a torrent on a download client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddTorrent {
    /// Expected content hash.
    pub id: TorrentId,
    /// File name of the `.torrent` metadata.
    pub filename: String,
    /// Base64-encoded `.torrent` metadata.
    pub metainfo_b64: String,
    /// Client options.
    pub options: AddTorrentOptions,
}

/// Outcome of a manual connectivity probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTest {
    /// Whether the probe succeeded.
    pub success: bool,
    /// Human-readable detail.
    pub message: String,
}

/// One entry of a media manager queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Download identifier, which is the torrent hash.
    pub download_id: TorrentId,
    /// Queue title.
    pub title: String,
}

/// Inputs for creating a transfer history record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferDescriptor {
    /// Torrent being moved.
    pub torrent_id: TorrentId,
    /// Display name.
    pub torrent_name: String,
    /// Home client name.
    pub source_client: String,
    /// Target client name.
    pub target_client: String,
    /// Route executing the transfer.
    pub route: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn torrent_ids_are_lower_cased() {
        let id = TorrentId::new(" ABCDEF0123 ");
        assert_eq!(id.as_str(), "abcdef0123");
        assert_eq!(TorrentId::from("AbC"), TorrentId::new("abc"));
    }

    #[test]
    fn torrent_ids_normalise_on_deserialize() -> Result<(), serde_json::Error> {
        let id: TorrentId = serde_json::from_str("\"DEADBEEF\"")?;
        assert_eq!(id.as_str(), "deadbeef");
        Ok(())
    }

    #[test]
    fn top_level_segments_are_deduplicated_in_order() {
        let info = ClientTorrentInfo {
            files: vec![
                ClientFile {
                    path: "Show.S01/ep1.mkv".into(),
                    size: 1,
                },
                ClientFile {
                    path: "Show.S01/ep2.mkv".into(),
                    size: 1,
                },
                ClientFile {
                    path: "extras.nfo".into(),
                    size: 1,
                },
                ClientFile {
                    path: "/Show.S01/subs/en.srt".into(),
                    size: 1,
                },
            ],
            ..ClientTorrentInfo::default()
        };
        assert_eq!(info.top_level_segments(), vec!["Show.S01", "extras.nfo"]);
    }

    #[test]
    fn manager_kind_parses_tags() {
        assert_eq!(MediaManagerKind::parse("Radarr"), Some(MediaManagerKind::Radarr));
        assert_eq!(MediaManagerKind::parse("sonarr"), Some(MediaManagerKind::Sonarr));
        assert_eq!(MediaManagerKind::parse("lidarr"), None);
    }

    #[test]
    fn new_torrents_start_manager_queued() {
        let torrent = Torrent::new(TorrentId::new("ABC"), "demo");
        assert_eq!(torrent.state(), TorrentState::ManagerQueued);
        let moved = torrent.with_state(TorrentState::Copying);
        assert_eq!(moved.state(), TorrentState::Copying);
    }
}
