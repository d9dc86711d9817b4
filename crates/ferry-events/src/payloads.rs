//! Event payload types carried across the workspace.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Identifier assigned to each event emitted by the platform.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
pub const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Typed domain events surfaced across the system.
///
/// Torrent identifiers are the lower-cased content hash; states are carried as
/// their canonical upper-snake names so this crate stays a leaf.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A torrent entered the tracked set.
    TorrentTracked {
        /// Content hash of the torrent.
        torrent_id: String,
        /// Display name reported by the media manager.
        name: String,
    },
    /// Torrent transitioned into a new lifecycle state.
    StateChanged {
        /// Content hash of the torrent.
        torrent_id: String,
        /// Previous state name.
        from: String,
        /// New state name.
        to: String,
    },
    /// Torrent left the tracked set.
    TorrentRemoved {
        /// Content hash of the torrent.
        torrent_id: String,
        /// Short machine-friendly reason.
        reason: String,
    },
    /// A transfer was accepted by a route's engine and waits for a slot.
    TransferQueued {
        /// Content hash of the torrent.
        torrent_id: String,
        /// Route that accepted the job.
        route: String,
    },
    /// A transfer acquired a worker slot and began copying.
    TransferStarted {
        /// History identifier of the transfer.
        transfer_id: Uuid,
        /// Content hash of the torrent.
        torrent_id: String,
        /// Route executing the transfer.
        route: String,
    },
    /// Periodic progress update for an in-flight transfer.
    TransferProgress {
        /// History identifier of the transfer.
        transfer_id: Uuid,
        /// Bytes moved so far.
        bytes_transferred: u64,
    },
    /// A transfer finished and the torrent was registered on the target.
    TransferCompleted {
        /// History identifier of the transfer.
        transfer_id: Uuid,
    },
    /// A transfer failed; partial data is left in place.
    TransferFailed {
        /// History identifier of the transfer.
        transfer_id: Uuid,
        /// Human-readable failure detail.
        message: String,
    },
    /// A connection route was added, replaced, or removed at runtime.
    RouteChanged {
        /// Route name.
        route: String,
        /// `added`, `replaced`, or `removed`.
        change: String,
    },
    /// System health status changed (degraded or restored components).
    HealthChanged {
        /// Components currently considered degraded.
        degraded: Vec<String>,
    },
}

impl Event {
    /// Machine-friendly discriminator for consumers.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TorrentTracked { .. } => "torrent_tracked",
            Self::StateChanged { .. } => "state_changed",
            Self::TorrentRemoved { .. } => "torrent_removed",
            Self::TransferQueued { .. } => "transfer_queued",
            Self::TransferStarted { .. } => "transfer_started",
            Self::TransferProgress { .. } => "transfer_progress",
            Self::TransferCompleted { .. } => "transfer_completed",
            Self::TransferFailed { .. } => "transfer_failed",
            Self::RouteChanged { .. } => "route_changed",
            Self::HealthChanged { .. } => "health_changed",
        }
    }

    /// Torrent identifier carried by the event, when it concerns a single torrent.
    #[must_use]
    pub fn torrent_id(&self) -> Option<&str> {
        match self {
            Self::TorrentTracked { torrent_id, .. }
            | Self::StateChanged { torrent_id, .. }
            | Self::TorrentRemoved { torrent_id, .. }
            | Self::TransferQueued { torrent_id, .. }
            | Self::TransferStarted { torrent_id, .. } => Some(torrent_id),
            Self::TransferProgress { .. }
            | Self::TransferCompleted { .. }
            | Self::TransferFailed { .. }
            | Self::RouteChanged { .. }
            | Self::HealthChanged { .. } => None,
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and emission timestamp.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct EventEnvelope {
    /// Monotonic identifier assigned to the wrapped event.
    pub id: EventId,
    /// Timestamp recording when the envelope was produced.
    pub timestamp: DateTime<Utc>,
    /// Wrapped event payload.
    pub event: Event,
}
