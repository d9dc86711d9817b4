//! Torrent lifecycle state machine.
//!
//! A torrent moves `MANAGER_QUEUED -> HOME_* -> COPYING -> COPIED -> TARGET_*`
//! and leaves the tracked set once its media manager confirms cleanup. The
//! `HOME_*`/`TARGET_*` families mirror the native phases a download client
//! reports for its copy of the torrent.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Phase reported natively by a download client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientPhase {
    /// Waiting in the client's queue.
    Queued,
    /// Verifying existing data.
    Checking,
    /// Pre-allocating storage.
    Allocating,
    /// Actively downloading.
    Downloading,
    /// Complete and seeding.
    Seeding,
    /// Paused by the user or client.
    Paused,
    /// Storage is being relocated.
    Moving,
    /// The client reports an error for the torrent.
    Error,
}

impl ClientPhase {
    const ALL: [Self; 8] = [
        Self::Queued,
        Self::Checking,
        Self::Allocating,
        Self::Downloading,
        Self::Seeding,
        Self::Paused,
        Self::Moving,
        Self::Error,
    ];

    /// Upper-case suffix used in the serialised state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Checking => "CHECKING",
            Self::Allocating => "ALLOCATING",
            Self::Downloading => "DOWNLOADING",
            Self::Seeding => "SEEDING",
            Self::Paused => "PAUSED",
            Self::Moving => "MOVING",
            Self::Error => "ERROR",
        }
    }

    /// Parse a native client label, ignoring case and surrounding whitespace.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|phase| phase.as_str().eq_ignore_ascii_case(label))
    }
}

/// Which side of a route a client occupies for a given torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientSide {
    /// Source client holding the original download.
    Home,
    /// Destination client receiving the copy.
    Target,
}

/// Lifecycle state of a tracked torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TorrentState {
    /// Seen in a media manager queue, not yet located on any client.
    ManagerQueued,
    /// Previously located but currently claimed by no client.
    Unclaimed,
    /// Present on the home client in the given phase.
    Home(ClientPhase),
    /// Payload transfer to the target is in progress.
    Copying,
    /// Payload transferred; target registration pending.
    Copied,
    /// Present on the target client in the given phase.
    Target(ClientPhase),
    /// Failed; the failure reason is recorded on the torrent.
    Error,
    /// Home client reference could not be resolved.
    Missing,
}

impl TorrentState {
    /// Map a client's native label onto the home/target family.
    ///
    /// Labels outside the known phase set map to [`TorrentState::Error`].
    #[must_use]
    pub fn from_native(side: ClientSide, label: &str) -> Self {
        match (side, ClientPhase::from_label(label)) {
            (ClientSide::Home, Some(phase)) => Self::Home(phase),
            (ClientSide::Target, Some(phase)) => Self::Target(phase),
            (_, None) => Self::Error,
        }
    }

    /// States from which client discovery runs.
    #[must_use]
    pub const fn is_unclaimed_like(self) -> bool {
        matches!(
            self,
            Self::ManagerQueued | Self::Unclaimed | Self::Error | Self::Missing
        )
    }

    /// Any `HOME_*` state.
    #[must_use]
    pub const fn is_home(self) -> bool {
        matches!(self, Self::Home(_))
    }

    /// Any `TARGET_*` state.
    #[must_use]
    pub const fn is_target(self) -> bool {
        matches!(self, Self::Target(_))
    }

    /// `COPYING` or `COPIED`.
    #[must_use]
    pub const fn is_transfer_phase(self) -> bool {
        matches!(self, Self::Copying | Self::Copied)
    }

    /// Canonical upper-snake name, e.g. `HOME_SEEDING`.
    #[must_use]
    pub fn name(self) -> String {
        match self {
            Self::ManagerQueued => "MANAGER_QUEUED".to_owned(),
            Self::Unclaimed => "UNCLAIMED".to_owned(),
            Self::Home(phase) => format!("HOME_{}", phase.as_str()),
            Self::Copying => "COPYING".to_owned(),
            Self::Copied => "COPIED".to_owned(),
            Self::Target(phase) => format!("TARGET_{}", phase.as_str()),
            Self::Error => "ERROR".to_owned(),
            Self::Missing => "MISSING".to_owned(),
        }
    }
}

impl fmt::Display for TorrentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Error returned when a state name cannot be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown torrent state")]
pub struct StateParseError {
    /// Offending input.
    pub value: String,
}

impl FromStr for TorrentState {
    type Err = StateParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parsed = match value {
            "MANAGER_QUEUED" => Some(Self::ManagerQueued),
            "UNCLAIMED" => Some(Self::Unclaimed),
            "COPYING" => Some(Self::Copying),
            "COPIED" => Some(Self::Copied),
            "ERROR" => Some(Self::Error),
            "MISSING" => Some(Self::Missing),
            other => {
                if let Some(rest) = other.strip_prefix("HOME_") {
                    phase_exact(rest).map(Self::Home)
                } else if let Some(rest) = other.strip_prefix("TARGET_") {
                    phase_exact(rest).map(Self::Target)
                } else {
                    None
                }
            }
        };
        parsed.ok_or_else(|| StateParseError {
            value: value.to_owned(),
        })
    }
}

fn phase_exact(suffix: &str) -> Option<ClientPhase> {
    ClientPhase::ALL
        .into_iter()
        .find(|phase| phase.as_str() == suffix)
}

impl Serialize for TorrentState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name())
    }
}

impl<'de> Deserialize<'de> for TorrentState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
