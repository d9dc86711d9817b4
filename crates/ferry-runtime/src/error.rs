//! Snapshot store errors.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for snapshot operations.
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Errors produced while reading or writing the snapshot file.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Filesystem failure.
    #[error("snapshot io failure")]
    Io {
        /// Operation that failed.
        operation: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Encoding or decoding failure.
    #[error("snapshot json failure")]
    Json {
        /// Operation that failed.
        operation: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
    /// The temp file could not be renamed over the snapshot.
    #[error("snapshot rename failed")]
    Persist {
        /// Snapshot path.
        path: PathBuf,
        /// Underlying persist error.
        source: tempfile::PersistError,
    },
}

impl SnapshotError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: serde_json::Error,
    ) -> Self {
        Self::Json {
            operation,
            path: path.into(),
            source,
        }
    }
}
