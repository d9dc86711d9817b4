//! # Design
//!
//! - Constant-message errors for the transfer pipeline.
//! - Operation and path context travel as fields so failures can be asserted on.
//! - [`TransferError::reason`] renders the short text recorded on a failed torrent.

use std::io;
use std::path::PathBuf;

use ferry_core::ClientError;
use thiserror::Error;

/// Result type for transfer operations.
pub type TransferResult<T> = Result<T, TransferError>;

/// Errors produced while moving a torrent between clients.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Local filesystem failure.
    #[error("transfer io failure")]
    Io {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Directory traversal failure.
    #[error("transfer walkdir failure")]
    Walkdir {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying walkdir error.
        source: walkdir::Error,
    },
    /// SSH or SFTP failure.
    #[error("transfer ssh failure")]
    Ssh {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Remote host.
        host: String,
        /// Underlying libssh2 error.
        source: ssh2::Error,
    },
    /// A file the pipeline depends on does not exist.
    #[error("transfer artifact missing")]
    MissingArtifact {
        /// What the artifact is.
        artifact: &'static str,
        /// Where it was expected.
        path: PathBuf,
    },
    /// Required torrent state was absent.
    #[error("transfer missing state")]
    MissingState {
        /// State field that was missing.
        field: &'static str,
    },
    /// A client named by the route is not registered.
    #[error("transfer client unavailable")]
    ClientUnavailable {
        /// Client name.
        client: String,
    },
    /// A download client call failed.
    #[error("transfer client call failed")]
    Client {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// Underlying adapter error.
        source: ClientError,
    },
    /// A blocking worker panicked or was cancelled.
    #[error("transfer worker failed")]
    Join {
        /// Operation running on the worker.
        operation: &'static str,
    },
}

impl TransferError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn walkdir(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: walkdir::Error,
    ) -> Self {
        Self::Walkdir {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn ssh(operation: &'static str, host: impl Into<String>, source: ssh2::Error) -> Self {
        Self::Ssh {
            operation,
            host: host.into(),
            source,
        }
    }

    pub(crate) const fn client(operation: &'static str, source: ClientError) -> Self {
        Self::Client { operation, source }
    }

    /// Short human-readable description including context and cause.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Io {
                operation,
                path,
                source,
            } => format!("{operation} failed for {}: {source}", path.display()),
            Self::Walkdir {
                operation,
                path,
                source,
            } => format!("{operation} failed for {}: {source}", path.display()),
            Self::Ssh {
                operation,
                host,
                source,
            } => format!("{operation} failed on {host}: {source}"),
            Self::MissingArtifact { artifact, path } => {
                format!("{artifact} not found at {}", path.display())
            }
            Self::MissingState { field } => format!("torrent has no {field}"),
            Self::ClientUnavailable { client } => format!("client {client} is not registered"),
            Self::Client { operation, source } => format!("{operation} failed: {source}"),
            Self::Join { operation } => format!("{operation} worker stopped unexpectedly"),
        }
    }
}
