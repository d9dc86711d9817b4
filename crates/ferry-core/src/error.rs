//! Error types for download-client and media-manager adapters.
//!
//! Messages are constant; the client name, operation and upstream detail
//! travel as fields.

use std::error::Error;

use thiserror::Error;

/// Boxed upstream failure carried by adapter errors.
pub type BoxedSource = Box<dyn Error + Send + Sync>;

/// Primary error type for download-client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Client could not be reached.
    #[error("download client unreachable")]
    Unreachable {
        /// Configured client name.
        client: String,
        /// Operation identifier.
        operation: &'static str,
        /// Underlying transport failure.
        #[source]
        source: BoxedSource,
    },
    /// Client did not answer before the per-request timeout.
    #[error("download client request timed out")]
    Timeout {
        /// Configured client name.
        client: String,
        /// Operation identifier.
        operation: &'static str,
    },
    /// Client rejected the configured credentials.
    #[error("download client authentication failed")]
    Authentication {
        /// Configured client name.
        client: String,
    },
    /// Client is reachable but has no connected daemon.
    #[error("download client not connected")]
    NotConnected {
        /// Configured client name.
        client: String,
    },
    /// Remote procedure call returned an error object.
    #[error("download client rpc error")]
    Rpc {
        /// Configured client name.
        client: String,
        /// Remote method that failed.
        method: &'static str,
        /// Remote error code when provided.
        code: Option<i64>,
        /// Remote error message.
        message: String,
    },
    /// Response payload did not match the expected shape.
    #[error("download client returned malformed payload")]
    Malformed {
        /// Configured client name.
        client: String,
        /// Operation identifier.
        operation: &'static str,
        /// Static reason for the failure.
        reason: &'static str,
    },
    /// No adapter exists for the configured type tag.
    #[error("unsupported download client type")]
    UnsupportedType {
        /// Offending type tag.
        kind: String,
    },
}

impl ClientError {
    /// Build an [`ClientError::Unreachable`] from any upstream error.
    pub fn unreachable(
        client: impl Into<String>,
        operation: &'static str,
        source: impl Into<BoxedSource>,
    ) -> Self {
        Self::Unreachable {
            client: client.into(),
            operation,
            source: source.into(),
        }
    }

    /// Build a [`ClientError::Malformed`].
    pub fn malformed(
        client: impl Into<String>,
        operation: &'static str,
        reason: &'static str,
    ) -> Self {
        Self::Malformed {
            client: client.into(),
            operation,
            reason,
        }
    }

    /// Whether the failure means the client could not be talked to at all.
    ///
    /// The reconciliation loop treats these as "not found this tick".
    #[must_use]
    pub const fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::Unreachable { .. }
                | Self::Timeout { .. }
                | Self::Authentication { .. }
                | Self::NotConnected { .. }
        )
    }
}

/// Convenience alias for download-client results.
pub type ClientResult<T> = Result<T, ClientError>;

/// Primary error type for media-manager operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Manager could not be reached.
    #[error("media manager unreachable")]
    Unreachable {
        /// Configured manager name.
        manager: String,
        /// Operation identifier.
        operation: &'static str,
        /// Underlying transport failure.
        #[source]
        source: BoxedSource,
    },
    /// Manager returned a non-success HTTP status.
    #[error("media manager returned error status")]
    Status {
        /// Configured manager name.
        manager: String,
        /// Operation identifier.
        operation: &'static str,
        /// HTTP status code.
        status: u16,
    },
    /// Response payload did not match the expected shape.
    #[error("media manager returned malformed payload")]
    Malformed {
        /// Configured manager name.
        manager: String,
        /// Operation identifier.
        operation: &'static str,
        /// Underlying decode failure.
        #[source]
        source: BoxedSource,
    },
    /// No adapter exists for the configured type tag.
    #[error("unsupported media manager type")]
    UnsupportedType {
        /// Offending type tag.
        kind: String,
    },
}

/// Convenience alias for media-manager results.
pub type ManagerResult<T> = Result<T, ManagerError>;
