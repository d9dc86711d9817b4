//! # Design
//!
//! - Centralise application-level errors for bootstrap and route mutation.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration operations failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: ferry_config::ConfigError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: ferry_telemetry::TelemetryError,
    },
    /// Building a download client failed.
    #[error("download client operation failed")]
    Client {
        /// Operation identifier.
        operation: &'static str,
        /// Source client error.
        source: ferry_core::ClientError,
    },
    /// Building a media manager failed.
    #[error("media manager operation failed")]
    Manager {
        /// Operation identifier.
        operation: &'static str,
        /// Source manager error.
        source: ferry_core::ManagerError,
    },
    /// A route with the same name is already installed.
    #[error("route already exists")]
    RouteExists {
        /// Route name.
        route: String,
    },
    /// No route with the given name is installed.
    #[error("route not found")]
    RouteNotFound {
        /// Route name.
        route: String,
    },
    /// IO operations failed.
    #[error("io operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Optional path involved in the failure.
        path: Option<PathBuf>,
        /// Source IO error.
        source: io::Error,
    },
}

impl AppError {
    pub(crate) const fn config(operation: &'static str, source: ferry_config::ConfigError) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: ferry_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn client(operation: &'static str, source: ferry_core::ClientError) -> Self {
        Self::Client { operation, source }
    }

    pub(crate) const fn manager(operation: &'static str, source: ferry_core::ManagerError) -> Self {
        Self::Manager { operation, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn helpers_build_variants_and_keep_sources() {
        let client = AppError::client(
            "factory.download_client",
            ferry_core::ClientError::UnsupportedType {
                kind: "transmission".into(),
            },
        );
        assert!(matches!(client, AppError::Client { .. }));
        assert_eq!(client.to_string(), "download client operation failed");
        assert!(client.source().is_some());

        let manager = AppError::manager(
            "factory.media_manager",
            ferry_core::ManagerError::UnsupportedType {
                kind: "lidarr".into(),
            },
        );
        assert!(matches!(manager, AppError::Manager { .. }));

        let missing = AppError::RouteNotFound {
            route: "home-box".into(),
        };
        assert_eq!(missing.to_string(), "route not found");
        assert!(missing.source().is_none());
    }
}
