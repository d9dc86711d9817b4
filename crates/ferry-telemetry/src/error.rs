//! Error types for telemetry operations.

use thiserror::Error;

/// Result alias for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Errors raised while installing logging or maintaining the metrics registry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global subscriber was already installed.
    #[error("failed to install tracing subscriber")]
    SubscriberInstall {
        /// Underlying tracing subscriber error.
        source: tracing_subscriber::util::TryInitError,
    },
    /// Building or registering a collector failed.
    #[error("metrics collector setup failed")]
    Collector {
        /// `metrics.build` or `metrics.register`.
        operation: &'static str,
        /// Metric name.
        name: &'static str,
        /// Underlying Prometheus error.
        source: prometheus::Error,
    },
    /// The text exposition could not be produced.
    #[error("failed to encode metrics")]
    Encode {
        /// Underlying Prometheus error.
        source: prometheus::Error,
    },
    /// Rendered exposition was not UTF-8.
    #[error("metrics output was not valid utf-8")]
    Utf8 {
        /// Underlying conversion error.
        source: std::string::FromUtf8Error,
    },
}

impl TelemetryError {
    pub(crate) const fn collector(
        operation: &'static str,
        name: &'static str,
        source: prometheus::Error,
    ) -> Self {
        Self::Collector {
            operation,
            name,
            source,
        }
    }
}
