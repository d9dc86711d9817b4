//! Error types for configuration operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading or writing the configuration file failed.
    #[error("configuration file io failure")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// File involved in the failure.
        path: PathBuf,
        /// Source IO error.
        source: io::Error,
    },
    /// YAML parsing or serialisation failed.
    #[error("configuration yaml failure")]
    Yaml {
        /// Operation identifier.
        operation: &'static str,
        /// Source YAML error.
        source: serde_yaml::Error,
    },
    /// JSON parsing or serialisation failed.
    #[error("configuration json failure")]
    Json {
        /// Operation identifier.
        operation: &'static str,
        /// Source JSON error.
        source: serde_json::Error,
    },
    /// Field contained an invalid value.
    #[error("invalid configuration field")]
    InvalidField {
        /// Section that failed validation.
        section: &'static str,
        /// Entry name within the section when applicable.
        entry: Option<String>,
        /// Field that failed validation.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
        /// Offending value when available.
        value: Option<String>,
    },
    /// Two entries in a section share a name.
    #[error("duplicate configuration entry")]
    Duplicate {
        /// Section containing the duplicate.
        section: &'static str,
        /// Duplicated name.
        name: String,
    },
    /// A connection references an unknown download client.
    #[error("unknown configuration reference")]
    UnknownReference {
        /// Connection containing the reference.
        connection: String,
        /// Referencing field.
        field: &'static str,
        /// Referenced name.
        value: String,
    },
    /// A mutation targeted an entry that does not exist.
    #[error("configuration entry not found")]
    NotFound {
        /// Section that was searched.
        section: &'static str,
        /// Missing name.
        name: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(
        section: &'static str,
        entry: Option<&str>,
        field: &'static str,
        reason: &'static str,
        value: Option<String>,
    ) -> Self {
        Self::InvalidField {
            section,
            entry: entry.map(str::to_owned),
            field,
            reason,
            value,
        }
    }

    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;
