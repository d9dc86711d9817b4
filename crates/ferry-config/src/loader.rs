//! Parsing the configuration file and writing it back atomically.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::defaults;
use crate::error::{ConfigError, ConfigResult};
use crate::model::FerryConfig;
use crate::validate::validate;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "FERRY_CONFIG";

/// Serialisation format, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML (default).
    Yaml,
    /// JSON, for `.json` files.
    Json,
}

impl ConfigFormat {
    /// Format implied by the path's extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Yaml,
        }
    }
}

/// Resolve the configuration path from an optional `FERRY_CONFIG` value.
#[must_use]
pub fn resolve_config_path(env_value: Option<String>) -> PathBuf {
    env_value
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .map_or_else(|| PathBuf::from(defaults::CONFIG_PATH), PathBuf::from)
}

/// Parse a document without validating it.
///
/// # Errors
///
/// Returns an error when the document is not well-formed for `format`.
pub fn parse_str(raw: &str, format: ConfigFormat) -> ConfigResult<FerryConfig> {
    match format {
        ConfigFormat::Yaml => serde_yaml::from_str(raw).map_err(|source| ConfigError::Yaml {
            operation: "config.parse",
            source,
        }),
        ConfigFormat::Json => serde_json::from_str(raw).map_err(|source| ConfigError::Json {
            operation: "config.parse",
            source,
        }),
    }
}

/// Read, parse and validate the configuration file.
///
/// # Errors
///
/// Returns an error when the file cannot be read, parsed or validated.
pub fn load_from_path(path: &Path) -> ConfigResult<FerryConfig> {
    let raw =
        fs::read_to_string(path).map_err(|err| ConfigError::io("config.read", path, err))?;
    let config = parse_str(&raw, ConfigFormat::from_path(path))?;
    validate(&config)?;
    debug!(
        path = %path.display(),
        clients = config.download_clients.len(),
        managers = config.media_managers.len(),
        connections = config.connections.len(),
        "configuration loaded"
    );
    Ok(config)
}

/// Serialise the document and atomically replace the file at `path`.
///
/// # Errors
///
/// Returns an error when serialisation or the write fails.
pub(crate) fn write_to_path(path: &Path, config: &FerryConfig) -> ConfigResult<()> {
    let rendered = match ConfigFormat::from_path(path) {
        ConfigFormat::Yaml => {
            serde_yaml::to_string(config).map_err(|source| ConfigError::Yaml {
                operation: "config.render",
                source,
            })?
        }
        ConfigFormat::Json => {
            serde_json::to_string_pretty(config).map_err(|source| ConfigError::Json {
                operation: "config.render",
                source,
            })?
        }
    };

    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut staged = NamedTempFile::new_in(dir)
        .map_err(|err| ConfigError::io("config.write.stage", dir, err))?;
    staged
        .write_all(rendered.as_bytes())
        .map_err(|err| ConfigError::io("config.write.stage", staged.path().to_path_buf(), err))?;
    staged
        .persist(path)
        .map_err(|err| ConfigError::io("config.write.persist", path, err.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_follows_extension() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.json")), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_path(Path::new("a.JSON")), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_path(Path::new("a.yaml")), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("config")), ConfigFormat::Yaml);
    }

    #[test]
    fn config_path_falls_back_to_default() {
        assert_eq!(
            resolve_config_path(None),
            PathBuf::from("/etc/ferry/config.yaml")
        );
        assert_eq!(
            resolve_config_path(Some("  ".into())),
            PathBuf::from("/etc/ferry/config.yaml")
        );
        assert_eq!(
            resolve_config_path(Some("/tmp/ferry.json".into())),
            PathBuf::from("/tmp/ferry.json")
        );
    }

    #[test]
    fn empty_yaml_document_uses_defaults() -> anyhow::Result<()> {
        let config = parse_str("{}", ConfigFormat::Yaml)?;
        assert_eq!(config, FerryConfig::default());
        Ok(())
    }

    #[test]
    fn malformed_json_is_reported() {
        let err = parse_str("{ nope", ConfigFormat::Json);
        assert!(matches!(err, Err(ConfigError::Json { .. })));
    }
}
