//! Structural validation of a configuration document.

use std::collections::HashSet;

use url::Url;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{
    ConnectionConfig, DownloadClientConfig, FerryConfig, MediaManagerConfig, TransportEndpoint,
};

const CLIENT_TYPES: &[&str] = &["deluge"];
const MANAGER_TYPES: &[&str] = &["radarr", "sonarr"];

/// Validate the whole document.
///
/// # Errors
///
/// Returns the first violation found.
pub fn validate(config: &FerryConfig) -> ConfigResult<()> {
    validate_engine(config)?;
    unique_names("download_clients", config.download_clients.iter().map(|c| c.name.as_str()))?;
    unique_names("media_managers", config.media_managers.iter().map(|m| m.name.as_str()))?;
    unique_names("connections", config.connections.iter().map(|c| c.name.as_str()))?;

    for client in &config.download_clients {
        validate_client(client)?;
    }
    for manager in &config.media_managers {
        validate_manager(manager)?;
    }
    for connection in &config.connections {
        validate_connection(config, connection)?;
    }
    Ok(())
}

fn validate_engine(config: &FerryConfig) -> ConfigResult<()> {
    let engine = &config.engine;
    if engine.tick_interval_secs == 0 {
        return Err(ConfigError::invalid(
            "engine",
            None,
            "tick_interval_secs",
            "must be positive",
            Some("0".into()),
        ));
    }
    if engine.request_timeout_secs == 0 {
        return Err(ConfigError::invalid(
            "engine",
            None,
            "request_timeout_secs",
            "must be positive",
            Some("0".into()),
        ));
    }
    if engine.state_file.as_os_str().is_empty() {
        return Err(ConfigError::invalid(
            "engine",
            None,
            "state_file",
            "must not be empty",
            None,
        ));
    }
    Ok(())
}

fn unique_names<'a>(
    section: &'static str,
    names: impl Iterator<Item = &'a str>,
) -> ConfigResult<()> {
    let mut seen = HashSet::new();
    for name in names {
        if name.trim().is_empty() {
            return Err(ConfigError::invalid(section, None, "name", "must not be empty", None));
        }
        if !seen.insert(name) {
            return Err(ConfigError::Duplicate {
                section,
                name: name.to_owned(),
            });
        }
    }
    Ok(())
}

pub(crate) fn validate_client(client: &DownloadClientConfig) -> ConfigResult<()> {
    let entry = Some(client.name.as_str());
    if !CLIENT_TYPES.contains(&client.kind.to_ascii_lowercase().as_str()) {
        return Err(ConfigError::invalid(
            "download_clients",
            entry,
            "type",
            "unsupported download client type",
            Some(client.kind.clone()),
        ));
    }
    if client.host.trim().is_empty() {
        return Err(ConfigError::invalid(
            "download_clients",
            entry,
            "host",
            "must not be empty",
            None,
        ));
    }
    if client.port == 0 {
        return Err(ConfigError::invalid(
            "download_clients",
            entry,
            "port",
            "must be between 1 and 65535",
            Some("0".into()),
        ));
    }
    Ok(())
}

fn validate_manager(manager: &MediaManagerConfig) -> ConfigResult<()> {
    let entry = Some(manager.name.as_str());
    if !MANAGER_TYPES.contains(&manager.kind.to_ascii_lowercase().as_str()) {
        return Err(ConfigError::invalid(
            "media_managers",
            entry,
            "type",
            "unsupported media manager type",
            Some(manager.kind.clone()),
        ));
    }
    if Url::parse(&manager.url).is_err() {
        return Err(ConfigError::invalid(
            "media_managers",
            entry,
            "url",
            "must be an absolute url",
            Some(manager.url.clone()),
        ));
    }
    if manager.api_key.trim().is_empty() {
        return Err(ConfigError::invalid(
            "media_managers",
            entry,
            "api_key",
            "must not be empty",
            None,
        ));
    }
    Ok(())
}

pub(crate) fn validate_connection(
    config: &FerryConfig,
    connection: &ConnectionConfig,
) -> ConfigResult<()> {
    let entry = Some(connection.name.as_str());
    for (field, value) in [("from", &connection.from), ("to", &connection.to)] {
        if config.client(value).is_none() {
            return Err(ConfigError::UnknownReference {
                connection: connection.name.clone(),
                field,
                value: value.clone(),
            });
        }
    }
    if connection.from == connection.to {
        return Err(ConfigError::invalid(
            "connections",
            entry,
            "to",
            "must differ from the home client",
            Some(connection.to.clone()),
        ));
    }
    if connection.max_concurrency == 0 {
        return Err(ConfigError::invalid(
            "connections",
            entry,
            "max_concurrency",
            "must be at least 1",
            Some("0".into()),
        ));
    }
    for (field, value) in [
        ("source_dot_torrent_path", &connection.source_dot_torrent_path),
        (
            "source_torrent_download_path",
            &connection.source_torrent_download_path,
        ),
        (
            "destination_dot_torrent_tmp_dir",
            &connection.destination_dot_torrent_tmp_dir,
        ),
        (
            "destination_torrent_download_path",
            &connection.destination_torrent_download_path,
        ),
    ] {
        if value.trim().is_empty() {
            return Err(ConfigError::invalid(
                "connections",
                entry,
                field,
                "must not be empty",
                None,
            ));
        }
    }
    validate_endpoint(entry, "transfer_config.from", &connection.transfer_config.from)?;
    validate_endpoint(entry, "transfer_config.to", &connection.transfer_config.to)
}

fn validate_endpoint(
    entry: Option<&str>,
    field: &'static str,
    endpoint: &TransportEndpoint,
) -> ConfigResult<()> {
    let TransportEndpoint::Sftp(sftp) = endpoint else {
        return Ok(());
    };
    if sftp.host.trim().is_empty() {
        return Err(ConfigError::invalid(
            "connections",
            entry,
            field,
            "sftp host must not be empty",
            None,
        ));
    }
    if sftp.port == 0 {
        return Err(ConfigError::invalid(
            "connections",
            entry,
            field,
            "sftp port must be between 1 and 65535",
            Some("0".into()),
        ));
    }
    if sftp.username.trim().is_empty() {
        return Err(ConfigError::invalid(
            "connections",
            entry,
            field,
            "sftp username must not be empty",
            None,
        ));
    }
    if sftp.password.is_none() && sftp.private_key.is_none() {
        return Err(ConfigError::invalid(
            "connections",
            entry,
            field,
            "sftp needs a password or private key",
            None,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SftpEndpoint, TransferConfig};

    fn client(name: &str) -> DownloadClientConfig {
        DownloadClientConfig {
            name: name.into(),
            kind: "deluge".into(),
            host: "localhost".into(),
            port: 8112,
            username: None,
            password: "deluge".into(),
            use_tls: false,
        }
    }

    fn connection(from: &str, to: &str) -> ConnectionConfig {
        ConnectionConfig {
            name: format!("{from}-{to}"),
            from: from.into(),
            to: to.into(),
            max_concurrency: 3,
            transfer_config: TransferConfig {
                from: TransportEndpoint::Local,
                to: TransportEndpoint::Local,
            },
            source_dot_torrent_path: "/state".into(),
            source_torrent_download_path: "/downloads".into(),
            destination_dot_torrent_tmp_dir: "/tmp/torrents".into(),
            destination_torrent_download_path: "/media".into(),
        }
    }

    fn config() -> FerryConfig {
        FerryConfig {
            download_clients: vec![client("home"), client("box")],
            connections: vec![connection("home", "box")],
            ..FerryConfig::default()
        }
    }

    #[test]
    fn valid_document_passes() {
        assert!(validate(&config()).is_ok());
    }

    #[test]
    fn duplicate_client_names_are_rejected() {
        let mut doc = config();
        doc.download_clients.push(client("home"));
        assert!(matches!(
            validate(&doc),
            Err(ConfigError::Duplicate {
                section: "download_clients",
                ..
            })
        ));
    }

    #[test]
    fn connections_must_reference_known_clients() {
        let mut doc = config();
        doc.connections[0].to = "ghost".into();
        assert!(matches!(
            validate(&doc),
            Err(ConfigError::UnknownReference { field: "to", .. })
        ));
    }

    #[test]
    fn self_loops_and_zero_concurrency_are_rejected() {
        let mut doc = config();
        doc.connections[0].to = "home".into();
        assert!(matches!(
            validate(&doc),
            Err(ConfigError::InvalidField { field: "to", .. })
        ));

        let mut doc = config();
        doc.connections[0].max_concurrency = 0;
        assert!(matches!(
            validate(&doc),
            Err(ConfigError::InvalidField {
                field: "max_concurrency",
                ..
            })
        ));
    }

    #[test]
    fn sftp_endpoints_need_credentials() {
        let mut doc = config();
        doc.connections[0].transfer_config.to = TransportEndpoint::Sftp(SftpEndpoint {
            host: "seedbox".into(),
            port: 22,
            username: "ferry".into(),
            password: None,
            private_key: None,
        });
        assert!(matches!(
            validate(&doc),
            Err(ConfigError::InvalidField {
                field: "transfer_config.to",
                ..
            })
        ));
    }

    #[test]
    fn unsupported_types_are_rejected() {
        let mut doc = config();
        doc.download_clients[0].kind = "rtorrent".into();
        assert!(validate(&doc).is_err());

        let mut doc = config();
        doc.media_managers.push(MediaManagerConfig {
            name: "lidarr".into(),
            kind: "lidarr".into(),
            url: "http://lidarr:8686".into(),
            api_key: "key".into(),
        });
        assert!(validate(&doc).is_err());
    }
}
