use std::fs;
use std::path::Path;

use ferry_config::{
    ConfigChange, ConfigError, ConfigService, ConnectionConfig, DownloadClientConfig,
    TransferConfig, TransportEndpoint, load_from_path,
};

const DOCUMENT: &str = r"
engine:
  tick_interval_secs: 5
download_clients:
  - name: home
    type: deluge
    host: localhost
    port: 8112
    password: deluge
  - name: box
    type: deluge
    host: seedbox
    port: 8112
    password: deluge
media_managers:
  - name: radarr
    type: radarr
    url: http://localhost:7878
    api_key: key
connections:
  - name: home-box
    from: home
    to: box
    transfer_config:
      from: { type: local }
      to: { type: local }
    source_dot_torrent_path: /state
    source_torrent_download_path: /downloads
    destination_dot_torrent_tmp_dir: /tmp/torrents
    destination_torrent_download_path: /media
";

fn write_document(dir: &Path) -> anyhow::Result<std::path::PathBuf> {
    let path = dir.join("ferry.yaml");
    fs::write(&path, DOCUMENT)?;
    Ok(path)
}

fn connection(name: &str, from: &str, to: &str) -> ConnectionConfig {
    ConnectionConfig {
        name: name.into(),
        from: from.into(),
        to: to.into(),
        max_concurrency: 1,
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

#[test]
fn yaml_document_loads_with_defaults() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = load_from_path(&write_document(dir.path())?)?;
    assert_eq!(config.engine.tick_interval_secs, 5);
    assert_eq!(config.engine.error_backoff_secs, 10);
    assert_eq!(config.connections[0].max_concurrency, 3);
    assert_eq!(config.logging.level, "info");
    Ok(())
}

#[test]
fn mutations_are_written_back() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_document(dir.path())?;
    let service = ConfigService::load(&path)?;

    let change = service.add_connection(connection("box-home", "box", "home"))?;
    assert!(matches!(change, ConfigChange::ConnectionAdded(_)));

    let reloaded = load_from_path(&path)?;
    assert_eq!(reloaded.connections.len(), 2);
    assert_eq!(reloaded, service.snapshot());
    Ok(())
}

#[test]
fn rejected_mutation_leaves_document_untouched() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = write_document(dir.path())?;
    let service = ConfigService::load(&path)?;

    let err = service.add_connection(connection("loop", "home", "home"));
    assert!(matches!(err, Err(ConfigError::InvalidField { .. })));
    let err = service.add_connection(connection("home-box", "box", "home"));
    assert!(matches!(err, Err(ConfigError::Duplicate { .. })));

    assert_eq!(service.snapshot().connections.len(), 1);
    assert_eq!(fs::read_to_string(&path)?, DOCUMENT);
    Ok(())
}

#[test]
fn removing_a_client_cascades_to_connections() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let service = ConfigService::load(write_document(dir.path())?)?;

    let change = service.remove_client("box")?;
    assert_eq!(
        change,
        ConfigChange::ClientRemoved {
            name: "box".into(),
            connections: vec!["home-box".into()],
        }
    );
    let snapshot = service.snapshot();
    assert!(snapshot.connections.is_empty());
    assert_eq!(snapshot.download_clients.len(), 1);
    Ok(())
}

#[test]
fn upserting_a_client_reports_dependent_connections() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let service = ConfigService::load(write_document(dir.path())?)?;

    let change = service.upsert_client(DownloadClientConfig {
        name: "home".into(),
        kind: "deluge".into(),
        host: "deluge.lan".into(),
        port: 8113,
        username: None,
        password: "new".into(),
        use_tls: false,
    })?;
    let ConfigChange::ClientUpserted { client, connections } = change else {
        anyhow::bail!("unexpected change kind");
    };
    assert_eq!(client.port, 8113);
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].name, "home-box");
    Ok(())
}

#[test]
fn update_and_remove_unknown_connection_fail() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let service = ConfigService::load(write_document(dir.path())?)?;
    assert!(matches!(
        service.remove_connection("ghost"),
        Err(ConfigError::NotFound { .. })
    ));
    assert!(matches!(
        service.update_connection("ghost", connection("ghost", "home", "box")),
        Err(ConfigError::NotFound { .. })
    ));
    let change = service.update_connection("home-box", connection("home-box", "home", "box"))?;
    assert!(matches!(change, ConfigChange::ConnectionUpdated { .. }));
    assert_eq!(service.snapshot().connections[0].max_concurrency, 1);
    Ok(())
}
