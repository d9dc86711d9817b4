//! Deluge adapter speaking the Web UI JSON-RPC protocol.
//!
//! Every call is a `POST {base}/json` carrying `{method, params, id}`. The web
//! UI authenticates with a session cookie and proxies `core.*` calls to a
//! daemon it must be connected to; both steps are serialised behind the
//! adapter's own session lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ferry_core::{
    AddTorrent, ClientError, ClientFile, ClientResult, ClientTorrentInfo, ConnectionTest,
    DownloadClientAdapter, TorrentId,
};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const KIND: &str = "deluge";
/// Deluge error code for an expired or missing session.
const AUTH_ERROR_CODE: i64 = 1;
const STATUS_FIELDS: &[&str] = &["name", "state", "progress", "total_size", "save_path", "files"];

#[derive(Debug, Default)]
struct SessionState {
    authenticated: bool,
    connected: bool,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct DelugeStatus {
    #[serde(default)]
    name: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    total_size: u64,
    #[serde(default)]
    save_path: Option<String>,
    #[serde(default)]
    files: Vec<DelugeFile>,
}

#[derive(Debug, Deserialize)]
struct DelugeFile {
    path: String,
    #[serde(default)]
    size: u64,
}

impl From<DelugeStatus> for ClientTorrentInfo {
    fn from(status: DelugeStatus) -> Self {
        Self {
            name: status.name,
            state: status.state,
            progress: status.progress,
            total_size: status.total_size,
            save_path: status.save_path,
            files: status
                .files
                .into_iter()
                .map(|file| ClientFile {
                    path: file.path,
                    size: file.size,
                })
                .collect(),
        }
    }
}

/// Download client backed by a Deluge Web UI.
pub struct DelugeClient {
    name: String,
    endpoint: String,
    password: String,
    http: Client,
    session: Mutex<SessionState>,
    next_id: AtomicU64,
}

impl DelugeClient {
    /// Build an adapter for the web UI at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(
        name: impl Into<String>,
        base_url: &str,
        password: impl Into<String>,
        timeout: Duration,
    ) -> ClientResult<Self> {
        let name = name.into();
        let http = Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()
            .map_err(|err| ClientError::unreachable(name.clone(), "deluge.build", err))?;
        Ok(Self {
            endpoint: format!("{}/json", base_url.trim_end_matches('/')),
            name,
            password: password.into(),
            http,
            session: Mutex::new(SessionState::default()),
            next_id: AtomicU64::new(1),
        })
    }

    async fn raw_call(&self, method: &'static str, params: &Value) -> ClientResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "method": method, "params": params, "id": id });
        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| self.transport_error(method, err))?;
        let payload: RpcResponse = response.json().await.map_err(|_| {
            ClientError::malformed(self.name.clone(), method, "invalid rpc envelope")
        })?;
        if let Some(error) = payload.error {
            return Err(ClientError::Rpc {
                client: self.name.clone(),
                method,
                code: error.code,
                message: error.message,
            });
        }
        Ok(payload.result)
    }

    fn transport_error(&self, method: &'static str, err: reqwest::Error) -> ClientError {
        if err.is_timeout() {
            ClientError::Timeout {
                client: self.name.clone(),
                operation: method,
            }
        } else {
            ClientError::unreachable(self.name.clone(), method, err)
        }
    }

    async fn login(&self, session: &mut SessionState) -> ClientResult<()> {
        let result = self
            .raw_call("auth.login", &json!([self.password]))
            .await?;
        if result.as_bool() != Some(true) {
            session.authenticated = false;
            return Err(ClientError::Authentication {
                client: self.name.clone(),
            });
        }
        session.authenticated = true;
        debug!(client = %self.name, "deluge session authenticated");
        Ok(())
    }

    async fn connect_daemon(&self) -> ClientResult<bool> {
        if self.raw_call("web.connected", &json!([])).await?.as_bool() == Some(true) {
            return Ok(true);
        }
        let hosts = self.raw_call("web.get_hosts", &json!([])).await?;
        let Some(host_id) = hosts
            .as_array()
            .and_then(|hosts| hosts.first())
            .and_then(|host| host.get(0))
            .and_then(Value::as_str)
            .map(str::to_owned)
        else {
            warn!(client = %self.name, "deluge web ui has no daemon hosts configured");
            return Ok(false);
        };
        self.raw_call("web.connect", &json!([host_id])).await?;
        Ok(self.raw_call("web.connected", &json!([])).await?.as_bool() == Some(true))
    }

    async fn invalidate_session(&self) {
        let mut session = self.session.lock().await;
        *session = SessionState::default();
    }

    /// Invoke a daemon method, re-authenticating once when the session expired.
    async fn call(&self, method: &'static str, params: Value) -> ClientResult<Value> {
        if !self.ensure_connected().await? {
            return Err(ClientError::NotConnected {
                client: self.name.clone(),
            });
        }
        match self.raw_call(method, &params).await {
            Err(ClientError::Rpc {
                code: Some(AUTH_ERROR_CODE),
                ..
            }) => {
                info!(client = %self.name, method, "deluge session expired; re-authenticating");
                self.invalidate_session().await;
                if !self.ensure_connected().await? {
                    return Err(ClientError::NotConnected {
                        client: self.name.clone(),
                    });
                }
                self.raw_call(method, &params).await
            }
            Err(err) if err.is_connectivity() => {
                self.invalidate_session().await;
                Err(err)
            }
            other => other,
        }
    }

    fn parse_status(
        &self,
        operation: &'static str,
        value: Value,
    ) -> ClientResult<Option<ClientTorrentInfo>> {
        let map: Map<String, Value> = match value {
            Value::Object(map) => map,
            Value::Null => return Ok(None),
            _ => {
                return Err(ClientError::malformed(
                    self.name.clone(),
                    operation,
                    "status is not an object",
                ));
            }
        };
        if map.is_empty() {
            return Ok(None);
        }
        let status: DelugeStatus = serde_json::from_value(Value::Object(map)).map_err(|_| {
            ClientError::malformed(self.name.clone(), operation, "unexpected status shape")
        })?;
        Ok(Some(status.into()))
    }
}

#[async_trait]
impl DownloadClientAdapter for DelugeClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        KIND
    }

    async fn ensure_connected(&self) -> ClientResult<bool> {
        let mut session = self.session.lock().await;
        if session.connected {
            return Ok(true);
        }
        if !session.authenticated {
            self.login(&mut session).await?;
        }
        let connected = self.connect_daemon().await?;
        session.connected = connected;
        if connected {
            info!(client = %self.name, "deluge daemon connected");
        }
        Ok(connected)
    }

    async fn is_connected(&self) -> bool {
        self.session.lock().await.connected
    }

    async fn has_torrent(&self, id: &TorrentId) -> ClientResult<bool> {
        let result = self
            .call("core.get_torrent_status", json!([id.as_str(), ["name"]]))
            .await?;
        Ok(result.as_object().is_some_and(|map| !map.is_empty()))
    }

    async fn get_info(&self, id: &TorrentId) -> ClientResult<Option<ClientTorrentInfo>> {
        let result = self
            .call("core.get_torrent_status", json!([id.as_str(), STATUS_FIELDS]))
            .await?;
        self.parse_status("core.get_torrent_status", result)
    }

    async fn get_native_state(&self, id: &TorrentId) -> ClientResult<Option<String>> {
        let result = self
            .call("core.get_torrent_status", json!([id.as_str(), ["state"]]))
            .await?;
        Ok(result
            .get("state")
            .and_then(Value::as_str)
            .map(str::to_owned))
    }

    async fn add_torrent(&self, request: AddTorrent) -> ClientResult<()> {
        let mut options = Map::new();
        if let Some(location) = request.options.download_location.as_ref() {
            options.insert("download_location".into(), json!(location));
        }
        options.insert("add_paused".into(), json!(request.options.add_paused));
        let params = json!([request.filename, request.metainfo_b64, options]);
        match self.call("core.add_torrent_file", params).await {
            Ok(_) => {
                info!(client = %self.name, torrent_id = %request.id, "torrent registered");
                Ok(())
            }
            Err(ClientError::Rpc { message, .. })
                if message.to_ascii_lowercase().contains("already") =>
            {
                debug!(client = %self.name, torrent_id = %request.id, "torrent already registered");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn remove_torrent(&self, id: &TorrentId, remove_data: bool) -> ClientResult<bool> {
        let result = self
            .call("core.remove_torrent", json!([id.as_str(), remove_data]))
            .await?;
        Ok(result.as_bool().unwrap_or(false))
    }

    async fn list_all(
        &self,
        fields: &[&str],
    ) -> ClientResult<HashMap<TorrentId, ClientTorrentInfo>> {
        let fields = if fields.is_empty() { STATUS_FIELDS } else { fields };
        let result = self
            .call("core.get_torrents_status", json!([{}, fields]))
            .await?;
        let Value::Object(map) = result else {
            return Err(ClientError::malformed(
                self.name.clone(),
                "core.get_torrents_status",
                "result is not an object",
            ));
        };
        let mut torrents = HashMap::with_capacity(map.len());
        for (hash, status) in map {
            if let Some(info) = self.parse_status("core.get_torrents_status", status)? {
                torrents.insert(TorrentId::new(hash), info);
            }
        }
        Ok(torrents)
    }

    async fn test_connection(&self) -> ConnectionTest {
        let outcome = async {
            if !self.ensure_connected().await? {
                return Err(ClientError::NotConnected {
                    client: self.name.clone(),
                });
            }
            self.call("daemon.info", json!([])).await
        }
        .await;
        match outcome {
            Ok(version) => ConnectionTest {
                success: true,
                message: format!(
                    "connected to deluge {}",
                    version.as_str().unwrap_or("(unknown version)")
                ),
            },
            Err(err) => ConnectionTest {
                success: false,
                message: err.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn client(server: &MockServer) -> anyhow::Result<DelugeClient> {
        Ok(DelugeClient::new(
            "home",
            &server.base_url(),
            "deluge",
            Duration::from_secs(5),
        )?)
    }

    fn mock_session(server: &MockServer) {
        server.mock(|when, then| {
            when.method(POST)
                .path("/json")
                .body_includes("\"auth.login\"");
            then.status(200)
                .json_body(json!({"result": true, "error": null, "id": 1}));
        });
        server.mock(|when, then| {
            when.method(POST)
                .path("/json")
                .body_includes("\"web.connected\"");
            then.status(200)
                .json_body(json!({"result": true, "error": null, "id": 2}));
        });
    }

    #[tokio::test]
    async fn get_info_maps_status_and_files() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        mock_session(&server);
        server.mock(|when, then| {
            when.method(POST)
                .path("/json")
                .body_includes("\"core.get_torrent_status\"");
            then.status(200).json_body(json!({
                "result": {
                    "name": "Movie.2024",
                    "state": "Seeding",
                    "progress": 100.0,
                    "total_size": 2048,
                    "save_path": "/downloads",
                    "files": [
                        {"index": 0, "path": "Movie.2024/movie.mkv", "size": 2000, "offset": 0},
                        {"index": 1, "path": "Movie.2024/movie.nfo", "size": 48, "offset": 2000}
                    ]
                },
                "error": null,
                "id": 3
            }));
        });

        let deluge = client(&server)?;
        let info = deluge
            .get_info(&TorrentId::new("ABCDEF"))
            .await?
            .ok_or_else(|| anyhow::anyhow!("expected status"))?;
        assert_eq!(info.state, "Seeding");
        assert_eq!(info.files.len(), 2);
        assert_eq!(info.top_level_segments(), vec!["Movie.2024"]);
        assert!(deluge.is_connected().await);
        Ok(())
    }

    #[tokio::test]
    async fn empty_status_means_missing() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        mock_session(&server);
        server.mock(|when, then| {
            when.method(POST)
                .path("/json")
                .body_includes("\"core.get_torrent_status\"");
            then.status(200)
                .json_body(json!({"result": {}, "error": null, "id": 3}));
        });

        let deluge = client(&server)?;
        let id = TorrentId::new("abc");
        assert!(deluge.get_info(&id).await?.is_none());
        assert!(!deluge.has_torrent(&id).await?);
        assert_eq!(deluge.get_native_state(&id).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn rejected_login_is_an_authentication_error() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST)
                .path("/json")
                .body_includes("\"auth.login\"");
            then.status(200)
                .json_body(json!({"result": false, "error": null, "id": 1}));
        });

        let deluge = client(&server)?;
        let err = deluge.ensure_connected().await;
        assert!(matches!(err, Err(ClientError::Authentication { .. })));
        assert!(err.is_err_and(|err| err.is_connectivity()));
        assert!(!deluge.is_connected().await);
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_host_is_connectivity_error() -> anyhow::Result<()> {
        let deluge = DelugeClient::new(
            "offline",
            "http://127.0.0.1:9",
            "deluge",
            Duration::from_millis(500),
        )?;
        let err = deluge.has_torrent(&TorrentId::new("abc")).await;
        assert!(err.is_err_and(|err| err.is_connectivity()));
        Ok(())
    }

    #[tokio::test]
    async fn disconnected_web_ui_connects_first_host() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST)
                .path("/json")
                .body_includes("\"auth.login\"");
            then.status(200)
                .json_body(json!({"result": true, "error": null, "id": 1}));
        });
        server.mock(|when, then| {
            when.method(POST)
                .path("/json")
                .body_includes("\"web.connected\"");
            then.status(200)
                .json_body(json!({"result": false, "error": null, "id": 2}));
        });
        let get_hosts = server.mock(|when, then| {
            when.method(POST)
                .path("/json")
                .body_includes("\"web.get_hosts\"");
            then.status(200).json_body(json!({
                "result": [["host-1", "127.0.0.1", 58846, "Online"]],
                "error": null,
                "id": 3
            }));
        });
        let connect = server.mock(|when, then| {
            when.method(POST)
                .path("/json")
                .body_includes("\"web.connect\"")
                .body_includes("host-1");
            then.status(200)
                .json_body(json!({"result": null, "error": null, "id": 4}));
        });

        let deluge = client(&server)?;
        assert!(!deluge.ensure_connected().await?);
        get_hosts.assert();
        connect.assert();
        Ok(())
    }

    #[tokio::test]
    async fn add_torrent_sends_metadata_and_location() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        mock_session(&server);
        let add = server.mock(|when, then| {
            when.method(POST)
                .path("/json")
                .body_includes("\"core.add_torrent_file\"")
                .body_includes("\"download_location\":\"/media\"")
                .body_includes("ZGF0YQ==");
            then.status(200)
                .json_body(json!({"result": "abc", "error": null, "id": 3}));
        });

        let deluge = client(&server)?;
        deluge
            .add_torrent(AddTorrent {
                id: TorrentId::new("abc"),
                filename: "abc.torrent".into(),
                metainfo_b64: "ZGF0YQ==".into(),
                options: ferry_core::AddTorrentOptions {
                    download_location: Some("/media".into()),
                    add_paused: false,
                },
            })
            .await?;
        add.assert();
        Ok(())
    }

    #[tokio::test]
    async fn list_all_keys_by_lowercase_hash() -> anyhow::Result<()> {
        let server = MockServer::start_async().await;
        mock_session(&server);
        server.mock(|when, then| {
            when.method(POST)
                .path("/json")
                .body_includes("\"core.get_torrents_status\"");
            then.status(200).json_body(json!({
                "result": {
                    "ABC": {"name": "one", "state": "Seeding"},
                    "def": {"name": "two", "state": "Downloading"}
                },
                "error": null,
                "id": 3
            }));
        });

        let deluge = client(&server)?;
        let all = deluge.list_all(&["name", "state"]).await?;
        assert_eq!(all.len(), 2);
        assert_eq!(all[&TorrentId::new("abc")].name, "one");
        Ok(())
    }
}
