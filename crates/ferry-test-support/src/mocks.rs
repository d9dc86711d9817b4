//! In-memory download client and media manager.

use std::collections::BTreeMap;
use std::io;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use ferry_core::{
    AddTorrent, ClientError, ClientResult, ClientTorrentInfo, ConnectionTest,
    DownloadClientAdapter, ManagerError, ManagerResult, MediaManagerAdapter, MediaManagerKind,
    QueueEntry, TorrentId,
};
use tracing::error;

/// Failure mode injected into a [`FakeClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Every call fails with [`ClientError::Unreachable`].
    Unreachable,
    /// `ensure_connected` reports `false`; queries still fail.
    Disconnected,
}

#[derive(Default)]
struct ClientState {
    torrents: BTreeMap<TorrentId, ClientTorrentInfo>,
    added: Vec<AddTorrent>,
    removed: Vec<(TorrentId, bool)>,
    fault: Option<Fault>,
    add_label: Option<String>,
    hide_added: bool,
}

/// Download client that keeps torrents in memory.
///
/// Added torrents become visible as `Seeding` unless configured otherwise.
pub struct FakeClient {
    name: String,
    state: Mutex<ClientState>,
}

impl FakeClient {
    /// Empty client.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(ClientState::default()),
        }
    }

    /// Insert or replace a torrent.
    pub fn insert(&self, id: &str, info: ClientTorrentInfo) {
        self.lock().torrents.insert(TorrentId::new(id), info);
    }

    /// Change the native state label of a held torrent.
    pub fn set_state(&self, id: &str, label: &str) {
        if let Some(info) = self.lock().torrents.get_mut(&TorrentId::new(id)) {
            label.clone_into(&mut info.state);
        }
    }

    /// Drop a torrent without recording a removal.
    pub fn forget(&self, id: &str) {
        self.lock().torrents.remove(&TorrentId::new(id));
    }

    /// Whether the client holds `id`.
    #[must_use]
    pub fn holds(&self, id: &str) -> bool {
        self.lock().torrents.contains_key(&TorrentId::new(id))
    }

    /// Inject or clear a fault.
    pub fn set_fault(&self, fault: Option<Fault>) {
        self.lock().fault = fault;
    }

    /// Native label given to torrents registered through `add_torrent`.
    pub fn set_add_label(&self, label: impl Into<String>) {
        self.lock().add_label = Some(label.into());
    }

    /// When set, added torrents are recorded but not yet visible.
    pub fn hide_added(&self, hide: bool) {
        self.lock().hide_added = hide;
    }

    /// Every `add_torrent` request received.
    #[must_use]
    pub fn added(&self) -> Vec<AddTorrent> {
        self.lock().added.clone()
    }

    /// Every `remove_torrent` request received, with its `remove_data` flag.
    #[must_use]
    pub fn removed(&self) -> Vec<(TorrentId, bool)> {
        self.lock().removed.clone()
    }

    fn lock(&self) -> MutexGuard<'_, ClientState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("fake client lock poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }

    fn check(&self, operation: &'static str) -> ClientResult<MutexGuard<'_, ClientState>> {
        let guard = self.lock();
        match guard.fault {
            Some(Fault::Unreachable) => Err(ClientError::unreachable(
                self.name.clone(),
                operation,
                io::Error::other("connection refused"),
            )),
            Some(Fault::Disconnected) => Err(ClientError::NotConnected {
                client: self.name.clone(),
            }),
            None => Ok(guard),
        }
    }
}

#[async_trait]
impl DownloadClientAdapter for FakeClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &'static str {
        "fake"
    }

    async fn ensure_connected(&self) -> ClientResult<bool> {
        match self.lock().fault {
            Some(Fault::Unreachable) => Err(ClientError::unreachable(
                self.name.clone(),
                "ensure_connected",
                io::Error::other("connection refused"),
            )),
            Some(Fault::Disconnected) => Ok(false),
            None => Ok(true),
        }
    }

    async fn is_connected(&self) -> bool {
        self.lock().fault.is_none()
    }

    async fn get_info(&self, id: &TorrentId) -> ClientResult<Option<ClientTorrentInfo>> {
        Ok(self.check("get_info")?.torrents.get(id).cloned())
    }

    async fn add_torrent(&self, request: AddTorrent) -> ClientResult<()> {
        let mut state = self.check("add_torrent")?;
        if !state.hide_added {
            let label = state.add_label.clone().unwrap_or_else(|| "Seeding".to_owned());
            state.torrents.insert(
                request.id.clone(),
                ClientTorrentInfo {
                    name: request
                        .filename
                        .trim_end_matches(".torrent")
                        .to_owned(),
                    state: label,
                    progress: 100.0,
                    total_size: 0,
                    save_path: request.options.download_location.clone(),
                    files: Vec::new(),
                },
            );
        }
        state.added.push(request);
        Ok(())
    }

    async fn remove_torrent(&self, id: &TorrentId, remove_data: bool) -> ClientResult<bool> {
        let mut state = self.check("remove_torrent")?;
        state.removed.push((id.clone(), remove_data));
        Ok(state.torrents.remove(id).is_some())
    }

    async fn list_all(
        &self,
        _fields: &[&str],
    ) -> ClientResult<std::collections::HashMap<TorrentId, ClientTorrentInfo>> {
        Ok(self
            .check("list_all")?
            .torrents
            .iter()
            .map(|(id, info)| (id.clone(), info.clone()))
            .collect())
    }

    async fn test_connection(&self) -> ConnectionTest {
        match self.check("test_connection") {
            Ok(_) => ConnectionTest {
                success: true,
                message: format!("connected to {}", self.name),
            },
            Err(err) => ConnectionTest {
                success: false,
                message: err.to_string(),
            },
        }
    }
}

#[derive(Default)]
struct ManagerState {
    queue: Vec<QueueEntry>,
    failing: bool,
    panic_next: bool,
}

/// Media manager whose queue is edited directly by the test.
pub struct FakeManager {
    name: String,
    kind: MediaManagerKind,
    state: Mutex<ManagerState>,
}

impl FakeManager {
    /// Empty queue.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: MediaManagerKind) -> Self {
        Self {
            name: name.into(),
            kind,
            state: Mutex::new(ManagerState::default()),
        }
    }

    /// Append a queue item.
    pub fn push(&self, download_id: &str, title: &str) {
        self.lock().queue.push(QueueEntry {
            download_id: TorrentId::new(download_id),
            title: title.to_owned(),
        });
    }

    /// Remove an item, as if the import finished.
    pub fn clear(&self, download_id: &str) {
        let id = TorrentId::new(download_id);
        self.lock().queue.retain(|entry| entry.download_id != id);
    }

    /// Make `list_queue` fail.
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    /// Make the next `list_queue` call panic.
    pub fn panic_on_next_poll(&self) {
        self.lock().panic_next = true;
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("fake manager lock poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }
}

#[async_trait]
impl MediaManagerAdapter for FakeManager {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> MediaManagerKind {
        self.kind
    }

    async fn list_queue(&self) -> ManagerResult<Vec<QueueEntry>> {
        let mut state = self.lock();
        if std::mem::take(&mut state.panic_next) {
            drop(state);
            panic!("{} queue poll panicked", self.name);
        }
        if state.failing {
            return Err(ManagerError::Status {
                manager: self.name.clone(),
                operation: "list_queue",
                status: 503,
            });
        }
        Ok(state.queue.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::AddTorrentOptions;

    #[tokio::test]
    async fn added_torrents_become_visible() -> anyhow::Result<()> {
        let client = FakeClient::new("box");
        let id = TorrentId::new("abc");
        client
            .add_torrent(AddTorrent {
                id: id.clone(),
                filename: "abc.torrent".into(),
                metainfo_b64: String::new(),
                options: AddTorrentOptions::default(),
            })
            .await?;
        assert_eq!(client.get_native_state(&id).await?.as_deref(), Some("Seeding"));
        assert!(client.remove_torrent(&id, true).await?);
        assert_eq!(client.removed(), vec![(id, true)]);
        Ok(())
    }

    #[tokio::test]
    async fn faults_surface_as_connectivity_errors() {
        let client = FakeClient::new("home");
        client.set_fault(Some(Fault::Unreachable));
        let err = client.get_info(&TorrentId::new("abc")).await;
        assert!(err.is_err_and(|err| err.is_connectivity()));

        client.set_fault(Some(Fault::Disconnected));
        assert!(matches!(client.ensure_connected().await, Ok(false)));
    }

    #[tokio::test]
    async fn manager_queue_can_be_cleared() -> anyhow::Result<()> {
        let manager = FakeManager::new("radarr", MediaManagerKind::Radarr);
        manager.push("ABC", "Movie");
        assert!(!manager.is_job_cleared(&TorrentId::new("abc")).await?);
        manager.clear("abc");
        assert!(manager.is_job_cleared(&TorrentId::new("abc")).await?);
        Ok(())
    }
}
