//! Adapter and sink traits implemented outside this crate.

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{ClientResult, ManagerResult};
use crate::model::{
    AddTorrent, ClientTorrentInfo, ConnectionTest, MediaManagerKind, QueueEntry, Torrent,
    TorrentId, TransferDescriptor,
};

/// Capability interface implemented by every download-client variant.
#[async_trait]
pub trait DownloadClientAdapter: Send + Sync {
    /// Configured client name; unique across the registry.
    fn name(&self) -> &str;

    /// Type tag, e.g. `deluge`.
    fn kind(&self) -> &'static str;

    /// Connect if necessary; returns whether a usable connection exists.
    async fn ensure_connected(&self) -> ClientResult<bool>;

    /// Whether the adapter currently holds a usable connection.
    async fn is_connected(&self) -> bool;

    /// Whether the client reports the torrent.
    async fn has_torrent(&self, id: &TorrentId) -> ClientResult<bool> {
        Ok(self.get_info(id).await?.is_some())
    }

    /// Current view of the torrent, or `None` when the client lacks it.
    async fn get_info(&self, id: &TorrentId) -> ClientResult<Option<ClientTorrentInfo>>;

    /// Native state label of the torrent, or `None` when the client lacks it.
    async fn get_native_state(&self, id: &TorrentId) -> ClientResult<Option<String>> {
        Ok(self.get_info(id).await?.map(|info| info.state))
    }

    /// Register a torrent from its metadata.
    async fn add_torrent(&self, request: AddTorrent) -> ClientResult<()>;

    /// Remove a torrent, optionally deleting its payload. Returns whether it existed.
    async fn remove_torrent(&self, id: &TorrentId, remove_data: bool) -> ClientResult<bool>;

    /// Every torrent the client knows about, restricted to `fields` where supported.
    async fn list_all(&self, fields: &[&str])
    -> ClientResult<HashMap<TorrentId, ClientTorrentInfo>>;

    /// Manual connectivity probe.
    async fn test_connection(&self) -> ConnectionTest;
}

/// Capability interface implemented by every media-manager variant.
#[async_trait]
pub trait MediaManagerAdapter: Send + Sync {
    /// Configured manager name.
    fn name(&self) -> &str;

    /// Type tag.
    fn kind(&self) -> MediaManagerKind;

    /// Full queue across all pages.
    async fn list_queue(&self) -> ManagerResult<Vec<QueueEntry>>;

    /// True once the queue no longer contains the download id.
    async fn is_job_cleared(&self, download_id: &TorrentId) -> ManagerResult<bool> {
        let queue = self.list_queue().await?;
        Ok(!queue.iter().any(|entry| &entry.download_id == download_id))
    }
}

/// Fire-and-forget transfer history collaborator.
///
/// Callers log failures and carry on; a history outage never fails a transfer.
pub trait TransferHistory: Send + Sync {
    /// Create a record and return its identifier.
    ///
    /// # Errors
    ///
    /// Returns an error when the record cannot be created.
    fn create(&self, descriptor: &TransferDescriptor) -> anyhow::Result<Uuid>;

    /// Mark the transfer as started.
    ///
    /// # Errors
    ///
    /// Returns an error when the record cannot be updated.
    fn start(&self, transfer_id: Uuid) -> anyhow::Result<()>;

    /// Record cumulative bytes moved. `force` bypasses any sink-side throttling.
    ///
    /// # Errors
    ///
    /// Returns an error when the record cannot be updated.
    fn update_progress(&self, transfer_id: Uuid, bytes: u64, force: bool) -> anyhow::Result<()>;

    /// Mark the transfer as completed.
    ///
    /// # Errors
    ///
    /// Returns an error when the record cannot be updated.
    fn complete(&self, transfer_id: Uuid) -> anyhow::Result<()>;

    /// Mark the transfer as failed.
    ///
    /// # Errors
    ///
    /// Returns an error when the record cannot be updated.
    fn fail(&self, transfer_id: Uuid, reason: &str) -> anyhow::Result<()>;
}

/// History sink that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHistory;

impl TransferHistory for NoopHistory {
    fn create(&self, _descriptor: &TransferDescriptor) -> anyhow::Result<Uuid> {
        Ok(Uuid::new_v4())
    }

    fn start(&self, _transfer_id: Uuid) -> anyhow::Result<()> {
        Ok(())
    }

    fn update_progress(&self, _transfer_id: Uuid, _bytes: u64, _force: bool) -> anyhow::Result<()> {
        Ok(())
    }

    fn complete(&self, _transfer_id: Uuid) -> anyhow::Result<()> {
        Ok(())
    }

    fn fail(&self, _transfer_id: Uuid, _reason: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Persistence hook fired by the catalog after every state change.
pub trait SnapshotSink: Send + Sync {
    /// Persist the full tracked set.
    ///
    /// # Errors
    ///
    /// Returns an error when the snapshot cannot be written.
    fn persist(&self, torrents: &[Torrent]) -> anyhow::Result<()>;
}
