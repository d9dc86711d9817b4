//! Bounded per-route transfer pool.
//!
//! # Design
//!
//! - Jobs are spawned on enqueue and park on a semaphore; a job flips its
//!   torrent to `COPYING` only once it holds a permit, so the number of
//!   `COPYING` torrents on a route never exceeds `max_concurrency`.
//! - The flip is refused unless the torrent is still `HOME_SEEDING` (or
//!   already `COPYING` after a restart); the reconciler may have moved it
//!   while the job waited.
//! - The active map is keyed by torrent id. A drop guard removes the entry
//!   when the job task ends for any reason, including a panic.
//! - Transport calls are blocking and run on `spawn_blocking`.
//! - Failures record `ERROR` with a reason and stop; nothing is rolled back.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use ferry_config::ConnectionConfig;
use ferry_core::{
    AddTorrent, AddTorrentOptions, ClientPhase, ClientRegistry, ClientSide, Torrent,
    TorrentCatalog, TorrentId, TorrentState, TransferDescriptor, TransferHistory,
    TransferTelemetry,
};
use ferry_events::{Event, EventBus};
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{TransferError, TransferResult};
use crate::progress::{DEFAULT_PROGRESS_INTERVAL, ProgressRecorder};
use crate::transport::{Transport, build_transport};

/// Result of [`TransferEngine::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A job was spawned.
    Accepted,
    /// The id already has a job on this route.
    AlreadyActive,
    /// The engine is shutting down.
    Closed,
}

/// Bookkeeping for one active job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTransfer {
    /// When the job was accepted.
    pub enqueued_at: DateTime<Utc>,
    /// When the job obtained a slot.
    pub started_at: Option<DateTime<Utc>>,
    /// History record of the running attempt.
    pub transfer_id: Option<Uuid>,
}

/// Shared collaborators handed to every engine.
#[derive(Clone)]
pub struct EngineDeps {
    /// Tracked torrents.
    pub catalog: Arc<TorrentCatalog>,
    /// Download clients by name.
    pub clients: Arc<ClientRegistry>,
    /// Transfer history sink.
    pub history: Arc<dyn TransferHistory>,
    /// Event bus for queue notifications.
    pub events: EventBus,
}

/// Pipeline stage, used for logging and failure reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepKind {
    LocateMetadata,
    ReadMetadata,
    StageMetadata,
    CopyPayload,
    RegisterTarget,
    ConfirmTarget,
}

impl StepKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::LocateMetadata => "locate_metadata",
            Self::ReadMetadata => "read_metadata",
            Self::StageMetadata => "stage_metadata",
            Self::CopyPayload => "copy_payload",
            Self::RegisterTarget => "register_target",
            Self::ConfirmTarget => "confirm_target",
        }
    }
}

struct StepFailure {
    step: StepKind,
    error: TransferError,
}

impl StepFailure {
    fn reason(&self) -> String {
        format!("{}: {}", self.step.as_str(), self.error.reason())
    }
}

trait AtStep<T> {
    fn at(self, step: StepKind) -> Result<T, StepFailure>;
}

impl<T> AtStep<T> for TransferResult<T> {
    fn at(self, step: StepKind) -> Result<T, StepFailure> {
        self.map_err(|error| StepFailure { step, error })
    }
}

/// Transfer pool bound to one route.
#[derive(Clone)]
pub struct TransferEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    route: ConnectionConfig,
    transport: Arc<dyn Transport>,
    deps: EngineDeps,
    permits: Arc<Semaphore>,
    max_concurrency: usize,
    active: Mutex<HashMap<TorrentId, ActiveTransfer>>,
    drained: Notify,
    closed: AtomicBool,
    progress_interval: Duration,
}

impl TransferEngine {
    /// Engine for `route` using the transport selected by its endpoint pair.
    #[must_use]
    pub fn new(route: ConnectionConfig, deps: EngineDeps) -> Self {
        let transport = build_transport(&route.transfer_config.from, &route.transfer_config.to);
        Self::with_transport(route, deps, transport)
    }

    /// Engine with an explicit transport.
    #[must_use]
    pub fn with_transport(
        route: ConnectionConfig,
        deps: EngineDeps,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let max_concurrency = route.max_concurrency.max(1);
        info!(
            route = %route.name,
            from = %route.from,
            to = %route.to,
            transport = transport.kind(),
            max_concurrency,
            "transfer engine ready"
        );
        Self {
            inner: Arc::new(EngineInner {
                route,
                transport,
                deps,
                permits: Arc::new(Semaphore::new(max_concurrency)),
                max_concurrency,
                active: Mutex::new(HashMap::new()),
                drained: Notify::new(),
                closed: AtomicBool::new(false),
                progress_interval: DEFAULT_PROGRESS_INTERVAL,
            }),
        }
    }

    /// Route this engine serves.
    #[must_use]
    pub fn route(&self) -> &ConnectionConfig {
        &self.inner.route
    }

    /// Slot count.
    #[must_use]
    pub fn max_concurrency(&self) -> usize {
        self.inner.max_concurrency
    }

    /// Submit `id` for transfer. Idempotent while a job for `id` is active.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn enqueue(&self, id: TorrentId) -> EnqueueOutcome {
        if self.inner.closed.load(Ordering::Acquire) {
            return EnqueueOutcome::Closed;
        }
        {
            let mut active = self.inner.lock_active();
            if active.contains_key(&id) {
                return EnqueueOutcome::AlreadyActive;
            }
            active.insert(
                id.clone(),
                ActiveTransfer {
                    enqueued_at: Utc::now(),
                    started_at: None,
                    transfer_id: None,
                },
            );
        }
        debug!(route = %self.inner.route.name, torrent_id = %id, "transfer queued");
        self.inner.deps.events.publish(Event::TransferQueued {
            torrent_id: id.to_string(),
            route: self.inner.route.name.clone(),
        });

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let _guard = ActiveGuard {
                inner: Arc::clone(&inner),
                id: id.clone(),
            };
            let Ok(permit) = Arc::clone(&inner.permits).acquire_owned().await else {
                return;
            };
            inner.run_job(&id).await;
            drop(permit);
        });
        EnqueueOutcome::Accepted
    }

    /// Whether `id` has a queued or running job.
    #[must_use]
    pub fn is_active(&self, id: &TorrentId) -> bool {
        self.inner.lock_active().contains_key(id)
    }

    /// Ids with queued or running jobs, sorted.
    #[must_use]
    pub fn active_ids(&self) -> Vec<TorrentId> {
        let mut ids: Vec<_> = self.inner.lock_active().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Active entry for `id`.
    #[must_use]
    pub fn active(&self, id: &TorrentId) -> Option<ActiveTransfer> {
        self.inner.lock_active().get(id).cloned()
    }

    /// Jobs currently holding a slot.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.max_concurrency - self.inner.permits.available_permits()
    }

    /// Stop accepting work and wait until every active job has finished.
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        loop {
            let drained = self.inner.drained.notified();
            let remaining = self.inner.lock_active().len();
            if remaining == 0 {
                break;
            }
            debug!(route = %self.inner.route.name, remaining, "waiting for transfers to drain");
            drained.await;
        }
        info!(route = %self.inner.route.name, "transfer engine drained");
    }

    /// Wait until the active map is empty without closing the engine.
    pub async fn wait_idle(&self) {
        loop {
            let drained = self.inner.drained.notified();
            if self.inner.lock_active().is_empty() {
                return;
            }
            drained.await;
        }
    }
}

/// Only a seeding home torrent, or one resuming an interrupted copy, may take a slot.
fn may_start_copy(state: TorrentState) -> bool {
    matches!(
        state,
        TorrentState::Home(ClientPhase::Seeding) | TorrentState::Copying
    )
}

struct ActiveGuard {
    inner: Arc<EngineInner>,
    id: TorrentId,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.inner.lock_active().remove(&self.id);
        self.inner.drained.notify_waiters();
    }
}

impl EngineInner {
    fn lock_active(&self) -> MutexGuard<'_, HashMap<TorrentId, ActiveTransfer>> {
        match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("transfer active map lock poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }

    async fn run_job(&self, id: &TorrentId) {
        let catalog = &self.deps.catalog;
        let claimed = catalog.transition_if(id, may_start_copy, TorrentState::Copying);
        let (Some(_), Some(torrent)) = (claimed, catalog.get(id)) else {
            debug!(
                route = %self.route.name,
                torrent_id = %id,
                state = ?catalog.state_of(id),
                "torrent no longer ready for transfer; skipping"
            );
            return;
        };

        let descriptor = TransferDescriptor {
            torrent_id: id.clone(),
            torrent_name: torrent.name.clone(),
            source_client: self.route.from.clone(),
            target_client: self.route.to.clone(),
            route: self.route.name.clone(),
        };
        let transfer_id = self.deps.history.create(&descriptor).unwrap_or_else(|err| {
            warn!(error = %err, torrent_id = %id, "transfer history create failed");
            Uuid::new_v4()
        });
        catalog.update(id, |torrent| {
            torrent.transfer_id = Some(transfer_id);
            torrent.telemetry = TransferTelemetry::default();
        });
        if let Some(entry) = self.lock_active().get_mut(id) {
            entry.started_at = Some(Utc::now());
            entry.transfer_id = Some(transfer_id);
        }
        self.history_call("start", self.deps.history.start(transfer_id));
        info!(route = %self.route.name, torrent_id = %id, %transfer_id, "transfer started");

        match self.execute(id, &torrent, transfer_id).await {
            Ok(state) => {
                self.history_call("complete", self.deps.history.complete(transfer_id));
                info!(route = %self.route.name, torrent_id = %id, state = %state, "transfer finished");
            }
            Err(failure) => {
                let reason = failure.reason();
                warn!(
                    route = %self.route.name,
                    torrent_id = %id,
                    step = failure.step.as_str(),
                    error = %failure.error,
                    reason = %reason,
                    "transfer failed"
                );
                catalog.fail(id, reason.clone());
                self.history_call("fail", self.deps.history.fail(transfer_id, &reason));
            }
        }
    }

    fn history_call(&self, operation: &'static str, result: anyhow::Result<()>) {
        if let Err(err) = result {
            warn!(route = %self.route.name, operation, error = %err, "transfer history update failed");
        }
    }

    async fn execute(
        &self,
        id: &TorrentId,
        torrent: &Torrent,
        transfer_id: Uuid,
    ) -> Result<TorrentState, StepFailure> {
        let metadata_path =
            Path::new(&self.route.source_dot_torrent_path).join(format!("{id}.torrent"));

        let exists = self
            .blocking("file_exists_on_source", {
                let transport = Arc::clone(&self.transport);
                let path = metadata_path.clone();
                move || transport.file_exists_on_source(&path)
            })
            .await
            .at(StepKind::LocateMetadata)?;
        if !exists {
            return Err(StepFailure {
                step: StepKind::LocateMetadata,
                error: TransferError::MissingArtifact {
                    artifact: ".torrent file",
                    path: metadata_path,
                },
            });
        }

        let metadata = self
            .blocking("metadata_dump", {
                let transport = Arc::clone(&self.transport);
                let path = metadata_path.clone();
                move || transport.metadata_dump(&path)
            })
            .await
            .at(StepKind::ReadMetadata)?;
        let metainfo_b64 = STANDARD.encode(&metadata);

        self.blocking("copy_metadata", {
            let transport = Arc::clone(&self.transport);
            let path = metadata_path.clone();
            let dest = PathBuf::from(&self.route.destination_dot_torrent_tmp_dir);
            move || transport.copy(&path, &dest, &mut |_| {})
        })
        .await
        .at(StepKind::StageMetadata)?;
        debug!(route = %self.route.name, torrent_id = %id, "metadata staged");

        let segments = self.payload_segments(id, torrent).await.at(StepKind::CopyPayload)?;
        let bytes = self
            .copy_payload(id, transfer_id, segments)
            .await
            .at(StepKind::CopyPayload)?;
        info!(route = %self.route.name, torrent_id = %id, bytes, "payload copied");

        self.deps.catalog.set_state(id, TorrentState::Copied);
        self.register_target(id, metainfo_b64).await
    }

    async fn payload_segments(&self, id: &TorrentId, torrent: &Torrent) -> TransferResult<Vec<String>> {
        let cached = torrent
            .home_client_info
            .as_ref()
            .map(ferry_core::ClientTorrentInfo::top_level_segments)
            .unwrap_or_default();
        if !cached.is_empty() {
            return Ok(cached);
        }

        let home_name = torrent
            .home_client
            .clone()
            .unwrap_or_else(|| self.route.from.clone());
        let home = self
            .deps
            .clients
            .get(&home_name)
            .ok_or(TransferError::ClientUnavailable { client: home_name })?;
        let fresh = home
            .get_info(id)
            .await
            .map_err(|err| TransferError::client("get_info", err))?
            .map(|info| info.top_level_segments())
            .unwrap_or_default();
        if fresh.is_empty() {
            return Err(TransferError::MissingState {
                field: "home client file list",
            });
        }
        Ok(fresh)
    }

    async fn copy_payload(
        &self,
        id: &TorrentId,
        transfer_id: Uuid,
        segments: Vec<String>,
    ) -> TransferResult<u64> {
        let source_root = PathBuf::from(&self.route.source_torrent_download_path);
        let dest_root = PathBuf::from(&self.route.destination_torrent_download_path);

        let total_files = self
            .blocking("count_files", {
                let transport = Arc::clone(&self.transport);
                let source_root = source_root.clone();
                let segments = segments.clone();
                move || {
                    segments.iter().try_fold(0_u32, |sum, segment| {
                        Ok(sum.saturating_add(transport.count_files(&source_root.join(segment))?))
                    })
                }
            })
            .await?;
        self.deps.catalog.update(id, |torrent| {
            torrent.telemetry.total_files = total_files;
        });

        let recorder = ProgressRecorder::new(
            Arc::clone(&self.deps.catalog),
            Arc::clone(&self.deps.history),
            id.clone(),
            transfer_id,
            self.progress_interval,
            total_files,
        );
        let transport = Arc::clone(&self.transport);
        self.blocking("copy_payload", move || {
            let mut recorder = recorder;
            let mut delivered = 0;
            for segment in &segments {
                let source = source_root.join(segment);
                delivered += transport.copy(&source, &dest_root, &mut |progress| {
                    recorder.observe(&progress);
                })?;
                recorder.finish_copy();
            }
            debug!(
                delivered,
                counted = recorder.completed_bytes(),
                "payload segments delivered"
            );
            Ok(delivered)
        })
        .await
    }

    async fn register_target(
        &self,
        id: &TorrentId,
        metainfo_b64: String,
    ) -> Result<TorrentState, StepFailure> {
        let catalog = &self.deps.catalog;
        let target = self
            .deps
            .clients
            .get(&self.route.to)
            .ok_or_else(|| TransferError::ClientUnavailable {
                client: self.route.to.clone(),
            })
            .at(StepKind::RegisterTarget)?;
        target
            .add_torrent(AddTorrent {
                id: id.clone(),
                filename: format!("{id}.torrent"),
                metainfo_b64,
                options: AddTorrentOptions {
                    download_location: Some(self.route.destination_torrent_download_path.clone()),
                    add_paused: false,
                },
            })
            .await
            .map_err(|err| TransferError::client("add_torrent", err))
            .at(StepKind::RegisterTarget)?;
        catalog.update(id, |torrent| {
            torrent.target_client = Some(self.route.to.clone());
        });

        match target.get_native_state(id).await {
            Ok(Some(label)) => {
                let state = TorrentState::from_native(ClientSide::Target, &label);
                if state == TorrentState::Error {
                    return Err(StepFailure {
                        step: StepKind::ConfirmTarget,
                        error: TransferError::MissingState {
                            field: "recognised target state",
                        },
                    });
                }
                catalog.set_state(id, state);
                Ok(state)
            }
            Ok(None) => {
                debug!(torrent_id = %id, "torrent not yet visible on target; staying copied");
                Ok(TorrentState::Copied)
            }
            Err(err) => {
                warn!(torrent_id = %id, client = %self.route.to, error = %err, "target state query failed; staying copied");
                Ok(TorrentState::Copied)
            }
        }
    }

    async fn blocking<T, F>(&self, operation: &'static str, work: F) -> TransferResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> TransferResult<T> + Send + 'static,
    {
        tokio::task::spawn_blocking(work)
            .await
            .map_err(|_| TransferError::Join { operation })?
    }
}
