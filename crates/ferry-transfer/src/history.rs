//! In-memory transfer history that mirrors every change onto the event bus.
//!
//! The ledger is bounded: once it holds more than its capacity, the oldest
//! completed or failed records are evicted. Pending and running records are
//! never evicted.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use ferry_core::{TorrentId, TransferDescriptor, TransferHistory};
use ferry_events::{Event, EventBus};
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

const PROGRESS_EVENT_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of records kept by [`EventHistory::new`].
pub const DEFAULT_HISTORY_CAPACITY: usize = 512;

/// Lifecycle of one transfer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    /// Created, waiting for a slot.
    Pending,
    /// Copying.
    Running,
    /// Registered on the target.
    Completed,
    /// Stopped with an error.
    Failed,
}

impl TransferStatus {
    /// Whether the record can no longer change.
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One transfer attempt.
#[derive(Debug, Clone, Serialize)]
pub struct TransferRecord {
    /// Record identifier.
    pub id: Uuid,
    /// Torrent being moved.
    pub torrent_id: TorrentId,
    /// Display name.
    pub torrent_name: String,
    /// Home client.
    pub source_client: String,
    /// Target client.
    pub target_client: String,
    /// Route name.
    pub route: String,
    /// Current status.
    pub status: TransferStatus,
    /// Cumulative bytes delivered.
    pub bytes_transferred: u64,
    /// Failure reason, when failed.
    pub failure: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update.
    pub updated_at: DateTime<Utc>,
}

#[derive(Default)]
struct Ledger {
    records: HashMap<Uuid, TransferRecord>,
    order: VecDeque<Uuid>,
    last_progress_event: HashMap<Uuid, Instant>,
}

impl Ledger {
    fn insert(&mut self, record: TransferRecord) {
        self.order.push_back(record.id);
        self.records.insert(record.id, record);
    }

    /// Evict the oldest finished records until at most `capacity` remain.
    fn prune(&mut self, capacity: usize) {
        while self.records.len() > capacity {
            let records = &self.records;
            let Some(position) = self.order.iter().position(|id| {
                records
                    .get(id)
                    .is_some_and(|record| record.status.is_finished())
            }) else {
                break;
            };
            if let Some(id) = self.order.remove(position) {
                self.records.remove(&id);
                self.last_progress_event.remove(&id);
            }
        }
    }
}

/// [`TransferHistory`] that keeps records in memory and publishes
/// `transfer_*` events.
pub struct EventHistory {
    events: EventBus,
    ledger: Mutex<Ledger>,
    capacity: usize,
}

impl EventHistory {
    /// History publishing onto `events`, keeping [`DEFAULT_HISTORY_CAPACITY`] records.
    #[must_use]
    pub fn new(events: EventBus) -> Self {
        Self::with_capacity(events, DEFAULT_HISTORY_CAPACITY)
    }

    /// History keeping at most `capacity` finished records. Zero is bumped to one.
    #[must_use]
    pub fn with_capacity(events: EventBus, capacity: usize) -> Self {
        Self {
            events,
            ledger: Mutex::new(Ledger::default()),
            capacity: capacity.max(1),
        }
    }

    /// Record by id.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<TransferRecord> {
        self.lock().records.get(&id).cloned()
    }

    /// Every retained record, oldest first.
    #[must_use]
    pub fn records(&self) -> Vec<TransferRecord> {
        let ledger = self.lock();
        ledger
            .order
            .iter()
            .filter_map(|id| ledger.records.get(id).cloned())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        match self.ledger.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("transfer history lock poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }

    fn settle(&self, transfer_id: Uuid) {
        let mut ledger = self.lock();
        ledger.last_progress_event.remove(&transfer_id);
        ledger.prune(self.capacity);
    }

    fn modify<F>(&self, id: Uuid, apply: F) -> anyhow::Result<TransferRecord>
    where
        F: FnOnce(&mut TransferRecord),
    {
        let mut ledger = self.lock();
        let record = ledger
            .records
            .get_mut(&id)
            .ok_or_else(|| anyhow!("unknown transfer {id}"))?;
        apply(record);
        record.updated_at = Utc::now();
        Ok(record.clone())
    }
}

impl TransferHistory for EventHistory {
    fn create(&self, descriptor: &TransferDescriptor) -> anyhow::Result<Uuid> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let mut ledger = self.lock();
        ledger.insert(TransferRecord {
            id,
            torrent_id: descriptor.torrent_id.clone(),
            torrent_name: descriptor.torrent_name.clone(),
            source_client: descriptor.source_client.clone(),
            target_client: descriptor.target_client.clone(),
            route: descriptor.route.clone(),
            status: TransferStatus::Pending,
            bytes_transferred: 0,
            failure: None,
            created_at: now,
            updated_at: now,
        });
        ledger.prune(self.capacity);
        Ok(id)
    }

    fn start(&self, transfer_id: Uuid) -> anyhow::Result<()> {
        let record = self.modify(transfer_id, |record| record.status = TransferStatus::Running)?;
        self.events.publish(Event::TransferStarted {
            transfer_id,
            torrent_id: record.torrent_id.to_string(),
            route: record.route,
        });
        Ok(())
    }

    fn update_progress(&self, transfer_id: Uuid, bytes: u64, force: bool) -> anyhow::Result<()> {
        let publish = {
            let mut ledger = self.lock();
            let record = ledger
                .records
                .get_mut(&transfer_id)
                .ok_or_else(|| anyhow!("unknown transfer {transfer_id}"))?;
            record.bytes_transferred = bytes;
            record.updated_at = Utc::now();
            let now = Instant::now();
            let due = ledger
                .last_progress_event
                .get(&transfer_id)
                .is_none_or(|at| now.saturating_duration_since(*at) >= PROGRESS_EVENT_INTERVAL);
            if force || due {
                ledger.last_progress_event.insert(transfer_id, now);
            }
            force || due
        };
        if publish {
            self.events.publish(Event::TransferProgress {
                transfer_id,
                bytes_transferred: bytes,
            });
        }
        Ok(())
    }

    fn complete(&self, transfer_id: Uuid) -> anyhow::Result<()> {
        self.modify(transfer_id, |record| record.status = TransferStatus::Completed)?;
        self.settle(transfer_id);
        self.events.publish(Event::TransferCompleted { transfer_id });
        Ok(())
    }

    fn fail(&self, transfer_id: Uuid, reason: &str) -> anyhow::Result<()> {
        self.modify(transfer_id, |record| {
            record.status = TransferStatus::Failed;
            record.failure = Some(reason.to_owned());
        })?;
        self.settle(transfer_id);
        self.events.publish(Event::TransferFailed {
            transfer_id,
            message: reason.to_owned(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> TransferDescriptor {
        TransferDescriptor {
            torrent_id: TorrentId::new("abc"),
            torrent_name: "Movie".into(),
            source_client: "home".into(),
            target_client: "box".into(),
            route: "home-box".into(),
        }
    }

    #[test]
    fn lifecycle_is_recorded_and_published() -> anyhow::Result<()> {
        let events = EventBus::new();
        let history = EventHistory::new(events.clone());
        let id = history.create(&descriptor())?;
        history.start(id)?;
        history.update_progress(id, 10, false)?;
        history.update_progress(id, 20, false)?;
        history.update_progress(id, 30, true)?;
        history.complete(id)?;

        let record = history.get(id).ok_or_else(|| anyhow!("missing record"))?;
        assert_eq!(record.status, TransferStatus::Completed);
        assert_eq!(record.bytes_transferred, 30);

        let kinds: Vec<_> = events.recent().iter().map(|e| e.event.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                "transfer_started",
                "transfer_progress",
                "transfer_progress",
                "transfer_completed"
            ]
        );
        Ok(())
    }

    #[test]
    fn failures_keep_the_reason() -> anyhow::Result<()> {
        let history = EventHistory::new(EventBus::new());
        let id = history.create(&descriptor())?;
        history.fail(id, "disk full")?;
        let record = history.get(id).ok_or_else(|| anyhow!("missing record"))?;
        assert_eq!(record.status, TransferStatus::Failed);
        assert_eq!(record.failure.as_deref(), Some("disk full"));
        assert!(history.start(Uuid::new_v4()).is_err());
        Ok(())
    }

    #[test]
    fn finished_records_are_evicted_oldest_first() -> anyhow::Result<()> {
        let history = EventHistory::with_capacity(EventBus::new(), 3);
        let running = history.create(&descriptor())?;
        history.start(running)?;
        let mut failed = Vec::new();
        for attempt in 0..10 {
            let id = history.create(&descriptor())?;
            history.fail(id, &format!("attempt {attempt}"))?;
            failed.push(id);
        }

        let kept: Vec<_> = history.records().iter().map(|record| record.id).collect();
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0], running, "running records are never evicted");
        assert_eq!(&kept[1..], &failed[8..]);
        assert!(history.get(failed[0]).is_none());
        Ok(())
    }
}
