//! Metric feeds that sit between the domain crates and the Prometheus registry.

use std::collections::HashMap;
use std::sync::Arc;

use ferry_core::{SnapshotSink, Torrent};
use ferry_events::{Event, EventBus};
use ferry_runtime::SnapshotStore;
use ferry_telemetry::{Metrics, TransferOutcome};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Snapshot hook that counts successful and failed writes.
pub struct MeteredSnapshotSink {
    store: Arc<SnapshotStore>,
    metrics: Metrics,
}

impl MeteredSnapshotSink {
    /// Wrap `store`.
    #[must_use]
    pub const fn new(store: Arc<SnapshotStore>, metrics: Metrics) -> Self {
        Self { store, metrics }
    }
}

impl SnapshotSink for MeteredSnapshotSink {
    fn persist(&self, torrents: &[Torrent]) -> anyhow::Result<()> {
        let result = self.store.save(torrents);
        self.metrics.inc_snapshot_write(result.is_ok());
        result?;
        Ok(())
    }
}

/// Follow transfer events and feed the transfer counters.
///
/// Progress events carry cumulative bytes per transfer; only the growth since
/// the previous event is added.
pub fn spawn_transfer_metrics(events: &EventBus, metrics: Metrics) -> JoinHandle<()> {
    let mut stream = events.subscribe(None);
    tokio::spawn(async move {
        let mut delivered: HashMap<Uuid, u64> = HashMap::new();
        while let Some(envelope) = stream.next().await {
            match envelope.event {
                Event::TransferProgress {
                    transfer_id,
                    bytes_transferred,
                } => {
                    let seen = delivered.entry(transfer_id).or_default();
                    if bytes_transferred > *seen {
                        metrics.add_transfer_bytes(bytes_transferred - *seen);
                        *seen = bytes_transferred;
                    }
                }
                Event::TransferCompleted { transfer_id } => {
                    delivered.remove(&transfer_id);
                    metrics.inc_transfer(TransferOutcome::Completed);
                }
                Event::TransferFailed { transfer_id, .. } => {
                    delivered.remove(&transfer_id);
                    metrics.inc_transfer(TransferOutcome::Failed);
                }
                _ => {}
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn transfer_events_feed_counters() -> anyhow::Result<()> {
        let bus = EventBus::with_capacity(16);
        let metrics = Metrics::new()?;
        let handle = spawn_transfer_metrics(&bus, metrics.clone());
        let id = Uuid::new_v4();
        bus.publish(Event::TransferProgress {
            transfer_id: id,
            bytes_transferred: 100,
        });
        bus.publish(Event::TransferProgress {
            transfer_id: id,
            bytes_transferred: 250,
        });
        bus.publish(Event::TransferCompleted { transfer_id: id });
        bus.publish(Event::TransferFailed {
            transfer_id: Uuid::new_v4(),
            message: "copy_payload: disk full".into(),
        });

        let mut snapshot = metrics.snapshot();
        for _ in 0..100 {
            if snapshot.transfers_failed == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            snapshot = metrics.snapshot();
        }
        assert_eq!(snapshot.transfer_bytes_total, 250);
        assert_eq!(snapshot.transfers_completed, 1);
        assert_eq!(snapshot.transfers_failed, 1);
        handle.abort();
        Ok(())
    }

    #[test]
    fn snapshot_writes_are_counted() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let metrics = Metrics::new()?;
        let sink = MeteredSnapshotSink::new(
            Arc::new(SnapshotStore::new(dir.path().join("state.json"))),
            metrics.clone(),
        );
        sink.persist(&[])?;
        assert_eq!(metrics.snapshot().snapshot_writes_ok, 1);
        Ok(())
    }
}
