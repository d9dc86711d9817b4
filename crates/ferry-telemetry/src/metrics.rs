//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes the counters and gauges the reconciliation loop and transfer
//!   engines feed.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Terminal outcome of a transfer, used as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Registered on the target.
    Completed,
    /// Stopped with an error.
    Failed,
}

impl TransferOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Prometheus-backed metrics registry shared across the process.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    reconcile_ticks_total: IntCounter,
    reconcile_failures_total: IntCounter,
    tracked_torrents: IntGauge,
    active_transfers: IntGauge,
    transfers_total: IntCounterVec,
    transfer_bytes_total: IntCounter,
    snapshot_writes_total: IntCounterVec,
}

/// Point-in-time view of the registered metrics.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Completed reconciliation ticks.
    pub reconcile_ticks_total: u64,
    /// Ticks that failed or panicked.
    pub reconcile_failures_total: u64,
    /// Torrents currently tracked.
    pub tracked_torrents: i64,
    /// Transfers holding a slot across all routes.
    pub active_transfers: i64,
    /// Transfers that reached `COPIED` or beyond.
    pub transfers_completed: u64,
    /// Transfers that ended in `ERROR`.
    pub transfers_failed: u64,
    /// Payload bytes delivered.
    pub transfer_bytes_total: u64,
    /// Successful snapshot writes.
    pub snapshot_writes_ok: u64,
    /// Failed snapshot writes.
    pub snapshot_writes_failed: u64,
}

fn counter(name: &'static str, help: &str) -> Result<IntCounter> {
    IntCounter::with_opts(Opts::new(name, help))
        .map_err(|source| TelemetryError::collector("metrics.build", name, source))
}

fn gauge(name: &'static str, help: &str) -> Result<IntGauge> {
    IntGauge::with_opts(Opts::new(name, help))
        .map_err(|source| TelemetryError::collector("metrics.build", name, source))
}

fn counter_vec(name: &'static str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help), labels)
        .map_err(|source| TelemetryError::collector("metrics.build", name, source))
}

impl Metrics {
    /// Construct a registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any collector cannot be built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let reconcile_ticks_total =
            counter("ferry_reconcile_ticks_total", "Completed reconciliation ticks")?;
        let reconcile_failures_total = counter(
            "ferry_reconcile_failures_total",
            "Reconciliation ticks that failed or panicked",
        )?;
        let tracked_torrents = gauge("ferry_tracked_torrents", "Torrents currently tracked")?;
        let active_transfers = gauge(
            "ferry_active_transfers",
            "Transfers holding a slot across all routes",
        )?;
        let transfers_total = counter_vec(
            "ferry_transfers_total",
            "Finished transfers by outcome",
            &["outcome"],
        )?;
        let transfer_bytes_total =
            counter("ferry_transfer_bytes_total", "Payload bytes delivered")?;
        let snapshot_writes_total = counter_vec(
            "ferry_snapshot_writes_total",
            "Snapshot writes by status",
            &["status"],
        )?;

        let register = |name: &'static str, collector: Box<dyn prometheus::core::Collector>| {
            registry
                .register(collector)
                .map_err(|source| TelemetryError::collector("metrics.register", name, source))
        };
        register("reconcile_ticks_total", Box::new(reconcile_ticks_total.clone()))?;
        register(
            "reconcile_failures_total",
            Box::new(reconcile_failures_total.clone()),
        )?;
        register("tracked_torrents", Box::new(tracked_torrents.clone()))?;
        register("active_transfers", Box::new(active_transfers.clone()))?;
        register("transfers_total", Box::new(transfers_total.clone()))?;
        register("transfer_bytes_total", Box::new(transfer_bytes_total.clone()))?;
        register("snapshot_writes_total", Box::new(snapshot_writes_total.clone()))?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                reconcile_ticks_total,
                reconcile_failures_total,
                tracked_torrents,
                active_transfers,
                transfers_total,
                transfer_bytes_total,
                snapshot_writes_total,
            }),
        })
    }

    /// Count a completed tick.
    pub fn inc_reconcile_tick(&self) {
        self.inner.reconcile_ticks_total.inc();
    }

    /// Count a failed or panicked tick.
    pub fn inc_reconcile_failure(&self) {
        self.inner.reconcile_failures_total.inc();
    }

    /// Set the tracked torrent gauge.
    pub fn set_tracked_torrents(&self, count: usize) {
        self.inner
            .tracked_torrents
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Set the in-flight transfer gauge.
    pub fn set_active_transfers(&self, count: usize) {
        self.inner
            .active_transfers
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Count a finished transfer.
    pub fn inc_transfer(&self, outcome: TransferOutcome) {
        self.inner
            .transfers_total
            .with_label_values(&[outcome.as_str()])
            .inc();
    }

    /// Add delivered payload bytes.
    pub fn add_transfer_bytes(&self, bytes: u64) {
        self.inner.transfer_bytes_total.inc_by(bytes);
    }

    /// Count a snapshot write.
    pub fn inc_snapshot_write(&self, ok: bool) {
        let status = if ok { "ok" } else { "failed" };
        self.inner
            .snapshot_writes_total
            .with_label_values(&[status])
            .inc();
    }

    /// Render the registry in the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or the output is not UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::Encode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::Utf8 { source })
    }

    /// Point-in-time snapshot of every collector.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = &self.inner;
        MetricsSnapshot {
            reconcile_ticks_total: inner.reconcile_ticks_total.get(),
            reconcile_failures_total: inner.reconcile_failures_total.get(),
            tracked_torrents: inner.tracked_torrents.get(),
            active_transfers: inner.active_transfers.get(),
            transfers_completed: inner
                .transfers_total
                .with_label_values(&[TransferOutcome::Completed.as_str()])
                .get(),
            transfers_failed: inner
                .transfers_total
                .with_label_values(&[TransferOutcome::Failed.as_str()])
                .get(),
            transfer_bytes_total: inner.transfer_bytes_total.get(),
            snapshot_writes_ok: inner.snapshot_writes_total.with_label_values(&["ok"]).get(),
            snapshot_writes_failed: inner
                .snapshot_writes_total
                .with_label_values(&["failed"])
                .get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_updates() -> Result<()> {
        let metrics = Metrics::new()?;
        metrics.inc_reconcile_tick();
        metrics.inc_reconcile_tick();
        metrics.inc_reconcile_failure();
        metrics.set_tracked_torrents(4);
        metrics.set_active_transfers(2);
        metrics.inc_transfer(TransferOutcome::Completed);
        metrics.inc_transfer(TransferOutcome::Failed);
        metrics.add_transfer_bytes(2_048);
        metrics.inc_snapshot_write(true);
        metrics.inc_snapshot_write(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.reconcile_ticks_total, 2);
        assert_eq!(snapshot.reconcile_failures_total, 1);
        assert_eq!(snapshot.tracked_torrents, 4);
        assert_eq!(snapshot.active_transfers, 2);
        assert_eq!(snapshot.transfers_completed, 1);
        assert_eq!(snapshot.transfers_failed, 1);
        assert_eq!(snapshot.transfer_bytes_total, 2_048);
        assert_eq!(snapshot.snapshot_writes_ok, 1);
        assert_eq!(snapshot.snapshot_writes_failed, 1);

        let rendered = metrics.render()?;
        assert!(rendered.contains("ferry_transfers_total"));
        assert!(rendered.contains("ferry_snapshot_writes_total"));
        Ok(())
    }

    #[test]
    fn snapshot_serialises() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let metrics = Metrics::new()?;
        metrics.add_transfer_bytes(7);
        let json = serde_json::to_value(metrics.snapshot())?;
        assert_eq!(json["tracked_torrents"], 0);
        assert_eq!(json["transfer_bytes_total"], 7);
        Ok(())
    }
}
