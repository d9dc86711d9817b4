//! Throttled progress reporting.
//!
//! Byte-level callbacks from a [`Transport`](crate::Transport) arrive once per
//! chunk. [`ProgressThrottle`] lets through the first report of every file leg,
//! the last one, and otherwise at most one per interval.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ferry_core::{TorrentCatalog, TorrentId, TransferHistory};
use tracing::warn;
use uuid::Uuid;

use crate::transport::{FileProgress, TransferPhase};

/// Default spacing between progress samples.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// A progress report that passed the throttle.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSample {
    /// File being copied.
    pub file: String,
    /// Index of the file within its copy.
    pub file_index: u32,
    /// File completion percent.
    pub percent: f64,
    /// Bytes per second since the previous sample of the same leg.
    pub speed_bps: f64,
}

/// Time-based filter over [`FileProgress`] reports.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
    last_leg: Option<(u32, TransferPhase)>,
    last_bytes: u64,
}

impl ProgressThrottle {
    /// Emit at most once per `interval`, plus leg boundaries.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
            last_leg: None,
            last_bytes: 0,
        }
    }

    /// Decide whether `progress`, observed at `now`, becomes a sample.
    #[allow(clippy::cast_precision_loss)]
    pub fn observe(&mut self, progress: &FileProgress, now: Instant) -> Option<ProgressSample> {
        let leg = (progress.file_index, progress.phase);
        let new_leg = self.last_leg != Some(leg);
        let due = self
            .last_emit
            .is_none_or(|at| now.saturating_duration_since(at) >= self.interval);
        if !(new_leg || due || progress.is_leg_complete()) {
            return None;
        }

        let speed_bps = match self.last_emit {
            Some(at) if !new_leg => {
                let elapsed = now.saturating_duration_since(at).as_secs_f64();
                if elapsed > 0.0 {
                    progress.transferred.saturating_sub(self.last_bytes) as f64 / elapsed
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };
        self.last_emit = Some(now);
        self.last_leg = Some(leg);
        self.last_bytes = progress.transferred;
        Some(ProgressSample {
            file: progress.file.clone(),
            file_index: progress.file_index,
            percent: progress.percent(),
            speed_bps,
        })
    }
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRESS_INTERVAL)
    }
}

/// Writes throttled samples for one transfer job into the catalog and history.
///
/// A job copies several payload roots in sequence; `file_offset` keeps the
/// file counter running across them.
pub(crate) struct ProgressRecorder {
    catalog: Arc<TorrentCatalog>,
    history: Arc<dyn TransferHistory>,
    torrent_id: TorrentId,
    transfer_id: Uuid,
    throttle: ProgressThrottle,
    total_files: u32,
    file_offset: u32,
    files_in_copy: u32,
    counted_file: Option<u32>,
    completed_bytes: u64,
}

impl ProgressRecorder {
    pub(crate) fn new(
        catalog: Arc<TorrentCatalog>,
        history: Arc<dyn TransferHistory>,
        torrent_id: TorrentId,
        transfer_id: Uuid,
        interval: Duration,
        total_files: u32,
    ) -> Self {
        Self {
            catalog,
            history,
            torrent_id,
            transfer_id,
            throttle: ProgressThrottle::new(interval),
            total_files,
            file_offset: 0,
            files_in_copy: 0,
            counted_file: None,
            completed_bytes: 0,
        }
    }

    pub(crate) const fn completed_bytes(&self) -> u64 {
        self.completed_bytes
    }

    pub(crate) fn observe(&mut self, progress: &FileProgress) {
        self.files_in_copy = self.files_in_copy.max(progress.file_index);
        let finished = progress.is_file_complete();
        let counted = self.counted_file == Some(progress.file_index);
        if finished && !counted {
            self.completed_bytes += progress.total;
            self.counted_file = Some(progress.file_index);
        }
        let bytes = if finished {
            self.completed_bytes
        } else {
            self.completed_bytes + progress.effective_bytes()
        };

        let Some(sample) = self.throttle.observe(progress, Instant::now()) else {
            return;
        };
        let file_count = self.file_offset + sample.file_index;
        let total_files = self.total_files.max(file_count);
        self.catalog.update(&self.torrent_id, |torrent| {
            torrent.telemetry.progress = sample.percent;
            torrent.telemetry.transfer_speed = sample.speed_bps;
            torrent.telemetry.current_file = Some(sample.file.clone());
            torrent.telemetry.current_file_count = file_count;
            torrent.telemetry.total_files = total_files;
        });
        if let Err(err) = self
            .history
            .update_progress(self.transfer_id, bytes, finished)
        {
            warn!(error = %err, transfer_id = %self.transfer_id, "transfer history progress update failed");
        }
    }

    /// Close out one payload root so the next copy continues the file count.
    pub(crate) fn finish_copy(&mut self) {
        self.file_offset += self.files_in_copy;
        self.files_in_copy = 0;
        self.counted_file = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(index: u32, phase: TransferPhase, transferred: u64) -> FileProgress {
        FileProgress {
            file: format!("file-{index}"),
            file_index: index,
            phase,
            transferred,
            total: 1_000,
        }
    }

    #[test]
    fn first_report_of_each_leg_passes() {
        let mut throttle = ProgressThrottle::new(Duration::from_secs(60));
        let now = Instant::now();
        assert!(throttle.observe(&report(1, TransferPhase::Single, 0), now).is_some());
        assert!(throttle.observe(&report(1, TransferPhase::Single, 10), now).is_none());
        assert!(throttle.observe(&report(2, TransferPhase::Single, 0), now).is_some());
    }

    #[test]
    fn completion_always_passes() {
        let mut throttle = ProgressThrottle::new(Duration::from_secs(60));
        let now = Instant::now();
        throttle.observe(&report(1, TransferPhase::Download, 0), now);
        let done = throttle.observe(&report(1, TransferPhase::Download, 1_000), now);
        assert!(done.is_some_and(|sample| (sample.percent - 50.0).abs() < f64::EPSILON));
    }

    #[test]
    fn speed_is_bytes_over_elapsed_time() {
        let mut throttle = ProgressThrottle::new(Duration::from_millis(500));
        let start = Instant::now();
        throttle.observe(&report(1, TransferPhase::Single, 0), start);
        assert!(
            throttle
                .observe(&report(1, TransferPhase::Single, 100), start + Duration::from_millis(100))
                .is_none()
        );
        let sample = throttle
            .observe(&report(1, TransferPhase::Single, 500), start + Duration::from_secs(1));
        let speed = sample.map(|s| s.speed_bps).unwrap_or_default();
        assert!((speed - 500.0).abs() < 1e-6);
    }
}
