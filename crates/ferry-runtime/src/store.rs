//! Atomic JSON snapshot file.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use ferry_core::{SnapshotSink, Torrent};
use tempfile::NamedTempFile;
use tracing::{debug, error, warn};

use crate::error::{SnapshotError, SnapshotResult};
use crate::record::TorrentRecord;

/// Snapshot of every tracked torrent, rewritten whole on each save.
///
/// Saves go to a temp file in the same directory and are renamed over the
/// snapshot, so a crash leaves either the old or the new content. Saves are
/// serialised.
pub struct SnapshotStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SnapshotStore {
    /// Store backed by `path`. Nothing is touched until the first save.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Snapshot file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the snapshot with `torrents`.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory, temp file or rename fails.
    pub fn save(&self, torrents: &[Torrent]) -> SnapshotResult<()> {
        let records: Vec<TorrentRecord> = torrents.iter().map(TorrentRecord::from).collect();
        let body = serde_json::to_vec_pretty(&records)
            .map_err(|err| SnapshotError::json("snapshot.encode", &self.path, err))?;

        let _guard = self.lock();
        let dir = self
            .path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(|err| SnapshotError::io("snapshot.create_dir", dir, err))?;
        let mut temp = NamedTempFile::new_in(dir)
            .map_err(|err| SnapshotError::io("snapshot.tempfile", dir, err))?;
        temp.write_all(&body)
            .map_err(|err| SnapshotError::io("snapshot.write", temp.path(), err))?;
        temp.as_file()
            .sync_all()
            .map_err(|err| SnapshotError::io("snapshot.sync", temp.path(), err))?;
        temp.persist(&self.path).map_err(|source| SnapshotError::Persist {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), torrents = records.len(), "snapshot written");
        Ok(())
    }

    /// Records from the snapshot. A missing or unreadable file yields nothing.
    #[must_use]
    pub fn load(&self) -> Vec<TorrentRecord> {
        match self.try_load() {
            Ok(records) => records,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "ignoring unreadable snapshot");
                Vec::new()
            }
        }
    }

    fn try_load(&self) -> SnapshotResult<Vec<TorrentRecord>> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(SnapshotError::io("snapshot.read", &self.path, err)),
        };
        serde_json::from_slice(&raw).map_err(|err| SnapshotError::json("snapshot.decode", &self.path, err))
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("snapshot write lock poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }
}

impl SnapshotSink for SnapshotStore {
    fn persist(&self, torrents: &[Torrent]) -> anyhow::Result<()> {
        self.save(torrents)?;
        Ok(())
    }
}
