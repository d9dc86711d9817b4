//! Copy strategies between the two ends of a route.
//!
//! A [`Transport`] always addresses source paths on the home side and
//! destination paths on the target side. [`build_transport`] picks the
//! strategy from the route's endpoint pair:
//!
//! | from  | to    | strategy                                   |
//! |-------|-------|--------------------------------------------|
//! | local | local | direct stream                              |
//! | local | sftp  | direct stream, upload                      |
//! | sftp  | local | direct stream, download                    |
//! | sftp  | sftp  | relay through a local temp file, two phases |

mod direct;
mod fs;
mod relay;
mod sftp;

use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use ferry_config::TransportEndpoint;

use crate::error::{TransferError, TransferResult};

pub use direct::DirectTransport;
pub use fs::{FileEntry, Filesystem, LocalFs};
pub use relay::RelayTransport;
pub use sftp::SftpFs;

const CHUNK_SIZE: usize = 64 * 1024;

/// Which leg of a copy a progress report belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferPhase {
    /// Source streamed straight to the destination.
    Single,
    /// Remote source pulled into the local relay file.
    Download,
    /// Local relay file pushed to the remote destination.
    Upload,
}

impl TransferPhase {
    /// Stable label used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Download => "download",
            Self::Upload => "upload",
        }
    }
}

/// Byte-level progress for one file of a copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileProgress {
    /// Path relative to the copied root.
    pub file: String,
    /// 1-based index of the file within this copy.
    pub file_index: u32,
    /// Copy leg.
    pub phase: TransferPhase,
    /// Bytes moved so far in this leg.
    pub transferred: u64,
    /// File size.
    pub total: u64,
}

impl FileProgress {
    /// Whether this leg finished the file.
    #[must_use]
    pub const fn is_leg_complete(&self) -> bool {
        self.transferred >= self.total
    }

    /// Whether the file is fully at the destination.
    #[must_use]
    pub const fn is_file_complete(&self) -> bool {
        self.is_leg_complete() && !matches!(self.phase, TransferPhase::Download)
    }

    /// File completion in percent. Relay legs map onto 0-50 and 50-100.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percent(&self) -> f64 {
        let leg = if self.total == 0 {
            100.0
        } else {
            (self.transferred.min(self.total) as f64 / self.total as f64) * 100.0
        };
        match self.phase {
            TransferPhase::Single => leg,
            TransferPhase::Download => leg / 2.0,
            TransferPhase::Upload => 50.0 + leg / 2.0,
        }
    }

    /// Bytes of this file that count as delivered, weighted by leg.
    #[must_use]
    pub const fn effective_bytes(&self) -> u64 {
        let moved = if self.transferred > self.total {
            self.total
        } else {
            self.transferred
        };
        match self.phase {
            TransferPhase::Single => moved,
            TransferPhase::Download => moved / 2,
            TransferPhase::Upload => self.total / 2 + moved / 2,
        }
    }
}

/// Moves files from the home side of a route to the target side.
///
/// Implementations are blocking; callers run them on a blocking worker.
pub trait Transport: Send + Sync {
    /// Strategy label, e.g. `local->sftp`.
    fn kind(&self) -> &'static str;

    /// Whether `path` exists on the source side.
    ///
    /// # Errors
    ///
    /// Returns an error when the source cannot be queried.
    fn file_exists_on_source(&self, path: &Path) -> TransferResult<bool>;

    /// Full contents of a source file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read.
    fn metadata_dump(&self, path: &Path) -> TransferResult<Vec<u8>>;

    /// Copy `source` (file or directory) into `dest_dir`, keeping its base name.
    /// Returns the number of bytes delivered.
    ///
    /// # Errors
    ///
    /// Returns the first IO, traversal or SSH failure.
    fn copy(
        &self,
        source: &Path,
        dest_dir: &Path,
        progress: &mut dyn FnMut(FileProgress),
    ) -> TransferResult<u64>;

    /// Number of regular files under `path` on the source side (1 for a file).
    ///
    /// # Errors
    ///
    /// Returns an error when the tree cannot be walked.
    fn count_files(&self, path: &Path) -> TransferResult<u32>;
}

/// Select the strategy for a route's endpoint pair.
#[must_use]
pub fn build_transport(from: &TransportEndpoint, to: &TransportEndpoint) -> Arc<dyn Transport> {
    match (from, to) {
        (TransportEndpoint::Local, TransportEndpoint::Local) => Arc::new(DirectTransport::new(
            "local->local",
            Arc::new(LocalFs),
            Arc::new(LocalFs),
        )),
        (TransportEndpoint::Local, TransportEndpoint::Sftp(remote)) => {
            Arc::new(DirectTransport::new(
                "local->sftp",
                Arc::new(LocalFs),
                Arc::new(SftpFs::new(remote.clone())),
            ))
        }
        (TransportEndpoint::Sftp(remote), TransportEndpoint::Local) => {
            Arc::new(DirectTransport::new(
                "sftp->local",
                Arc::new(SftpFs::new(remote.clone())),
                Arc::new(LocalFs),
            ))
        }
        (TransportEndpoint::Sftp(source), TransportEndpoint::Sftp(dest)) => {
            Arc::new(RelayTransport::new(
                "sftp->sftp",
                Arc::new(SftpFs::new(source.clone())),
                Arc::new(SftpFs::new(dest.clone())),
            ))
        }
    }
}

/// Destination path for copying `source` into `dest_dir`.
pub(crate) fn destination_root(source: &Path, dest_dir: &Path) -> TransferResult<std::path::PathBuf> {
    let name = source
        .file_name()
        .ok_or_else(|| TransferError::MissingArtifact {
            artifact: "source file name",
            path: source.to_path_buf(),
        })?;
    Ok(dest_dir.join(name))
}

/// Chunked copy that reports cumulative bytes after every chunk.
pub(crate) fn stream(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    mut on_chunk: impl FnMut(u64),
) -> std::io::Result<u64> {
    let mut buffer = vec![0_u8; CHUNK_SIZE];
    let mut transferred: u64 = 0;
    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        writer.write_all(&buffer[..read])?;
        transferred += read as u64;
        on_chunk(transferred);
    }
    writer.flush()?;
    Ok(transferred)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_config::SftpEndpoint;

    fn progress(phase: TransferPhase, transferred: u64) -> FileProgress {
        FileProgress {
            file: "a.mkv".into(),
            file_index: 1,
            phase,
            transferred,
            total: 200,
        }
    }

    #[test]
    fn relay_legs_split_the_percentage() {
        assert!((progress(TransferPhase::Single, 100).percent() - 50.0).abs() < f64::EPSILON);
        assert!((progress(TransferPhase::Download, 200).percent() - 50.0).abs() < f64::EPSILON);
        assert!((progress(TransferPhase::Upload, 100).percent() - 75.0).abs() < f64::EPSILON);
        assert!((progress(TransferPhase::Upload, 200).percent() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn download_leg_never_completes_a_file() {
        assert!(!progress(TransferPhase::Download, 200).is_file_complete());
        assert!(progress(TransferPhase::Upload, 200).is_file_complete());
        assert_eq!(progress(TransferPhase::Download, 200).effective_bytes(), 100);
        assert_eq!(progress(TransferPhase::Upload, 200).effective_bytes(), 200);
    }

    #[test]
    fn empty_files_report_complete() {
        let empty = FileProgress {
            file: "empty".into(),
            file_index: 1,
            phase: TransferPhase::Single,
            transferred: 0,
            total: 0,
        };
        assert!(empty.is_file_complete());
        assert!((empty.percent() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn endpoint_matrix_selects_strategy() {
        let remote = TransportEndpoint::Sftp(SftpEndpoint {
            host: "seedbox".into(),
            port: 22,
            username: "ferry".into(),
            password: Some("secret".into()),
            private_key: None,
        });
        let local = TransportEndpoint::Local;
        assert_eq!(build_transport(&local, &local).kind(), "local->local");
        assert_eq!(build_transport(&local, &remote).kind(), "local->sftp");
        assert_eq!(build_transport(&remote, &local).kind(), "sftp->local");
        assert_eq!(build_transport(&remote, &remote).kind(), "sftp->sftp");
    }
}
