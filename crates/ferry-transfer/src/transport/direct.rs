use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use super::fs::Filesystem;
use super::{FileProgress, TransferPhase, Transport, destination_root, stream};
use crate::error::{TransferError, TransferResult};

/// Streams each file straight from the source filesystem to the destination.
pub struct DirectTransport {
    kind: &'static str,
    source: Arc<dyn Filesystem>,
    dest: Arc<dyn Filesystem>,
}

impl DirectTransport {
    /// Pair two filesystems under a strategy label.
    #[must_use]
    pub fn new(kind: &'static str, source: Arc<dyn Filesystem>, dest: Arc<dyn Filesystem>) -> Self {
        Self { kind, source, dest }
    }
}

impl Transport for DirectTransport {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn file_exists_on_source(&self, path: &Path) -> TransferResult<bool> {
        self.source.exists(path)
    }

    fn metadata_dump(&self, path: &Path) -> TransferResult<Vec<u8>> {
        self.source.read_all(path)
    }

    fn copy(
        &self,
        source: &Path,
        dest_dir: &Path,
        progress: &mut dyn FnMut(FileProgress),
    ) -> TransferResult<u64> {
        // Relative paths already start with the root's own name.
        destination_root(source, dest_dir)?;
        let files = self.source.list_files(source)?;
        let mut delivered = 0;
        for (index, file) in files.iter().enumerate() {
            let file_index = u32::try_from(index + 1).unwrap_or(u32::MAX);
            let label = file.relative.to_string_lossy().into_owned();
            let target = dest_dir.join(&file.relative);
            debug!(kind = self.kind, file = %label, size = file.size, "copying file");

            progress(FileProgress {
                file: label.clone(),
                file_index,
                phase: TransferPhase::Single,
                transferred: 0,
                total: file.size,
            });
            let mut reader = self.source.open_read(&file.path)?;
            let mut writer = self.dest.create_write(&target)?;
            let copied = stream(reader.as_mut(), writer.as_mut(), |transferred| {
                progress(FileProgress {
                    file: label.clone(),
                    file_index,
                    phase: TransferPhase::Single,
                    transferred,
                    total: file.size,
                });
            })
            .map_err(|err| TransferError::io("copy.stream", &file.path, err))?;
            delivered += copied;
        }
        Ok(delivered)
    }

    fn count_files(&self, path: &Path) -> TransferResult<u32> {
        let files = self.source.list_files(path)?;
        Ok(u32::try_from(files.len()).unwrap_or(u32::MAX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalFs;
    use std::fs;

    fn local() -> DirectTransport {
        DirectTransport::new("local->local", Arc::new(LocalFs), Arc::new(LocalFs))
    }

    #[test]
    fn copies_directory_tree_under_its_name() -> anyhow::Result<()> {
        let source = tempfile::tempdir()?;
        let dest = tempfile::tempdir()?;
        let root = source.path().join("Movie (2024)");
        fs::create_dir_all(root.join("extras"))?;
        fs::write(root.join("movie.mkv"), vec![7_u8; 150_000])?;
        fs::write(root.join("extras").join("trailer.mkv"), b"trailer")?;

        let mut reports = Vec::new();
        let bytes = local().copy(&root, dest.path(), &mut |p| reports.push(p))?;

        assert_eq!(bytes, 150_007);
        let copied = dest.path().join("Movie (2024)");
        assert_eq!(fs::read(copied.join("movie.mkv"))?.len(), 150_000);
        assert_eq!(fs::read(copied.join("extras").join("trailer.mkv"))?, b"trailer");
        assert!(reports.iter().any(|p| p.file_index == 2 && p.is_file_complete()));
        assert!(reports.iter().all(|p| p.phase == TransferPhase::Single));
        Ok(())
    }

    #[test]
    fn single_file_roots_land_in_dest_dir() -> anyhow::Result<()> {
        let source = tempfile::tempdir()?;
        let dest = tempfile::tempdir()?;
        let file = source.path().join("abc.torrent");
        fs::write(&file, b"d8:announce")?;

        let transport = local();
        assert!(transport.file_exists_on_source(&file)?);
        assert_eq!(transport.metadata_dump(&file)?, b"d8:announce");
        assert_eq!(transport.count_files(&file)?, 1);
        transport.copy(&file, &dest.path().join("tmp"), &mut |_| {})?;
        assert_eq!(fs::read(dest.path().join("tmp").join("abc.torrent"))?, b"d8:announce");
        Ok(())
    }

    #[test]
    fn empty_files_still_report_completion() -> anyhow::Result<()> {
        let source = tempfile::tempdir()?;
        let dest = tempfile::tempdir()?;
        let file = source.path().join("empty.nfo");
        fs::write(&file, b"")?;
        let mut completed = 0;
        local().copy(&file, dest.path(), &mut |p| {
            if p.is_file_complete() {
                completed += 1;
            }
        })?;
        assert!(completed >= 1);
        assert!(dest.path().join("empty.nfo").exists());
        Ok(())
    }
}
