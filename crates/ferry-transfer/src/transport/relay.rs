use std::io::{Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use super::fs::Filesystem;
use super::{FileProgress, TransferPhase, Transport, destination_root, stream};
use crate::error::{TransferError, TransferResult};

/// Copies between two remote hosts through a local temp file.
///
/// Every file is downloaded in full before it is uploaded, so progress comes
/// in two legs per file.
pub struct RelayTransport {
    kind: &'static str,
    source: Arc<dyn Filesystem>,
    dest: Arc<dyn Filesystem>,
}

impl RelayTransport {
    /// Relay from `source` to `dest` under a strategy label.
    #[must_use]
    pub fn new(kind: &'static str, source: Arc<dyn Filesystem>, dest: Arc<dyn Filesystem>) -> Self {
        Self { kind, source, dest }
    }
}

impl Transport for RelayTransport {
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
        destination_root(source, dest_dir)?;
        let files = self.source.list_files(source)?;
        let mut delivered = 0;
        for (index, file) in files.iter().enumerate() {
            let file_index = u32::try_from(index + 1).unwrap_or(u32::MAX);
            let label = file.relative.to_string_lossy().into_owned();
            let target = dest_dir.join(&file.relative);
            let mut report = |phase: TransferPhase, transferred: u64| {
                progress(FileProgress {
                    file: label.clone(),
                    file_index,
                    phase,
                    transferred,
                    total: file.size,
                });
            };

            let mut relay = tempfile::tempfile()
                .map_err(|err| TransferError::io("relay.tempfile", &file.relative, err))?;
            debug!(kind = self.kind, file = %label, size = file.size, "relaying file");

            report(TransferPhase::Download, 0);
            let mut reader = self.source.open_read(&file.path)?;
            stream(reader.as_mut(), &mut relay, |n| report(TransferPhase::Download, n))
                .map_err(|err| TransferError::io("relay.download", &file.path, err))?;
            drop(reader);

            relay
                .seek(SeekFrom::Start(0))
                .map_err(|err| TransferError::io("relay.rewind", &file.relative, err))?;
            report(TransferPhase::Upload, 0);
            let mut writer = self.dest.create_write(&target)?;
            let copied = stream(&mut relay, writer.as_mut(), |n| report(TransferPhase::Upload, n))
                .map_err(|err| TransferError::io("relay.upload", &target, err))?;
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

    fn relay() -> RelayTransport {
        RelayTransport::new("relay", Arc::new(LocalFs), Arc::new(LocalFs))
    }

    #[test]
    fn each_file_is_downloaded_then_uploaded() -> anyhow::Result<()> {
        let source = tempfile::tempdir()?;
        let dest = tempfile::tempdir()?;
        let root = source.path().join("Show.S01");
        fs::create_dir_all(&root)?;
        fs::write(root.join("e01.mkv"), vec![1_u8; 200_000])?;
        fs::write(root.join("e02.mkv"), b"second")?;

        let mut reports = Vec::new();
        let delivered = relay().copy(&root, dest.path(), &mut |p| reports.push(p))?;

        assert_eq!(delivered, 200_006);
        let copied = dest.path().join("Show.S01");
        assert_eq!(fs::read(copied.join("e01.mkv"))?, vec![1_u8; 200_000]);
        assert_eq!(fs::read(copied.join("e02.mkv"))?, b"second");

        for index in [1, 2] {
            let file: Vec<_> = reports.iter().filter(|p| p.file_index == index).collect();
            let phases: Vec<_> = file.iter().map(|p| p.phase).collect();
            let first_upload = phases
                .iter()
                .position(|phase| *phase == TransferPhase::Upload)
                .ok_or_else(|| anyhow::anyhow!("file {index} never uploaded"))?;
            assert!(first_upload > 0);
            assert!(phases[..first_upload].iter().all(|p| *p == TransferPhase::Download));
            assert!(phases[first_upload..].iter().all(|p| *p == TransferPhase::Upload));
            assert!(file.windows(2).all(|pair| pair[0].percent() <= pair[1].percent()));
            let last = file.last().ok_or_else(|| anyhow::anyhow!("no reports"))?;
            assert!(last.is_file_complete());
            assert!((last.percent() - 100.0).abs() < f64::EPSILON);
        }
        let halfway = reports
            .iter()
            .find(|p| p.file_index == 1 && p.phase == TransferPhase::Upload)
            .map(FileProgress::percent);
        assert!(halfway.is_some_and(|percent| (percent - 50.0).abs() < f64::EPSILON));
        Ok(())
    }

    #[test]
    fn files_count_from_the_source_tree() -> anyhow::Result<()> {
        let source = tempfile::tempdir()?;
        let root = source.path().join("Movie");
        fs::create_dir_all(root.join("subs"))?;
        fs::write(root.join("movie.mkv"), b"movie")?;
        fs::write(root.join("subs").join("en.srt"), b"subs")?;
        assert_eq!(relay().count_files(&root)?, 2);
        assert!(relay().file_exists_on_source(&root.join("movie.mkv"))?);
        assert_eq!(relay().metadata_dump(&root.join("movie.mkv"))?, b"movie");
        Ok(())
    }
}
