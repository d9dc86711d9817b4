use std::fs;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{TransferError, TransferResult};

/// A regular file discovered under a copy root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Absolute path on its side of the route.
    pub path: PathBuf,
    /// Path relative to the copy root's parent, so it starts with the root's name.
    pub relative: PathBuf,
    /// Size in bytes.
    pub size: u64,
}

/// Minimal blocking filesystem surface shared by local disks and SFTP hosts.
pub trait Filesystem: Send + Sync {
    /// Whether `path` exists.
    ///
    /// # Errors
    ///
    /// Returns an error when existence cannot be determined.
    fn exists(&self, path: &Path) -> TransferResult<bool>;

    /// Read a whole file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read.
    fn read_all(&self, path: &Path) -> TransferResult<Vec<u8>>;

    /// Regular files under `root`, sorted by relative path. A file root yields itself.
    ///
    /// # Errors
    ///
    /// Returns an error when the tree cannot be walked.
    fn list_files(&self, root: &Path) -> TransferResult<Vec<FileEntry>>;

    /// Open a file for streaming reads.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be opened.
    fn open_read(&self, path: &Path) -> TransferResult<Box<dyn Read + Send>>;

    /// Create or truncate a file, creating parent directories first.
    ///
    /// # Errors
    ///
    /// Returns an error when the file or its parents cannot be created.
    fn create_write(&self, path: &Path) -> TransferResult<Box<dyn Write + Send>>;
}

/// The machine Ferry runs on.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl Filesystem for LocalFs {
    fn exists(&self, path: &Path) -> TransferResult<bool> {
        path.try_exists()
            .map_err(|err| TransferError::io("local.exists", path, err))
    }

    fn read_all(&self, path: &Path) -> TransferResult<Vec<u8>> {
        fs::read(path).map_err(|err| TransferError::io("local.read", path, err))
    }

    fn list_files(&self, root: &Path) -> TransferResult<Vec<FileEntry>> {
        let base = root.parent().unwrap_or_else(|| Path::new(""));
        let mut entries = Vec::new();
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.map_err(|err| TransferError::walkdir("local.walk", root, err))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let metadata = entry
                .metadata()
                .map_err(|err| TransferError::walkdir("local.metadata", entry.path(), err))?;
            let relative = entry
                .path()
                .strip_prefix(base)
                .map_or_else(|_| PathBuf::from(entry.file_name()), Path::to_path_buf);
            entries.push(FileEntry {
                path: entry.path().to_path_buf(),
                relative,
                size: metadata.len(),
            });
        }
        entries.sort_by(|a, b| a.relative.cmp(&b.relative));
        Ok(entries)
    }

    fn open_read(&self, path: &Path) -> TransferResult<Box<dyn Read + Send>> {
        let file = fs::File::open(path).map_err(|err| TransferError::io("local.open", path, err))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn create_write(&self, path: &Path) -> TransferResult<Box<dyn Write + Send>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| TransferError::io("local.create_dir_all", parent, err))?;
        }
        let file =
            fs::File::create(path).map_err(|err| TransferError::io("local.create", path, err))?;
        Ok(Box::new(BufWriter::new(file)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_files_walks_directories_and_single_files() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let root = temp.path().join("Show.S01");
        fs::create_dir_all(root.join("Subs"))?;
        fs::write(root.join("e01.mkv"), b"episode")?;
        fs::write(root.join("Subs").join("e01.srt"), b"subs")?;
        let single = temp.path().join("Movie.mkv");
        fs::write(&single, b"movie")?;

        let tree = LocalFs.list_files(&root)?;
        let relative: Vec<_> = tree.iter().map(|entry| entry.relative.clone()).collect();
        assert_eq!(
            relative,
            vec![
                PathBuf::from("Show.S01/Subs/e01.srt"),
                PathBuf::from("Show.S01/e01.mkv"),
            ]
        );
        assert_eq!(tree[1].size, 7);

        let file = LocalFs.list_files(&single)?;
        assert_eq!(file.len(), 1);
        assert_eq!(file[0].relative, PathBuf::from("Movie.mkv"));
        Ok(())
    }

    #[test]
    fn create_write_makes_parents() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let target = temp.path().join("a").join("b").join("c.txt");
        {
            let mut writer = LocalFs.create_write(&target)?;
            writer.write_all(b"hello")?;
            writer.flush()?;
        }
        assert!(LocalFs.exists(&target)?);
        assert_eq!(LocalFs.read_all(&target)?, b"hello");
        assert!(!LocalFs.exists(&temp.path().join("nope"))?);
        Ok(())
    }

    #[test]
    fn missing_roots_fail_to_walk() {
        let result = LocalFs.list_files(Path::new("/definitely/not/here"));
        assert!(matches!(result, Err(TransferError::Walkdir { .. })));
    }
}
