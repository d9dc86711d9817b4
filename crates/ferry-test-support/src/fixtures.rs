//! On-disk payload fixtures.

use std::fs;
use std::path::{Path, PathBuf};

use ferry_core::{ClientFile, ClientTorrentInfo};
use tempfile::TempDir;

/// Scratch tree laid out like both ends of a local route.
///
/// ```text
/// <root>/state      .torrent files on the home side
/// <root>/downloads  payloads on the home side
/// <root>/tmp        staged .torrent files on the target side
/// <root>/media      payloads on the target side
/// ```
pub struct PayloadFixture {
    root: TempDir,
}

impl PayloadFixture {
    /// Create the four directories.
    ///
    /// # Errors
    ///
    /// Returns an error when the scratch directory cannot be created.
    pub fn new() -> anyhow::Result<Self> {
        let root = tempfile::Builder::new().prefix("ferry-fixture-").tempdir()?;
        for dir in ["state", "downloads", "tmp", "media"] {
            fs::create_dir_all(root.path().join(dir))?;
        }
        Ok(Self { root })
    }

    /// Scratch root.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Home-side `.torrent` directory.
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.root().join("state")
    }

    /// Home-side payload directory.
    #[must_use]
    pub fn downloads_dir(&self) -> PathBuf {
        self.root().join("downloads")
    }

    /// Target-side staging directory.
    #[must_use]
    pub fn tmp_dir(&self) -> PathBuf {
        self.root().join("tmp")
    }

    /// Target-side payload directory.
    #[must_use]
    pub fn media_dir(&self) -> PathBuf {
        self.root().join("media")
    }

    /// Write `{id}.torrent` into the state directory.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be written.
    pub fn write_metadata(&self, id: &str, contents: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.state_dir().join(format!("{id}.torrent"));
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// Write a payload file relative to the downloads directory.
    ///
    /// # Errors
    ///
    /// Returns an error when the file or its parents cannot be written.
    pub fn write_payload(&self, relative: &str, contents: &[u8]) -> anyhow::Result<PathBuf> {
        let path = self.downloads_dir().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents)?;
        Ok(path)
    }
}

/// Client-side view of a torrent holding `files` (relative path, size).
#[must_use]
pub fn client_info(name: &str, state: &str, files: &[(&str, u64)]) -> ClientTorrentInfo {
    ClientTorrentInfo {
        name: name.to_owned(),
        state: state.to_owned(),
        progress: 100.0,
        total_size: files.iter().map(|(_, size)| size).sum(),
        save_path: None,
        files: files
            .iter()
            .map(|(path, size)| ClientFile {
                path: (*path).to_owned(),
                size: *size,
            })
            .collect(),
    }
}
