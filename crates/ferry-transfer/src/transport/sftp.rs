use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use ferry_config::SftpEndpoint;
use ssh2::{ErrorCode, FileStat, Session, Sftp};
use tracing::{debug, error, info};

use super::fs::{FileEntry, Filesystem};
use crate::error::{TransferError, TransferResult};

const SESSION_TIMEOUT_MS: u32 = 30_000;
const NO_SUCH_FILE: i32 = 2;
const DIR_MODE: i32 = 0o755;

struct Connected {
    // Keeps the transport alive for the SFTP channel.
    _session: Session,
    sftp: Sftp,
}

/// A remote host reached over SFTP.
///
/// The SSH session is opened on first use and dropped after any SSH failure
/// so the next call reconnects.
pub struct SftpFs {
    endpoint: SftpEndpoint,
    connection: Mutex<Option<Connected>>,
}

impl SftpFs {
    /// Describe a host without connecting yet.
    #[must_use]
    pub const fn new(endpoint: SftpEndpoint) -> Self {
        Self {
            endpoint,
            connection: Mutex::new(None),
        }
    }

    fn connect(&self) -> TransferResult<Connected> {
        let host = self.endpoint.host.as_str();
        let address = format!("{host}:{}", self.endpoint.port);
        let tcp = TcpStream::connect((host, self.endpoint.port))
            .map_err(|err| TransferError::io("sftp.connect", PathBuf::from(&address), err))?;
        let mut session = Session::new().map_err(|err| TransferError::ssh("sftp.session", host, err))?;
        session.set_tcp_stream(tcp);
        session.set_timeout(SESSION_TIMEOUT_MS);
        session
            .handshake()
            .map_err(|err| TransferError::ssh("sftp.handshake", host, err))?;

        let username = self.endpoint.username.as_str();
        if let Some(key) = self.endpoint.private_key.as_deref() {
            session
                .userauth_pubkey_file(username, None, key, self.endpoint.password.as_deref())
                .map_err(|err| TransferError::ssh("sftp.auth_key", host, err))?;
        } else if let Some(password) = self.endpoint.password.as_deref() {
            session
                .userauth_password(username, password)
                .map_err(|err| TransferError::ssh("sftp.auth_password", host, err))?;
        }
        if !session.authenticated() {
            return Err(TransferError::MissingState {
                field: "sftp credentials",
            });
        }
        let sftp = session
            .sftp()
            .map_err(|err| TransferError::ssh("sftp.subsystem", host, err))?;
        info!(host, port = self.endpoint.port, "sftp session established");
        Ok(Connected {
            _session: session,
            sftp,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<Connected>> {
        match self.connection.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("sftp session lock poisoned; continuing with recovered guard");
                poisoned.into_inner()
            }
        }
    }

    fn with_sftp<T>(&self, op: impl FnOnce(&Sftp) -> TransferResult<T>) -> TransferResult<T> {
        let mut guard = self.lock();
        if guard.is_none() {
            *guard = Some(self.connect()?);
        }
        let Some(connected) = guard.as_ref() else {
            return Err(TransferError::MissingState {
                field: "sftp session",
            });
        };
        let result = op(&connected.sftp);
        if matches!(result, Err(TransferError::Ssh { .. })) {
            debug!(host = %self.endpoint.host, "dropping sftp session after failure");
            *guard = None;
        }
        result
    }

    fn stat(sftp: &Sftp, host: &str, path: &Path) -> TransferResult<Option<FileStat>> {
        match sftp.stat(path) {
            Ok(stat) => Ok(Some(stat)),
            Err(err) if matches!(err.code(), ErrorCode::SFTP(NO_SUCH_FILE)) => Ok(None),
            Err(err) => Err(TransferError::ssh("sftp.stat", host, err)),
        }
    }

    fn mkdir_all(sftp: &Sftp, host: &str, dir: &Path) -> TransferResult<()> {
        let mut chain: Vec<&Path> = dir
            .ancestors()
            .filter(|ancestor| !ancestor.as_os_str().is_empty() && ancestor.parent().is_some())
            .collect();
        chain.reverse();
        for ancestor in chain {
            if Self::stat(sftp, host, ancestor)?.is_none() {
                sftp.mkdir(ancestor, DIR_MODE)
                    .map_err(|err| TransferError::ssh("sftp.mkdir", host, err))?;
            }
        }
        Ok(())
    }

    fn walk(
        sftp: &Sftp,
        host: &str,
        base: &Path,
        dir: &Path,
        out: &mut Vec<FileEntry>,
    ) -> TransferResult<()> {
        let children = sftp
            .readdir(dir)
            .map_err(|err| TransferError::ssh("sftp.readdir", host, err))?;
        for (path, stat) in children {
            if stat.is_dir() {
                Self::walk(sftp, host, base, &path, out)?;
            } else if stat.is_file() {
                out.push(entry(base, path, &stat));
            }
        }
        Ok(())
    }
}

fn entry(base: &Path, path: PathBuf, stat: &FileStat) -> FileEntry {
    let relative = path
        .strip_prefix(base)
        .map_or_else(|_| path.file_name().map(PathBuf::from).unwrap_or_default(), Path::to_path_buf);
    FileEntry {
        size: stat.size.unwrap_or(0),
        relative,
        path,
    }
}

impl Filesystem for SftpFs {
    fn exists(&self, path: &Path) -> TransferResult<bool> {
        let host = self.endpoint.host.clone();
        self.with_sftp(|sftp| Ok(Self::stat(sftp, &host, path)?.is_some()))
    }

    fn read_all(&self, path: &Path) -> TransferResult<Vec<u8>> {
        let mut reader = self.open_read(path)?;
        let mut contents = Vec::new();
        reader
            .read_to_end(&mut contents)
            .map_err(|err| TransferError::io("sftp.read", path, err))?;
        Ok(contents)
    }

    fn list_files(&self, root: &Path) -> TransferResult<Vec<FileEntry>> {
        let host = self.endpoint.host.clone();
        self.with_sftp(|sftp| {
            let stat = Self::stat(sftp, &host, root)?.ok_or_else(|| TransferError::MissingArtifact {
                artifact: "remote payload",
                path: root.to_path_buf(),
            })?;
            let base = root.parent().unwrap_or_else(|| Path::new(""));
            let mut entries = Vec::new();
            if stat.is_dir() {
                Self::walk(sftp, &host, base, root, &mut entries)?;
            } else {
                entries.push(entry(base, root.to_path_buf(), &stat));
            }
            entries.sort_by(|a, b| a.relative.cmp(&b.relative));
            Ok(entries)
        })
    }

    fn open_read(&self, path: &Path) -> TransferResult<Box<dyn Read + Send>> {
        let host = self.endpoint.host.clone();
        self.with_sftp(|sftp| {
            let file = sftp
                .open(path)
                .map_err(|err| TransferError::ssh("sftp.open", host, err))?;
            Ok(Box::new(file) as Box<dyn Read + Send>)
        })
    }

    fn create_write(&self, path: &Path) -> TransferResult<Box<dyn Write + Send>> {
        let host = self.endpoint.host.clone();
        self.with_sftp(|sftp| {
            if let Some(parent) = path.parent() {
                Self::mkdir_all(sftp, &host, parent)?;
            }
            let file = sftp
                .create(path)
                .map_err(|err| TransferError::ssh("sftp.create", host, err))?;
            Ok(Box::new(file) as Box<dyn Write + Send>)
        })
    }
}
