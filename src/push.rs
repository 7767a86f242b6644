//! Mirrors the generated tree onto a remote host. The walk is pre-order, so a
//! directory's remote counterpart always exists before anything below it is
//! uploaded. Per-file failures are recorded and the walk goes on; nothing is
//! retried, diffed, or rolled back.

use crate::config::RemoteConfig;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// A destination files can be mirrored to. Paths are absolute remote paths
/// using `/` separators.
pub trait Remote {
    /// Creates the directory at `path`. A directory that already exists is
    /// not an error.
    fn ensure_dir(&mut self, path: &str) -> std::result::Result<(), TransferError>;

    /// Stores everything readable from `content` at `path`, returning the
    /// number of bytes written.
    fn upload(&mut self, path: &str, content: &mut dyn Read)
        -> std::result::Result<u64, TransferError>;
}

/// The result of a push: local paths of the files that made it and of the
/// ones that did not, with the reason.
#[derive(Debug, Default)]
pub struct PushReport {
    pub uploaded: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, TransferError)>,
}

impl PushReport {
    pub fn attempted(&self) -> usize {
        self.uploaded.len() + self.failed.len()
    }

    pub fn succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

impl fmt::Display for PushReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} files: {} uploaded, {} failed",
            self.attempted(),
            self.uploaded.len(),
            self.failed.len()
        )
    }
}

/// Uploads every file under `local_root` to the same relative location under
/// `remote_root`.
pub fn push<R: Remote + ?Sized>(local_root: &Path, remote_root: &str, remote: &mut R) -> PushReport {
    let mut report = PushReport::default();
    // Local directories whose remote counterpart could not be created, along
    // with the reason.
    let mut failed_dirs: Vec<(PathBuf, String)> = Vec::new();

    let walk = WalkDir::new(local_root)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        .into_iter();
    for entry in walk {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                let path = err
                    .path()
                    .map(Path::to_owned)
                    .unwrap_or_else(|| local_root.to_owned());
                report.failed.push((path, TransferError::WalkDir(err)));
                continue;
            }
        };
        let local = entry.path();

        if let Some((dir, reason)) = failed_dirs.iter().find(|(dir, _)| local.starts_with(dir)) {
            if entry.file_type().is_dir() {
                continue;
            }
            report.failed.push((
                local.to_owned(),
                TransferError::DirectoryFailed {
                    dir: dir.to_owned(),
                    reason: reason.clone(),
                },
            ));
            continue;
        }

        let target = match remote_path(remote_root, local_root, local) {
            Ok(target) => target,
            Err(err) => {
                if entry.file_type().is_dir() {
                    failed_dirs.push((local.to_owned(), err.to_string()));
                } else {
                    report.failed.push((local.to_owned(), err));
                }
                continue;
            }
        };

        if entry.file_type().is_dir() {
            match remote.ensure_dir(&target) {
                Ok(()) => debug!(remote = %target, "directory ready"),
                Err(err) => {
                    warn!(remote = %target, error = %err, "creating directory failed");
                    failed_dirs.push((local.to_owned(), err.to_string()));
                }
            }
            continue;
        }

        let result = File::open(local)
            .map_err(TransferError::Io)
            .and_then(|mut file| remote.upload(&target, &mut file));
        match result {
            Ok(bytes) => {
                info!(local = %local.display(), remote = %target, bytes, "uploaded");
                report.uploaded.push(local.to_owned());
            }
            Err(err) => {
                warn!(local = %local.display(), error = %err, "upload failed");
                report.failed.push((local.to_owned(), err));
            }
        }
    }
    report
}

// The remote path of `local`, a path under `local_root`.
fn remote_path(
    remote_root: &str,
    local_root: &Path,
    local: &Path,
) -> std::result::Result<String, TransferError> {
    let relative = local
        .strip_prefix(local_root)
        .map_err(|_| TransferError::InvalidPath(local.to_owned()))?;
    let mut target = remote_root.trim_end_matches('/').to_owned();
    for part in relative.iter() {
        let part = part
            .to_str()
            .ok_or_else(|| TransferError::InvalidPath(local.to_owned()))?;
        target.push('/');
        target.push_str(part);
    }
    if target.is_empty() {
        target.push('/');
    }
    Ok(target)
}

/// A [`Remote`] over one FTP connection. The connection is logged out and
/// closed when the value is dropped.
pub struct FtpRemote {
    stream: FtpStream,
    // The working directory after login.
    home: String,
}

impl FtpRemote {
    /// Connects and logs in, switching to binary transfers.
    pub fn connect(config: &RemoteConfig) -> Result<FtpRemote> {
        let mut stream =
            FtpStream::connect((config.host.as_str(), config.port)).map_err(|err| {
                Error::Connect {
                    host: config.host.clone(),
                    port: config.port,
                    err,
                }
            })?;
        stream
            .login(&config.user, &config.password)
            .map_err(|err| Error::Login {
                user: config.user.clone(),
                err,
            })?;
        stream.transfer_type(FileType::Binary)?;
        let home = stream.pwd()?;
        info!(host = %config.host, port = config.port, user = %config.user, home = %home, "connected");
        Ok(FtpRemote { stream, home })
    }

    /// The remote working directory.
    pub fn pwd(&mut self) -> Result<String> {
        Ok(self.stream.pwd()?)
    }
}

impl Remote for FtpRemote {
    fn ensure_dir(&mut self, path: &str) -> std::result::Result<(), TransferError> {
        if path == "/" {
            return Ok(());
        }
        match self.stream.mkdir(path) {
            Ok(()) => Ok(()),
            // Most servers answer 550 for an existing directory; being able
            // to enter it settles the question. The session goes back home
            // afterwards so later relative paths resolve the same way.
            Err(err) => match self.stream.cwd(path) {
                Ok(()) => Ok(self.stream.cwd(&self.home)?),
                Err(_) => Err(TransferError::Ftp(err)),
            },
        }
    }

    fn upload(
        &mut self,
        path: &str,
        mut content: &mut dyn Read,
    ) -> std::result::Result<u64, TransferError> {
        Ok(self.stream.put_file(path, &mut content)?)
    }
}

impl Drop for FtpRemote {
    fn drop(&mut self) {
        match self.stream.quit() {
            Ok(()) => debug!("disconnected"),
            Err(err) => debug!(error = %err, "closing connection"),
        }
    }
}

/// A failure to transfer one file or directory.
#[derive(Debug)]
pub enum TransferError {
    /// The remote rejected the operation.
    Ftp(FtpError),

    /// The local file could not be read.
    Io(io::Error),

    /// The local path cannot be expressed as a remote path.
    InvalidPath(PathBuf),

    /// The remote directory this file belongs in could not be created.
    DirectoryFailed { dir: PathBuf, reason: String },

    /// The local tree could not be walked.
    WalkDir(walkdir::Error),
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TransferError::Ftp(err) => err.fmt(f),
            TransferError::Io(err) => err.fmt(f),
            TransferError::InvalidPath(path) => {
                write!(f, "'{}' is not a valid remote path", path.display())
            }
            TransferError::DirectoryFailed { dir, reason } => {
                write!(f, "directory '{}' failed: {}", dir.display(), reason)
            }
            TransferError::WalkDir(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for TransferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransferError::Ftp(err) => Some(err),
            TransferError::Io(err) => Some(err),
            TransferError::InvalidPath(_) => None,
            TransferError::DirectoryFailed { .. } => None,
            TransferError::WalkDir(err) => Some(err),
        }
    }
}

impl From<FtpError> for TransferError {
    fn from(err: FtpError) -> TransferError {
        TransferError::Ftp(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Errors which end a push before it starts.
#[derive(Debug)]
pub enum Error {
    /// Returned when the server cannot be reached.
    Connect {
        host: String,
        port: u16,
        err: FtpError,
    },

    /// Returned when the server refuses the credentials.
    Login { user: String, err: FtpError },

    /// Returned for other protocol errors on the connection.
    Ftp(FtpError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Connect { host, port, err } => {
                write!(f, "Connecting to {}:{}: {}", host, port, err)
            }
            Error::Login { user, err } => write!(f, "Logging in as '{}': {}", user, err),
            Error::Ftp(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connect { err, .. } => Some(err),
            Error::Login { err, .. } => Some(err),
            Error::Ftp(err) => Some(err),
        }
    }
}

impl From<FtpError> for Error {
    fn from(err: FtpError) -> Error {
        Error::Ftp(err)
    }
}
