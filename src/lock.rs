//! Run lock handling.
//!
//! At most one confgit run per lock path. The lock is a file created with
//! `create_new` semantics carrying JSON holder metadata; a pre-existing file
//! means another run holds it. No stale-lock reclamation: a dead holder's
//! file stays "busy" until an operator removes it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{Effect, Transience};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLockMeta {
    pub pid: u32,
    pub started_at_ms: u64,
    pub version: String,
}

impl RunLockMeta {
    pub fn new(started_at_ms: u64, version: impl Into<String>) -> Self {
        Self {
            pid: std::process::id(),
            started_at_ms,
            version: version.into(),
        }
    }
}

#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    meta: RunLockMeta,
    released: bool,
}

impl RunLock {
    pub fn acquire(
        path: &Path,
        started_at_ms: u64,
        version: impl Into<String>,
    ) -> Result<Self, LockError> {
        if let Some(parent) = path.parent() {
            ensure_dir(parent)?;
        }
        reject_symlink(path)?;

        let meta = RunLockMeta::new(started_at_ms, version);

        let mut file = match open_new_lock_file(path) {
            Ok(file) => file,
            Err(LockError::Io(err)) if err.kind() == io::ErrorKind::AlreadyExists => {
                let (holder, meta_error) = match read_metadata(path) {
                    Ok(meta) => (Some(meta), None),
                    Err(err) => (None, Some(err.to_string())),
                };
                return Err(LockError::Held {
                    path: Box::new(path.to_path_buf()),
                    holder: holder.map(Box::new),
                    meta_error,
                });
            }
            Err(err) => return Err(err),
        };

        write_metadata(&mut file, path, &meta)?;
        set_file_permissions(path, 0o600)?;

        Ok(Self {
            path: path.to_path_buf(),
            meta,
            released: false,
        })
    }

    pub fn meta(&self) -> &RunLockMeta {
        &self.meta
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Install a SIGINT/SIGTERM hook that removes the lock file and exits.
    ///
    /// RAII release covers normal unwinding; this covers signal delivery,
    /// where destructors never run.
    pub fn guard_signals(&self) -> Result<(), LockError> {
        let path = self.path.clone();
        ctrlc::set_handler(move || {
            let _ = fs::remove_file(&path);
            eprintln!("confgit: interrupted, lock released");
            std::process::exit(1);
        })
        .map_err(|err| LockError::SignalHandler(err.to_string()))
    }

    pub fn release(mut self) -> Result<(), LockError> {
        if !self.released {
            fs::remove_file(&self.path)?;
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Read lock metadata without acquiring. `None` if no lock is present.
pub fn read_lock_meta(path: &Path) -> Result<Option<RunLockMeta>, LockError> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => Err(LockError::Symlink {
            path: path.to_path_buf(),
        }),
        Ok(_) => Ok(Some(read_metadata(path)?)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(LockError::Io(err)),
    }
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error(
        "lock already held at {path:?}{}",
        .holder
            .as_ref()
            .map(|m| format!(" by pid {} since {} (v{})", m.pid, m.started_at_ms, m.version))
            .unwrap_or_default()
    )]
    Held {
        path: Box<PathBuf>,
        holder: Option<Box<RunLockMeta>>,
        meta_error: Option<String>,
    },
    #[error("lock path is a symlink: {path:?}")]
    Symlink { path: PathBuf },
    #[error("lock metadata corrupted at {path:?}: {source}")]
    MetadataCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to install signal handler: {0}")]
    SignalHandler(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl LockError {
    pub fn transience(&self) -> Transience {
        match self {
            // A held lock is never retried within a run; the next cron
            // invocation is the retry.
            LockError::Held { .. } => Transience::Permanent,
            LockError::Symlink { .. }
            | LockError::MetadataCorrupt { .. }
            | LockError::SignalHandler(_) => Transience::Permanent,
            LockError::Io(_) => Transience::Unknown,
        }
    }

    pub fn effect(&self) -> Effect {
        // The lock is acquired before any mutation.
        Effect::None
    }
}

fn ensure_dir(path: &Path) -> Result<(), LockError> {
    match fs::symlink_metadata(path) {
        Ok(meta) => {
            if meta.file_type().is_symlink() {
                return Err(LockError::Symlink {
                    path: path.to_path_buf(),
                });
            }
            if !meta.is_dir() {
                return Err(LockError::Io(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("expected directory at {:?}", path),
                )));
            }
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(path)?;
        }
        Err(err) => return Err(LockError::Io(err)),
    }
    Ok(())
}

fn reject_symlink(path: &Path) -> Result<(), LockError> {
    if let Ok(meta) = fs::symlink_metadata(path)
        && meta.file_type().is_symlink()
    {
        return Err(LockError::Symlink {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

fn read_metadata(path: &Path) -> Result<RunLockMeta, LockError> {
    reject_symlink(path)?;
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|source| LockError::MetadataCorrupt {
        path: path.to_path_buf(),
        source,
    })
}

fn write_metadata(file: &mut fs::File, path: &Path, meta: &RunLockMeta) -> Result<(), LockError> {
    serde_json::to_writer(&mut *file, meta).map_err(|source| LockError::MetadataCorrupt {
        path: path.to_path_buf(),
        source,
    })?;
    file.sync_all()?;
    Ok(())
}

fn open_new_lock_file(path: &Path) -> Result<fs::File, LockError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true).mode(0o600);
        Ok(options.open(path)?)
    }
    #[cfg(not(unix))]
    {
        Ok(fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?)
    }
}

fn set_file_permissions(path: &Path, mode: u32) -> Result<(), LockError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perm = fs::Permissions::from_mode(mode);
        fs::set_permissions(path, perm)?;
    }
    #[cfg(not(unix))]
    {
        let _ = (path, mode);
    }
    Ok(())
}
