//! Host-wide serialisation of the connect window.
//!
//! Discovery works by diffing device listings taken before and after a
//! connect, which is only sound when no other connect runs on the host at
//! the same time. Every driver invocation is its own process, so the lock is
//! an exclusive `flock(2)` on a shared file.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};
use tracing::debug;

use crate::error::NvmeofError;

/// Held for the duration of one snapshot → connect → snapshot window.
/// Released on drop.
pub struct HostLock {
    _lock: Flock<File>,
    path: PathBuf,
}

impl HostLock {
    /// Block until the exclusive lock on `path` is acquired, creating the
    /// file (and its parent directory) if needed.
    pub fn acquire(path: &Path) -> Result<Self, NvmeofError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| lock_err(path, e))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| lock_err(path, e))?;

        let lock = Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, e)| lock_err(path, e))?;
        debug!(path = %path.display(), "attach lock acquired");
        Ok(Self {
            _lock: lock,
            path: path.to_path_buf(),
        })
    }

    /// Take the lock only if nobody holds it.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>, NvmeofError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| lock_err(path, e))?;

        match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => Ok(Some(Self {
                _lock: lock,
                path: path.to_path_buf(),
            })),
            Err((_, nix::errno::Errno::EWOULDBLOCK)) => Ok(None),
            Err((_, e)) => Err(lock_err(path, e)),
        }
    }
}

impl Drop for HostLock {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "attach lock released");
    }
}

fn lock_err<E: std::fmt::Display>(path: &Path, e: E) -> NvmeofError {
    NvmeofError::HostLock {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}
