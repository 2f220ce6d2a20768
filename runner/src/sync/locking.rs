use super::SyncError;
use nix::fcntl::{flock, FlockArg};
use std::{
    fs::{File, OpenOptions},
    os::unix::io::AsRawFd,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/* Locks are advisory flock(2) locks on an open file description.
 * - the content or existence of the locked file carries no meaning
 * - the kernel drops the lock once the last descriptor closes, which includes the
 *   process dying while holding it, so a crashed task never wedges its node
 * - flock works on directories as well, see `AdvisoryLock::directory`
 */

/// Exclusive advisory lock, released on drop
#[derive(Debug)]
pub struct AdvisoryLock {
    file: File,
    path: PathBuf,
}

impl AdvisoryLock {
    /// Block until an exclusive lock on the lock file at `path` is held,
    /// the file is created if necessary
    pub fn acquire(path: &Path) -> Result<Self, SyncError> {
        let file = Self::open_lock_file(path)?;

        Self::lock(file, path, FlockArg::LockExclusive)
    }

    /// Like `acquire` but returns `None` instead of blocking
    #[cfg(test)]
    pub fn try_acquire(path: &Path) -> Result<Option<Self>, SyncError> {
        let file = Self::open_lock_file(path)?;

        match Self::lock(file, path, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => Ok(Some(lock)),
            Err(SyncError::Lock { source, .. }) if source == nix::errno::Errno::EWOULDBLOCK => {
                debug!(path = ?path, "Lock is held by someone else");

                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    /// Block until an exclusive lock on an existing directory is held
    pub fn directory(path: &Path) -> Result<Self, SyncError> {
        let file = File::open(path).map_err(|source| SyncError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        Self::lock(file, path, FlockArg::LockExclusive)
    }

    fn open_lock_file(path: &Path) -> Result<File, SyncError> {
        OpenOptions::new()
            .create(true)
            .write(true)
            .open(path)
            .map_err(|source| SyncError::Open {
                path: path.to_path_buf(),
                source,
            })
    }

    fn lock(file: File, path: &Path, arg: FlockArg) -> Result<Self, SyncError> {
        debug!(path = ?path, "Acquiring lock");

        flock(file.as_raw_fd(), arg).map_err(|source| SyncError::Lock {
            path: path.to_path_buf(),
            source,
        })?;

        debug!(path = ?path, "Acquired lock");

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for AdvisoryLock {
    fn drop(&mut self) {
        // closing the descriptor releases the lock as well, unlocking first keeps the
        // release independent of other descriptors sharing the open file description
        match flock(self.file.as_raw_fd(), FlockArg::Unlock) {
            Ok(()) => debug!(path = ?self.path, "Released lock"),
            Err(error) => warn!(path = ?self.path, error = ?error, "Failed to release lock"),
        }
    }
}
