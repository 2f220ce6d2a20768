use super::{locking::AdvisoryLock, SyncError};
use crate::distributed::util::with_suffix;
use std::{fs, io, path::PathBuf};
use tracing::{debug, info, instrument, warn};

pub const LOCK_SUFFIX: &str = ".lock";
pub const CLEANUP_LOCK_SUFFIX: &str = ".clean-in-progress.lock";

/// The shared directory of one physical node and the files coordinating it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeState {
    pub path: PathBuf,
    pub lock_path: PathBuf,
    pub cleanup_lock_path: PathBuf,
}

impl NodeState {
    pub fn new(path: PathBuf) -> Self {
        Self {
            lock_path: with_suffix(&path, LOCK_SUFFIX),
            cleanup_lock_path: with_suffix(&path, CLEANUP_LOCK_SUFFIX),
            path,
        }
    }

    /// observed, never cached
    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    pub fn cleanup_submitted(&self) -> bool {
        self.cleanup_lock_path.exists()
    }
}

/// Outcome of preparing a node directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preparation {
    Created,
    Existing,
}

#[derive(Debug, Default, Clone)]
pub struct NodeDirectoryManager;

impl NodeDirectoryManager {
    pub fn new() -> Self {
        Self
    }

    /// Make sure the node directory exists, safe to call from any number of tasks
    /// starting on the node at the same time.
    ///
    /// The existence check and the creation happen under an exclusive lock on
    /// `<node>.lock`. Blocks for as long as another task holds that lock.
    #[instrument(skip(self, node), fields(node_dir = ?node.path), level = "debug")]
    pub fn ensure(&self, node: &NodeState) -> Result<Preparation, SyncError> {
        // the lock file lives next to the node directory
        if let Some(parent) = node.lock_path.parent() {
            fs::create_dir_all(parent).map_err(|source| SyncError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let result = {
            let _lock = AdvisoryLock::acquire(&node.lock_path)?;

            Self::check_and_create(node)
        };

        // the lock file only exists for the flock, losing it is harmless
        match fs::remove_file(&node.lock_path) {
            Ok(()) => debug!(path = ?node.lock_path, "Removed lock file"),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(error) => warn!(path = ?node.lock_path, error = ?error, "Failed to remove lock file"),
        }

        result
    }

    fn check_and_create(node: &NodeState) -> Result<Preparation, SyncError> {
        let path = &node.path;

        if node.exists() {
            debug!("Node directory already exists");

            return Ok(Preparation::Existing);
        }

        // the parent exists already, it holds the lock file
        match fs::create_dir(path) {
            Ok(()) => {
                info!(path = ?path, "Created node directory");

                Ok(Preparation::Created)
            }
            // a holder of an unlinked lock file got here first
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => {
                debug!("Node directory appeared concurrently");

                Ok(Preparation::Existing)
            }
            Err(source) => Err(SyncError::CreateDirectory {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}
