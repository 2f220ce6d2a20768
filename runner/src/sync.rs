pub mod cleanup;
pub mod coordinator;
pub mod locking;
pub mod node;

#[cfg(test)]
mod node_test;

use std::path::PathBuf;
use thiserror::Error;

/* Node lifecycle per occupancy:
 * Absent -> Preparing -> Ready -> CleanupSubmitted -> Removed
 *
 * - Absent -> Ready is guarded by `<node>.lock` (node::NodeDirectoryManager)
 * - Ready -> CleanupSubmitted is guarded by a lock on the node directory itself and
 *   latched by `<node>.clean-in-progress.lock` (cleanup::CleanupScheduler)
 * - CleanupSubmitted -> Removed happens in the deferred cleanup job, which also
 *   removes the latch so the next occupancy starts over
 *
 * The two locks are never held at the same time by one task.
 */

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Failed to open {path:?} for locking")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to lock {path:?}")]
    Lock {
        path: PathBuf,
        source: nix::Error,
    },
    #[error("Failed to create node directory {path:?}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write the cleanup latch {path:?}")]
    Latch {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write the cleanup script")]
    Script(#[source] std::io::Error),
}
