use super::{locking::AdvisoryLock, node::NodeState, SyncError};
use crate::{
    config::SlurmConfig,
    distributed::SchedulerIds,
    executors::{slurm::CleanupJob, ExecutorError, Submitter},
};
use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

#[derive(Error, Debug)]
pub enum CleanupError {
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("Failed to submit the cleanup job")]
    Submission(#[from] ExecutorError),
}

/// Result of a single `arrange` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arrangement {
    /// this task submitted the cleanup job with the given id
    Submitted(String),
    /// another task of this occupancy already did
    AlreadySubmitted,
}

/// Arranges exactly one deferred cleanup job per node occupancy
#[derive(Debug)]
pub struct CleanupScheduler<'a, S> {
    submitter: &'a S,
    slurm: &'a SlurmConfig,
    script_dir: Option<PathBuf>,
}

impl<'a, S: Submitter> CleanupScheduler<'a, S> {
    pub fn new(submitter: &'a S, slurm: &'a SlurmConfig) -> Self {
        Self {
            submitter,
            slurm,
            script_dir: None,
        }
    }

    /// place transient scripts in `dir` instead of the default temp dir
    pub fn with_script_dir(mut self, dir: PathBuf) -> Self {
        self.script_dir = Some(dir);
        self
    }

    /// Make sure a cleanup job for `node` is submitted, at most once per occupancy.
    ///
    /// The job depends on the completion of the whole array job `ids.job_id` and is
    /// pinned to `ids.node`. Any number of tasks may race here, the latch check and
    /// the submission run under an exclusive lock on the node directory.
    #[instrument(skip(self, node, ids), fields(node_dir = ?node.path, job_id = %ids.job_id), level = "debug")]
    pub fn arrange(
        &self,
        node: &NodeState,
        ids: &SchedulerIds,
    ) -> Result<Arrangement, CleanupError> {
        // the latch is only ever set under the lock, seeing it here is conclusive
        if node.cleanup_submitted() {
            debug!("Cleanup was already submitted");

            return Ok(Arrangement::AlreadySubmitted);
        }

        let job = CleanupJob {
            node,
            array_job_id: &ids.job_id,
            node_name: ids.cleanup_nodelist(),
            slurm: self.slurm,
        };
        let script = self.materialize(&job.render())?;

        let guarded = GuardedSubmission {
            node_dir: &node.path,
            latch: &node.cleanup_lock_path,
            script: script.path(),
        };
        let result = guarded.execute(self.submitter);

        let script_path = script.path().to_path_buf();
        if let Err(error) = script.close() {
            warn!(path = ?script_path, error = ?error, "Failed to remove cleanup script");
        }

        result
    }

    fn materialize(&self, content: &str) -> Result<NamedTempFile, SyncError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("nodeshare-cleanup-").suffix(".sh");

        let mut file = match self.script_dir {
            Some(ref dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(SyncError::Script)?;

        file.write_all(content.as_bytes())
            .and_then(|()| file.flush())
            .map_err(SyncError::Script)?;

        debug!(path = ?file.path(), "Materialized cleanup script");

        Ok(file)
    }
}

/// Check latch, submit, set latch. Only meaningful while holding the directory lock.
#[derive(Debug)]
struct GuardedSubmission<'a> {
    node_dir: &'a Path,
    latch: &'a Path,
    script: &'a Path,
}

impl GuardedSubmission<'_> {
    fn execute<S: Submitter>(&self, submitter: &S) -> Result<Arrangement, CleanupError> {
        let _lock = AdvisoryLock::directory(self.node_dir)?;

        if self.latch.exists() {
            debug!(latch = ?self.latch, "Cleanup was already submitted");

            return Ok(Arrangement::AlreadySubmitted);
        }

        // the latch is only set once the scheduler accepted the job, a rejected
        // submission leaves it unset so the next task on this node retries
        let job_id = submitter.submit(self.script)?;

        File::create(self.latch).map_err(|source| SyncError::Latch {
            path: self.latch.to_path_buf(),
            source,
        })?;

        info!(cleanup_job = %job_id, "Scheduled node cleanup");

        Ok(Arrangement::Submitted(job_id))
    }
}
