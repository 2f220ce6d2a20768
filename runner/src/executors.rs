pub mod local;
pub mod slurm;

#[cfg(test)]
pub mod testing;


use std::{path::PathBuf, process::ExitStatus};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Failed to open log file {path:?}")]
    LogFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to prepare {path:?}")]
    Prepare {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to spawn {program}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("Failed to wait for a child proccess")]
    ChildError(#[from] std::io::Error),
    #[error("Submission was rejected ({status}): {stderr}")]
    Rejected { status: ExitStatus, stderr: String },
    #[error("Submission did not finish within {0} seconds")]
    SubmitTimeout(u64),
    #[error("Scheduler returned no job id")]
    MissingJobId,
}

/// Hands a batch script to the scheduler
pub trait Submitter {
    /// Submit the script at `script`, returns the job id assigned by the scheduler.
    /// The script may be deleted as soon as this returns.
    fn submit(&self, script: &std::path::Path) -> Result<String, ExecutorError>;
}
