use super::{ExecutorError, Submitter};
use crate::{config::RunnerConfig, distributed::SchedulerIds};
use parking_lot::Mutex;
use std::{
    fs,
    os::unix::process::ExitStatusExt,
    path::{Path, PathBuf},
    process::ExitStatus,
};

/// Accepts every submission and keeps a copy of the submitted script
#[derive(Debug, Default)]
pub struct RecordingSubmitter {
    pub scripts: Mutex<Vec<(PathBuf, String)>>,
}

impl RecordingSubmitter {
    pub fn submissions(&self) -> usize {
        self.scripts.lock().len()
    }
}

impl Submitter for RecordingSubmitter {
    fn submit(&self, script: &Path) -> Result<String, ExecutorError> {
        let content = fs::read_to_string(script)?;
        let mut scripts = self.scripts.lock();
        scripts.push((script.to_path_buf(), content));

        Ok(format!("{}", 1000 + scripts.len()))
    }
}

/// Rejects every submission like sbatch does for an unknown account
#[derive(Debug, Default)]
pub struct RejectingSubmitter {
    pub attempts: Mutex<usize>,
}

impl Submitter for RejectingSubmitter {
    fn submit(&self, _script: &Path) -> Result<String, ExecutorError> {
        *self.attempts.lock() += 1;

        Err(ExecutorError::Rejected {
            status: ExitStatus::from_raw(1 << 8),
            stderr: String::from(
                "sbatch: error: Invalid account or account/partition combination specified",
            ),
        })
    }
}

/// config rooted in a scratch directory, transient scripts go to `<root>/scripts`
pub fn test_config(root: &Path) -> RunnerConfig {
    fs::create_dir_all(root.join("scripts")).unwrap();

    let yaml = format!(
        r#"
work_items:
  - proj/v1
  - proj/v2
node_dir: "{root}/scratch/{{node}}/"
command: echo "$NODESHARE_WORK_ITEM in $HOME"
log: {root}/logs/run
slurm:
  account: ls-project
  partition: anywhere
  script_dir: {root}/scripts
"#,
        root = root.display()
    );

    RunnerConfig::parse(&yaml).unwrap()
}

pub fn test_ids(index: usize) -> SchedulerIds {
    scheduler_ids("4711", "n07", index)
}

pub fn scheduler_ids(job_id: &str, node: &str, index: usize) -> SchedulerIds {
    SchedulerIds {
        job_id: String::from(job_id),
        index,
        node: String::from(node),
        node_list: Some(String::from("n[07-08]")),
    }
}
