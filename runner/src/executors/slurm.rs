use super::{ExecutorError, Submitter};
use crate::{config::SlurmConfig, sync::node::NodeState};
use shell_escape::unix::escape;
use std::{
    borrow::Cow,
    io::{self, Read},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread::{self, JoinHandle},
    time::Duration,
};
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

/// quote a path for interpolation into a shell script
pub fn quote(path: &Path) -> String {
    escape(Cow::from(path.to_string_lossy())).into_owned()
}

/// Submits scripts with `sbatch --parsable`
#[derive(Debug, Clone)]
pub struct SlurmSubmitter {
    sbatch: PathBuf,
    timeout: Duration,
}

impl SlurmSubmitter {
    pub fn new(sbatch: PathBuf, timeout: Duration) -> Self {
        Self { sbatch, timeout }
    }

    pub fn load(config: &SlurmConfig) -> Self {
        Self::new(
            config.sbatch.clone(),
            Duration::from_secs(config.submit_timeout_secs),
        )
    }
}

impl Submitter for SlurmSubmitter {
    #[tracing::instrument(skip(self), level = "debug")]
    fn submit(&self, script: &Path) -> Result<String, ExecutorError> {
        let mut child = Command::new(&self.sbatch)
            .arg("--parsable")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ExecutorError::Spawn {
                program: self.sbatch.to_string_lossy().into_owned(),
                source,
            })?;

        // drain while waiting, a full pipe would otherwise stall sbatch
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let status = match child.wait_timeout(self.timeout)? {
            Some(status) => status,
            None => {
                warn!("sbatch ran into a timeout, killing it");
                child.kill()?;
                child.wait()?;

                return Err(ExecutorError::SubmitTimeout(self.timeout.as_secs()));
            }
        };

        let stdout = collect(stdout)?;
        let stderr = collect(stderr)?;

        if !status.success() {
            return Err(ExecutorError::Rejected {
                status,
                stderr: stderr.trim().to_owned(),
            });
        }

        let job_id = parse_job_id(&stdout).ok_or(ExecutorError::MissingJobId)?;
        info!(job_id = %job_id, "Submitted batch job");

        Ok(job_id)
    }
}

fn drain<R>(pipe: Option<R>) -> JoinHandle<io::Result<String>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut output = String::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_string(&mut output)?;
        }

        Ok(output)
    })
}

fn collect(reader: JoinHandle<io::Result<String>>) -> Result<String, ExecutorError> {
    match reader.join() {
        Ok(output) => Ok(output?),
        Err(_) => Err(io::Error::new(io::ErrorKind::Other, "pipe reader panicked").into()),
    }
}

/// `--parsable` prints `<job id>[;<cluster>]`
pub fn parse_job_id(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.split(';').next())
        .filter(|id| !id.is_empty())
        .map(String::from)
}

/// Deferred job removing a node directory once the array job has finished
#[derive(Debug, Clone)]
pub struct CleanupJob<'a> {
    pub node: &'a NodeState,
    pub array_job_id: &'a str,
    pub node_name: &'a str,
    pub slurm: &'a SlurmConfig,
}

impl CleanupJob<'_> {
    pub fn render(&self) -> String {
        let mut script = String::from("#!/bin/sh\n");

        script.push_str("#SBATCH -o /dev/null\n");
        script.push_str(&format!("#SBATCH --job-name={}-cleanup\n", self.slurm.job_name));
        script.push_str(&format!("#SBATCH -A {}\n", self.slurm.account));
        script.push_str(&format!("#SBATCH -p {}\n", self.slurm.partition));
        script.push_str(&format!("#SBATCH --nice={}\n", self.slurm.cleanup_nice));
        script.push_str(&format!("#SBATCH --time={}\n", self.slurm.cleanup_time));
        script.push_str(&format!("#SBATCH --dependency=afterany:{}\n", self.array_job_id));
        script.push_str(&format!("#SBATCH --nodelist={}\n", self.node_name));
        script.push_str("#SBATCH -n 1\n");
        script.push_str("#SBATCH -c 1\n");
        script.push('\n');
        script.push_str(&format!("rm -rf {}\n", quote(&self.node.path)));
        script.push_str(&format!("rm -f {}\n", quote(&self.node.cleanup_lock_path)));

        debug!("Rendered cleanup job:\n{script}");

        script
    }
}

/// The array job running one `task` per work item
#[derive(Debug, Clone)]
pub struct ArrayJob<'a> {
    pub work_items: usize,
    pub program: &'a Path,
    pub config: &'a Path,
    pub slurm: &'a SlurmConfig,
}

impl ArrayJob<'_> {
    /// `0-<n-1>`, capped with `%<max_running>` when a cap is set
    pub fn array_range(&self) -> Option<String> {
        let last = self.work_items.checked_sub(1)?;

        Some(match self.slurm.max_running {
            0 => format!("0-{last}"),
            cap => format!("0-{last}%{cap}"),
        })
    }

    pub fn render(&self) -> Option<String> {
        let range = self.array_range()?;
        let mut script = String::from("#!/bin/sh\n");

        script.push_str("#SBATCH -o /dev/null\n");
        script.push_str(&format!("#SBATCH --job-name={}\n", self.slurm.job_name));
        script.push_str(&format!("#SBATCH -A {}\n", self.slurm.account));
        script.push_str(&format!("#SBATCH -p {}\n", self.slurm.partition));
        script.push_str(&format!("#SBATCH --array={range}\n"));
        script.push('\n');
        script.push_str(&format!(
            "exec {} --config {} task\n",
            quote(self.program),
            quote(self.config)
        ));

        Some(script)
    }
}
