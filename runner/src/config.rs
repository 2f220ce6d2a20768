use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    io::Error,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, error, warn};

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Failed to read config file {path:?}")]
    ReadConfig { path: PathBuf, source: Error },
    #[error("Failed to parse config file")]
    ParseConfig(#[from] serde_yaml::Error),
    #[error("Failed to read work items from {path:?}")]
    ReadWorkItems { path: PathBuf, source: Error },
    #[error("Config failed the preflight checks")]
    Preflight,
    #[error("Missing required parameter {0}")]
    MissingParameter(&'static str),
    #[error("Invalid value for {name}: {value}")]
    InvalidParameter { name: &'static str, value: String },
    #[error("Array index {index} is out of range for {len} work items")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("No work items were defined")]
    NoWorkItems,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct RunnerConfig {
    // work items given inline, e.g. `project/version`
    #[serde(default)]
    pub work_items: Vec<String>,
    // newline separated work items, appended after the inline ones
    pub work_items_file: Option<PathBuf>,

    // template of the shared node directory, may use `{node}` and `{job_id}`
    pub node_dir: PathBuf,

    // shell command executed per work item
    pub command: String,
    // base name of the per work item log file
    pub log: PathBuf,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub container: ContainerConfig,

    pub slurm: SlurmConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct ContainerConfig {
    // both relative to the node directory
    #[serde(default = "default_container_root")]
    pub root: PathBuf,
    #[serde(default = "default_container_runroot")]
    pub runroot: PathBuf,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            root: default_container_root(),
            runroot: default_container_runroot(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct SlurmConfig {
    pub account: String,
    pub partition: String,
    // maximum number of concurrently running array tasks, 0 means unbounded
    #[serde(default)]
    pub max_running: usize,
    #[serde(default = "default_cleanup_nice")]
    pub cleanup_nice: i64,
    #[serde(default = "default_cleanup_time")]
    pub cleanup_time: String,
    #[serde(default = "default_submit_timeout")]
    pub submit_timeout_secs: u64,
    #[serde(default = "default_sbatch")]
    pub sbatch: PathBuf,
    #[serde(default = "default_job_name")]
    pub job_name: String,
    // where transient cleanup scripts are written, defaults to the temp dir
    pub script_dir: Option<PathBuf>,
}

impl RunnerConfig {
    /// read and parse a yaml config file
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let content = fs::read_to_string(path).map_err(|source| ConfigErrors::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigErrors> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Collect the ordered list of work items, inline items first
    pub fn resolve_work_items(&self) -> Result<Vec<String>, ConfigErrors> {
        let mut items = self.work_items.clone();

        if let Some(ref path) = self.work_items_file {
            let content =
                fs::read_to_string(path).map_err(|source| ConfigErrors::ReadWorkItems {
                    path: path.clone(),
                    source,
                })?;

            items.extend(parse_work_items(&content));
        }

        debug!("Resolved {} work items", items.len());

        if items.is_empty() {
            Err(ConfigErrors::NoWorkItems)
        } else {
            Ok(items)
        }
    }

    /// Check the config for all errors at once to make debugging easier for users
    pub fn preflight_checks(&self) -> Result<(), ConfigErrors> {
        let mut contains_error = false;

        if self.work_items.is_empty() && self.work_items_file.is_none() {
            error!("Neither 'work_items' nor 'work_items_file' is set, there is nothing to run");
            contains_error = true;
        }

        let duplicates = self.work_items.iter().duplicates().collect_vec();
        if !duplicates.is_empty() {
            warn!(
                "work_items contains duplicates ({}), their logs will overwrite each other",
                duplicates.iter().join(", ")
            );
        }

        if !self.node_dir.is_absolute() {
            error!(
                "node_dir must be an absolute path, got {}",
                self.node_dir.to_string_lossy()
            );
            contains_error = true;
        }

        if self.node_dir.file_name().is_none() {
            error!(
                "node_dir must name a directory below a parent, got {}",
                self.node_dir.to_string_lossy()
            );
            contains_error = true;
        }

        if self.command.trim().is_empty() {
            error!("command cannot be empty");
            contains_error = true;
        }

        if !self.log.is_absolute() {
            error!(
                "log must be an absolute path, got {}",
                self.log.to_string_lossy()
            );
            contains_error = true;
        }

        for (name, path) in [
            ("container.root", &self.container.root),
            ("container.runroot", &self.container.runroot),
        ] {
            if path.is_absolute() {
                error!("{name} must be relative to node_dir, got {}", path.to_string_lossy());
                contains_error = true;
            }
        }

        if self.slurm.account.trim().is_empty() {
            error!("slurm.account cannot be empty");
            contains_error = true;
        }

        if self.slurm.partition.trim().is_empty() {
            error!("slurm.partition cannot be empty");
            contains_error = true;
        }

        // these end up verbatim in #SBATCH header lines
        for (name, value) in [
            ("slurm.account", &self.slurm.account),
            ("slurm.partition", &self.slurm.partition),
            ("slurm.job_name", &self.slurm.job_name),
            ("slurm.cleanup_time", &self.slurm.cleanup_time),
        ] {
            if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
                error!("{name} cannot contain whitespace, got {value:?}");
                contains_error = true;
            }
        }

        if self.slurm.job_name.is_empty() {
            error!("slurm.job_name cannot be empty");
            contains_error = true;
        }

        if self.slurm.cleanup_time.is_empty() {
            error!("slurm.cleanup_time cannot be empty");
            contains_error = true;
        }

        if self.slurm.submit_timeout_secs == 0 {
            error!("slurm.submit_timeout_secs cannot be 0");
            contains_error = true;
        }

        if contains_error {
            Err(ConfigErrors::Preflight)
        } else {
            Ok(())
        }
    }
}

/// one work item per line, blank lines and `#` comments are skipped
pub fn parse_work_items(content: &str) -> impl Iterator<Item = String> + '_ {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
}

fn default_container_root() -> PathBuf {
    PathBuf::from("containers/lib")
}

fn default_container_runroot() -> PathBuf {
    PathBuf::from("containers/run")
}

fn default_cleanup_nice() -> i64 {
    2147483645
}

fn default_cleanup_time() -> String {
    String::from("15:00")
}

fn default_submit_timeout() -> u64 {
    60
}

fn default_sbatch() -> PathBuf {
    PathBuf::from("sbatch")
}

fn default_job_name() -> String {
    String::from("nodeshare")
}
