use super::ExecutorError;
use crate::{
    config::{ContainerConfig, RunnerConfig},
    distributed::{util::log_path, ArrayTaskContext},
};
use std::{
    collections::BTreeMap,
    ffi::OsString,
    fs::{self, File},
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
    time::Instant,
};
use tracing::{debug, info, instrument, warn};

pub const SHELL: &str = "/bin/sh";

pub const WORK_ITEM_VAR: &str = "NODESHARE_WORK_ITEM";
pub const NODE_DIR_VAR: &str = "NODESHARE_NODE_DIR";
pub const CONTAINER_ROOT_VAR: &str = "NODESHARE_CONTAINER_ROOT";
pub const CONTAINER_RUNROOT_VAR: &str = "NODESHARE_CONTAINER_RUNROOT";

/// Runs the command of a single work item inside the node directory
#[derive(Debug, Clone)]
pub struct TaskDispatcher<'a> {
    command: &'a str,
    log_base: &'a Path,
    env: &'a BTreeMap<String, String>,
    container: &'a ContainerConfig,
}

impl<'a> TaskDispatcher<'a> {
    pub fn load(config: &'a RunnerConfig) -> Self {
        Self {
            command: &config.command,
            log_base: &config.log,
            env: &config.env,
            container: &config.container,
        }
    }

    pub fn log_path(&self, context: &ArrayTaskContext) -> PathBuf {
        log_path(self.log_base, &context.work_item)
    }

    /// Environment of the command. Configured variables come first, the node scoped
    /// bindings are applied last so they cannot be redirected away from the node.
    pub fn environment(&self, context: &ArrayTaskContext) -> Vec<(OsString, OsString)> {
        let node_dir = &context.node.path;
        let mut env = self
            .env
            .iter()
            .map(|(key, value)| (OsString::from(key), OsString::from(value)))
            .collect::<Vec<_>>();

        env.extend([
            (OsString::from("HOME"), node_dir.clone().into_os_string()),
            (
                OsString::from("XDG_RUNTIME_DIR"),
                node_dir.clone().into_os_string(),
            ),
            (OsString::from(NODE_DIR_VAR), node_dir.clone().into_os_string()),
            (
                OsString::from(CONTAINER_ROOT_VAR),
                node_dir.join(&self.container.root).into_os_string(),
            ),
            (
                OsString::from(CONTAINER_RUNROOT_VAR),
                node_dir.join(&self.container.runroot).into_os_string(),
            ),
            (
                OsString::from(WORK_ITEM_VAR),
                OsString::from(&context.work_item),
            ),
        ]);

        env
    }

    /// Execute the command synchronously, stdout and stderr go to the work item's log.
    /// A failing command is not an error, its status is handed back as is.
    #[instrument(skip(self, context), fields(work_item = %context.work_item), level = "info")]
    pub fn run(&self, context: &ArrayTaskContext) -> Result<ExitStatus, ExecutorError> {
        let node_dir = &context.node.path;

        for dir in [&self.container.root, &self.container.runroot] {
            let path = node_dir.join(dir);
            fs::create_dir_all(&path)
                .map_err(|source| ExecutorError::Prepare { path, source })?;
        }

        let log = self.log_path(context);
        let stdout = open_log(&log)?;
        let stderr = stdout.try_clone().map_err(|source| ExecutorError::LogFile {
            path: log.clone(),
            source,
        })?;

        debug!(log = ?log, "Running `{}`", self.command);
        let start = Instant::now();

        let status = Command::new(SHELL)
            .arg("-c")
            .arg(self.command)
            .current_dir(node_dir)
            .envs(self.environment(context))
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .status()
            .map_err(|source| ExecutorError::Spawn {
                program: SHELL.to_owned(),
                source,
            })?;

        let elapsed = start.elapsed();
        if status.success() {
            info!("Finished in {} ms | status: {status}", elapsed.as_millis());
        } else {
            warn!(
                log = ?log,
                "Failed after {} ms | status: {status}",
                elapsed.as_millis()
            );
        }

        Ok(status)
    }
}

/// work items like `project/version` put their log into a subdirectory of the base
fn open_log(path: &Path) -> Result<File, ExecutorError> {
    let error = |source: std::io::Error| ExecutorError::LogFile {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(error)?;
    }

    File::create(path).map_err(error)
}
