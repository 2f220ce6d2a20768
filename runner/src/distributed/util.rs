use crate::config::ConfigErrors;
use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};
use tracing::error;

/// name of the current host, used when the scheduler did not tell us the node name
pub fn hostname() -> Result<String, ConfigErrors> {
    match nix::unistd::gethostname() {
        Ok(hostname) => Ok(hostname.to_string_lossy().into_owned()),
        Err(error) => {
            error!(error = ?error, "Failed to retrieve hostname for the node directory: {error}");

            Err(ConfigErrors::MissingParameter("hostname"))
        }
    }
}

pub const NODE_PLACEHOLDER: &str = "{node}";
pub const JOB_ID_PLACEHOLDER: &str = "{job_id}";

/// Resolve the node directory of one array job on one node.
///
/// `{node}` and `{job_id}` in the template are replaced, an identifier the
/// template does not mention is appended to the final component instead. So
/// `/scratch/{node}/` becomes `/scratch/n07-4711` and `/scratch/nodeshare`
/// becomes `/scratch/nodeshare-n07-4711`. Every (node, array job) pair gets its
/// own directory and latch, even on a filesystem shared between nodes.
pub fn resolve_node_path(template: &Path, node: &str, job_id: &str) -> PathBuf {
    // yaml configs are utf-8, nothing is lost here
    let template = template.to_string_lossy();

    let mut suffix = String::new();
    for (placeholder, value) in [(NODE_PLACEHOLDER, node), (JOB_ID_PLACEHOLDER, job_id)] {
        if !template.contains(placeholder) {
            suffix.push('-');
            suffix.push_str(value);
        }
    }

    let expanded = template
        .replace(NODE_PLACEHOLDER, node)
        .replace(JOB_ID_PLACEHOLDER, job_id);
    // components() normalizes trailing separators and repeated slashes
    let path: PathBuf = Path::new(&expanded).components().collect();

    with_suffix(&path, &suffix)
}

/// Append `suffix` to the final component of `path`, e.g. `/a/b` -> `/a/b.lock`
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut joined = OsString::from(path.as_os_str());
    joined.push(suffix);

    PathBuf::from(joined)
}

/// Log file of a single work item: `<base>-<work item>`
pub fn log_path(base: &Path, work_item: &str) -> PathBuf {
    with_suffix(base, &format!("-{work_item}"))
}

pub fn resolve_work_item(work_items: &[String], index: usize) -> Result<&str, ConfigErrors> {
    work_items
        .get(index)
        .map(String::as_str)
        .ok_or(ConfigErrors::IndexOutOfRange {
            index,
            len: work_items.len(),
        })
}
