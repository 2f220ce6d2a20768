pub mod util;


/*
 * Distributed execution over a slurm array job:
 * -> every array task is its own process, possibly sharing a node with other tasks
 * -> tasks on the same node share one working directory, coordinated with flock(2)
 * -> no coordinator process, the scheduler only hands out (job id, index, node)
 */

use crate::{config::ConfigErrors, sync::node::NodeState};
use std::env;
use tracing::debug;

pub const ARRAY_JOB_ID: &str = "SLURM_ARRAY_JOB_ID";
pub const ARRAY_TASK_ID: &str = "SLURM_ARRAY_TASK_ID";
pub const NODE_NAME: &str = "SLURMD_NODENAME";
pub const NODE_LIST: &str = "SLURM_JOB_NODELIST";

/// Identifiers handed out by the scheduler to a single array task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerIds {
    pub job_id: String,
    pub index: usize,
    pub node: String,
    pub node_list: Option<String>,
}

impl SchedulerIds {
    /// Collect the identifiers, explicit values take precedence over the environment
    pub fn collect(
        job_id: Option<String>,
        index: Option<usize>,
        node: Option<String>,
    ) -> Result<Self, ConfigErrors> {
        Self::collect_with(job_id, index, node, |name| env::var(name).ok())
    }

    /// Like `collect`, but read scheduler variables through `lookup`
    pub fn collect_with<F>(
        job_id: Option<String>,
        index: Option<usize>,
        node: Option<String>,
        lookup: F,
    ) -> Result<Self, ConfigErrors>
    where
        F: Fn(&str) -> Option<String>,
    {
        let job_id = job_id
            .or_else(|| lookup(ARRAY_JOB_ID))
            .filter(|id| !id.is_empty())
            .ok_or(ConfigErrors::MissingParameter(ARRAY_JOB_ID))?;

        let index = match index {
            Some(index) => index,
            None => {
                let value =
                    lookup(ARRAY_TASK_ID).ok_or(ConfigErrors::MissingParameter(ARRAY_TASK_ID))?;

                match value.trim().parse::<usize>() {
                    Ok(index) => index,
                    Err(_) => {
                        return Err(ConfigErrors::InvalidParameter {
                            name: ARRAY_TASK_ID,
                            value,
                        })
                    }
                }
            }
        };

        let node = match node.or_else(|| lookup(NODE_NAME)) {
            Some(node) if !node.is_empty() => node,
            _ => util::hostname()?,
        };

        let node_list = lookup(NODE_LIST).filter(|list| !list.is_empty());

        debug!(job_id = %job_id, index, node = %node, "Collected scheduler identifiers");

        Ok(Self {
            job_id,
            index,
            node,
            node_list,
        })
    }

    /// the nodelist used to pin the cleanup job, this is the node the task runs on
    pub fn cleanup_nodelist(&self) -> &str {
        &self.node
    }
}

/// Per task context, created at task start and never persisted
#[derive(Debug, Clone)]
pub struct ArrayTaskContext {
    pub ids: SchedulerIds,
    pub work_item: String,
    pub node: NodeState,
}

impl ArrayTaskContext {
    /// Bind the array index to its work item, out of range indices are rejected
    /// before anything touches the filesystem
    pub fn resolve(
        ids: SchedulerIds,
        work_items: &[String],
        node: NodeState,
    ) -> Result<Self, ConfigErrors> {
        let work_item = util::resolve_work_item(work_items, ids.index)?.to_owned();

        Ok(Self {
            ids,
            work_item,
            node,
        })
    }
}
