use super::{
    cleanup::{Arrangement, CleanupScheduler},
    node::{NodeDirectoryManager, NodeState},
    SyncError,
};
use crate::{
    config::{ConfigErrors, RunnerConfig},
    distributed::{util::resolve_node_path, ArrayTaskContext, SchedulerIds},
    executors::{local::TaskDispatcher, ExecutorError, Submitter},
};
use std::process::ExitStatus;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Invalid configuration")]
    Config(#[from] ConfigErrors),
    #[error("Failed to prepare the node directory")]
    Node(#[from] SyncError),
    #[error("Failed to dispatch the work item")]
    Dispatch(#[from] ExecutorError),
}

/// Runs a single array task: prepare -> dispatch -> schedule cleanup
#[derive(Debug)]
pub struct ArrayJobCoordinator<'a, S> {
    config: &'a RunnerConfig,
    submitter: &'a S,
    nodes: NodeDirectoryManager,
}

impl<'a, S: Submitter> ArrayJobCoordinator<'a, S> {
    pub fn new(config: &'a RunnerConfig, submitter: &'a S) -> Self {
        Self {
            config,
            submitter,
            nodes: NodeDirectoryManager::new(),
        }
    }

    /// the node directory of this task, shared with every task on the same node
    pub fn node_state(&self, ids: &SchedulerIds) -> NodeState {
        NodeState::new(resolve_node_path(
            &self.config.node_dir,
            &ids.node,
            &ids.job_id,
        ))
    }

    /// Execute the array task and return the status of the dispatched command.
    ///
    /// Cleanup is arranged even if the command failed or could not be started.
    /// Problems arranging it are logged and never change the returned status.
    #[instrument(skip_all, fields(job_id = %ids.job_id, index = ids.index, node = %ids.node))]
    pub fn execute(
        &self,
        ids: SchedulerIds,
        work_items: &[String],
    ) -> Result<ExitStatus, CoordinatorError> {
        let node = self.node_state(&ids);
        // resolving first keeps out of range indices free of side effects
        let context = ArrayTaskContext::resolve(ids, work_items, node)?;

        info!(
            work_item = %context.work_item,
            node_dir = ?context.node.path,
            node_list = ?context.ids.node_list,
            "Starting array task"
        );

        let preparation = self.nodes.ensure(&context.node)?;
        debug!(?preparation, "Node directory is ready");

        // a dispatch error still leaves a prepared node behind that needs cleaning
        let status = TaskDispatcher::load(self.config).run(&context);

        let mut scheduler = CleanupScheduler::new(self.submitter, &self.config.slurm);
        if let Some(ref dir) = self.config.slurm.script_dir {
            scheduler = scheduler.with_script_dir(dir.clone());
        }

        match scheduler.arrange(&context.node, &context.ids) {
            Ok(Arrangement::Submitted(job_id)) => {
                info!(cleanup_job = %job_id, "Submitted node cleanup")
            }
            Ok(Arrangement::AlreadySubmitted) => info!("Node cleanup is already scheduled"),
            Err(error) => warn!(
                error = ?error,
                node_dir = ?context.node.path,
                "Failed to arrange node cleanup, the node directory might leak: {error}"
            ),
        }

        Ok(status?)
    }
}
