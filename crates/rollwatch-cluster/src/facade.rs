//! The cluster facade contract.

use std::future::Future;
use std::pin::Pin;

use rollwatch_state::{Task, TaskArn, TaskFailure};

use crate::error::ClusterResult;

/// Most task arns a single describe call accepts.
pub const MAX_DESCRIBE_TASKS: usize = 100;

/// Boxed future alias for facade results.
pub type ClusterFuture<'a, T> = Pin<Box<dyn Future<Output = ClusterResult<T>> + Send + 'a>>;

/// Snapshot of a set of tasks: the ones the orchestrator could describe, and
/// a failure record for each one it could not.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskDescription {
    pub tasks: Vec<Task>,
    pub failures: Vec<TaskFailure>,
}

impl TaskDescription {
    /// Append another description (used when describing in batches).
    pub fn extend(&mut self, other: TaskDescription) {
        self.tasks.extend(other.tasks);
        self.failures.extend(other.failures);
    }
}

/// Task listing and description against the orchestration service.
pub trait ClusterFacade: Send + Sync {
    /// Arns of the tasks in `cluster` started by `started_by`.
    fn list_tasks<'a>(&'a self, cluster: &'a str, started_by: &'a str)
        -> ClusterFuture<'a, Vec<TaskArn>>;

    /// Describe up to [`MAX_DESCRIBE_TASKS`] tasks in `cluster`.
    fn describe_tasks<'a>(
        &'a self,
        cluster: &'a str,
        arns: &'a [TaskArn],
    ) -> ClusterFuture<'a, TaskDescription>;
}
