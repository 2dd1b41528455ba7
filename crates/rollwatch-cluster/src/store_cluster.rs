//! Cluster facade backed by the task records in the state store.

use rollwatch_state::{StateStore, TaskArn, TaskFailure};
use tracing::debug;

use crate::error::ClusterError;
use crate::facade::{ClusterFacade, ClusterFuture, MAX_DESCRIBE_TASKS, TaskDescription};

/// Failure reason reported for an arn with no task record.
pub const MISSING_REASON: &str = "MISSING";

/// [`ClusterFacade`] over the `tasks` table of a [`StateStore`].
#[derive(Clone)]
pub struct StoreCluster {
    state: StateStore,
}

impl StoreCluster {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }
}

impl ClusterFacade for StoreCluster {
    fn list_tasks<'a>(
        &'a self,
        cluster: &'a str,
        started_by: &'a str,
    ) -> ClusterFuture<'a, Vec<TaskArn>> {
        Box::pin(async move {
            let tasks = self.state.list_tasks_started_by(cluster, started_by)?;
            debug!(%cluster, %started_by, count = tasks.len(), "listed tasks");
            Ok(tasks.into_iter().map(|t| t.arn).collect())
        })
    }

    fn describe_tasks<'a>(
        &'a self,
        cluster: &'a str,
        arns: &'a [TaskArn],
    ) -> ClusterFuture<'a, TaskDescription> {
        Box::pin(async move {
            if arns.is_empty() {
                return Err(ClusterError::InvalidRequest(
                    "describe requires at least one task".to_string(),
                ));
            }
            if arns.len() > MAX_DESCRIBE_TASKS {
                return Err(ClusterError::InvalidRequest(format!(
                    "cannot describe {} tasks, limit is {MAX_DESCRIBE_TASKS}",
                    arns.len()
                )));
            }

            let mut description = TaskDescription::default();
            for arn in arns {
                match self.state.get_task(cluster, arn)? {
                    Some(task) => description.tasks.push(task),
                    None => description
                        .failures
                        .push(TaskFailure::new(arn, MISSING_REASON)),
                }
            }
            Ok(description)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollwatch_state::{Task, TaskStatus};

    fn put(state: &StateStore, arn: &str, started_by: &str, status: TaskStatus) {
        state
            .put_task(&Task {
                arn: arn.to_string(),
                cluster: "prod".to_string(),
                started_by: started_by.to_string(),
                task_definition: "web:1".to_string(),
                last_status: status,
                updated_at: 1000,
            })
            .unwrap();
    }

    #[tokio::test]
    async fn list_tasks_for_deployment() {
        let state = StateStore::open_in_memory().unwrap();
        put(&state, "t-1", "dep-1", TaskStatus::Running);
        put(&state, "t-2", "dep-1", TaskStatus::Pending);
        put(&state, "t-3", "dep-2", TaskStatus::Running);
        let cluster = StoreCluster::new(state);

        let mut arns = cluster.list_tasks("prod", "dep-1").await.unwrap();
        arns.sort();
        assert_eq!(arns, vec!["t-1".to_string(), "t-2".to_string()]);
        assert!(cluster.list_tasks("staging", "dep-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn describe_reports_missing_tasks_as_failures() {
        let state = StateStore::open_in_memory().unwrap();
        put(&state, "t-1", "dep-1", TaskStatus::Running);
        let cluster = StoreCluster::new(state);

        let arns = vec!["t-1".to_string(), "t-gone".to_string()];
        let description = cluster.describe_tasks("prod", &arns).await.unwrap();

        assert_eq!(description.tasks.len(), 1);
        assert_eq!(description.tasks[0].last_status, TaskStatus::Running);
        assert_eq!(
            description.failures,
            vec![TaskFailure::new("t-gone", MISSING_REASON)]
        );
    }

    #[tokio::test]
    async fn describe_rejects_empty_and_oversized_requests() {
        let cluster = StoreCluster::new(StateStore::open_in_memory().unwrap());

        let err = cluster.describe_tasks("prod", &[]).await.unwrap_err();
        assert!(matches!(err, ClusterError::InvalidRequest(_)));

        let arns: Vec<TaskArn> = (0..=MAX_DESCRIBE_TASKS).map(|i| format!("t-{i}")).collect();
        let err = cluster.describe_tasks("prod", &arns).await.unwrap_err();
        assert!(matches!(err, ClusterError::InvalidRequest(_)));
    }
}
