//! One read-verify-write reconciliation pass per call.
//!
//! The store offers no transaction spanning the initial read and the write,
//! so the worker re-reads the in-progress deployment right before writing and
//! abandons the write when its identity changed. The store's own write is
//! conditional as well and reports a lost race as a conflict.

use std::sync::Arc;

use rollwatch_cluster::{ClusterFacade, MAX_DESCRIBE_TASKS, TaskDescription};
use rollwatch_state::{Deployment, DeploymentStore, Environment, EnvironmentStore, StateError};
use tracing::{debug, info};

use crate::error::{WorkerError, WorkerResult};
use crate::progress::is_deployment_completed;

/// Reconciles an environment's in-progress deployment against the cluster.
///
/// Store calls are synchronous and block the calling task for the length of
/// a redb transaction.
#[derive(Clone)]
pub struct DeploymentWorker {
    environments: Arc<dyn EnvironmentStore>,
    deployments: Arc<dyn DeploymentStore>,
    cluster: Arc<dyn ClusterFacade>,
}

impl DeploymentWorker {
    pub fn new(
        environments: Arc<dyn EnvironmentStore>,
        deployments: Arc<dyn DeploymentStore>,
        cluster: Arc<dyn ClusterFacade>,
    ) -> Self {
        Self {
            environments,
            deployments,
            cluster,
        }
    }

    /// Move the environment's in-progress deployment one step forward.
    ///
    /// Returns the persisted deployment, or `None` when there was nothing to
    /// do: no in-progress deployment, no environment, or another writer
    /// replaced the deployment during the pass.
    pub async fn reconcile_in_progress(
        &self,
        environment_name: &str,
    ) -> WorkerResult<Option<Deployment>> {
        if environment_name.is_empty() {
            return Err(WorkerError::InvalidArgument(
                "environment name is missing".to_string(),
            ));
        }

        let Some(deployment) = self.in_progress(environment_name)? else {
            debug!(environment = %environment_name, "no in-progress deployment");
            return Ok(None);
        };

        let environment = self
            .environments
            .get_environment(environment_name)
            .map_err(|source| WorkerError::Store {
                context: format!("error finding environment with name {environment_name}"),
                source,
            })?;
        let Some(environment) = environment else {
            debug!(environment = %environment_name, "environment no longer exists");
            return Ok(None);
        };

        let progress = self.task_progress(&environment, &deployment).await?;
        let updated = next_deployment(&deployment, &progress)?;

        self.write_if_current(&environment, &deployment, updated)
    }

    fn in_progress(&self, environment_name: &str) -> WorkerResult<Option<Deployment>> {
        self.deployments
            .get_in_progress_deployment(environment_name)
            .map_err(|source| WorkerError::Store {
                context: format!(
                    "error finding in-progress deployment in environment {environment_name}"
                ),
                source,
            })
    }

    /// List the deployment's tasks and describe them in batches.
    async fn task_progress(
        &self,
        environment: &Environment,
        deployment: &Deployment,
    ) -> WorkerResult<TaskDescription> {
        if environment.cluster.is_empty() {
            return Err(WorkerError::Precondition(format!(
                "environment {} has no cluster",
                environment.name
            )));
        }
        let cluster = environment.cluster.as_str();

        let arns = self
            .cluster
            .list_tasks(cluster, &deployment.id)
            .await
            .map_err(|source| WorkerError::Cluster {
                context: format!(
                    "error listing tasks of deployment {} in environment {}",
                    deployment.id, environment.name
                ),
                source,
            })?;

        let mut progress = TaskDescription::default();
        for batch in arns.chunks(MAX_DESCRIBE_TASKS) {
            let described = self
                .cluster
                .describe_tasks(cluster, batch)
                .await
                .map_err(|source| WorkerError::Cluster {
                    context: format!(
                        "error describing tasks of deployment {} in environment {}",
                        deployment.id, environment.name
                    ),
                    source,
                })?;
            progress.extend(described);
        }

        debug!(
            environment = %environment.name,
            deployment = %deployment.id,
            tasks = progress.tasks.len(),
            failures = progress.failures.len(),
            "observed deployment tasks"
        );
        Ok(progress)
    }

    fn write_if_current(
        &self,
        environment: &Environment,
        previous: &Deployment,
        updated: Deployment,
    ) -> WorkerResult<Option<Deployment>> {
        let current = self.in_progress(&environment.name)?;
        if current.as_ref().map(|d| d.id.as_str()) != Some(updated.id.as_str()) {
            info!(
                environment = %environment.name,
                deployment = %updated.id,
                "deployment is no longer the in-progress deployment"
            );
            return Ok(None);
        }

        self.environments
            .update_deployment(environment, &updated)
            .map_err(|source| update_error(environment, &updated, source))?;

        if updated.status != previous.status {
            info!(
                environment = %environment.name,
                deployment = %updated.id,
                from = %previous.status,
                to = %updated.status,
                failures = updated.failures.len(),
                "deployment status changed"
            );
        }
        Ok(Some(updated))
    }
}

/// Compute the successor record from the observed task progress.
fn next_deployment(deployment: &Deployment, progress: &TaskDescription) -> WorkerResult<Deployment> {
    let next = if is_deployment_completed(&progress.tasks) {
        deployment.update_completed(&progress.failures)?
    } else {
        deployment.update_in_progress(deployment.desired_task_count, &progress.failures)?
    };
    Ok(next)
}

fn update_error(environment: &Environment, deployment: &Deployment, source: StateError) -> WorkerError {
    WorkerError::Store {
        context: format!(
            "error updating deployment {} in environment {}",
            deployment.id, environment.name
        ),
        source,
    }
}
