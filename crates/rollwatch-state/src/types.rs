//! Domain types for the rollwatch state store.
//!
//! These types represent the persisted state of environments, deployments,
//! and cluster tasks. All types are serializable to/from JSON for storage in
//! redb tables.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ValidationError;

/// Unique identifier for an environment (its name).
pub type EnvironmentName = String;

/// Unique identifier for one deployment attempt.
pub type DeploymentId = String;

/// Identifier of a task in the orchestration service.
pub type TaskArn = String;

// ── Environment ───────────────────────────────────────────────────

/// A named deployable target bound to one cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Environment {
    pub name: EnvironmentName,
    /// Cluster the environment's tasks run in.
    pub cluster: String,
    /// Task definition the environment should be running.
    pub task_definition: String,
    /// Number of task instances the environment wants running.
    pub desired_task_count: u32,
    /// Every deployment made for this environment, keyed by id.
    #[serde(default)]
    pub deployments: BTreeMap<DeploymentId, Deployment>,
    /// Unix timestamp (seconds) when this environment was created.
    pub created_at: u64,
    /// Unix timestamp (seconds) when this environment was last updated.
    pub updated_at: u64,
}

impl Environment {
    /// Build a new environment with no deployments.
    pub fn new(name: &str, cluster: &str, task_definition: &str, desired_task_count: u32) -> Self {
        let now = epoch_secs();
        Self {
            name: name.to_string(),
            cluster: cluster.to_string(),
            task_definition: task_definition.to_string(),
            desired_task_count,
            deployments: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The deployment currently `PENDING` or `IN_PROGRESS`, if any.
    pub fn in_progress_deployment(&self) -> Option<&Deployment> {
        self.deployments.values().find(|d| d.status.is_active())
    }
}

// ── Deployment ────────────────────────────────────────────────────

/// Lifecycle status of a deployment.
///
/// Transitions only move forward: `Pending → InProgress → Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    Pending,
    InProgress,
    Completed,
}

impl DeploymentStatus {
    /// Whether this status counts as the environment's in-progress deployment.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
        };
        f.write_str(s)
    }
}

/// One rollout attempt for an environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deployment {
    pub id: DeploymentId,
    pub status: DeploymentStatus,
    pub task_definition: String,
    pub desired_task_count: u32,
    /// Launch and runtime failures observed across reconciliation passes.
    #[serde(default)]
    pub failures: Vec<TaskFailure>,
    /// Unix timestamp (seconds) when the deployment was recorded.
    pub started_at: u64,
    /// Unix timestamp (seconds) when the deployment completed.
    pub ended_at: Option<u64>,
}

impl Deployment {
    /// Record a new pending deployment.
    pub fn pending(
        id: &str,
        task_definition: &str,
        desired_task_count: u32,
    ) -> Result<Self, ValidationError> {
        if id.is_empty() {
            return Err(ValidationError::MissingId);
        }
        Ok(Self {
            id: id.to_string(),
            status: DeploymentStatus::Pending,
            task_definition: task_definition.to_string(),
            desired_task_count,
            failures: Vec::new(),
            started_at: epoch_secs(),
            ended_at: None,
        })
    }

    /// Build the in-progress successor of this deployment.
    ///
    /// A pending deployment is promoted; `failures` is merged into the
    /// accumulated list.
    pub fn update_in_progress(
        &self,
        desired_task_count: u32,
        failures: &[TaskFailure],
    ) -> Result<Self, ValidationError> {
        self.check_updatable(failures)?;
        let mut next = self.clone();
        next.status = DeploymentStatus::InProgress;
        next.desired_task_count = desired_task_count;
        next.merge_failures(failures);
        Ok(next)
    }

    /// Build the completed successor of this deployment.
    ///
    /// The failure list becomes the one observed by the completing pass.
    pub fn update_completed(&self, failures: &[TaskFailure]) -> Result<Self, ValidationError> {
        self.check_updatable(failures)?;
        let mut next = self.clone();
        next.status = DeploymentStatus::Completed;
        next.ended_at = Some(epoch_secs());
        next.failures = failures.to_vec();
        Ok(next)
    }

    fn check_updatable(&self, failures: &[TaskFailure]) -> Result<(), ValidationError> {
        if self.id.is_empty() {
            return Err(ValidationError::MissingId);
        }
        if self.status == DeploymentStatus::Completed {
            return Err(ValidationError::AlreadyCompleted(self.id.clone()));
        }
        if failures.iter().any(|f| f.arn.is_empty()) {
            return Err(ValidationError::FailureWithoutArn(self.id.clone()));
        }
        Ok(())
    }

    fn merge_failures(&mut self, failures: &[TaskFailure]) {
        for failure in failures {
            if !self.failures.contains(failure) {
                self.failures.push(failure.clone());
            }
        }
    }
}

// ── Tasks ─────────────────────────────────────────────────────────

/// Last-known status of a task as reported by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Provisioning,
    Pending,
    Activating,
    Running,
    Deactivating,
    Stopping,
    Deprovisioning,
    Stopped,
}

/// A task record in one cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub arn: TaskArn,
    pub cluster: String,
    /// Deployment id that launched this task.
    pub started_by: DeploymentId,
    pub task_definition: String,
    pub last_status: TaskStatus,
    /// Unix timestamp of the last status change.
    pub updated_at: u64,
}

impl Task {
    /// Build the composite key for the tasks table.
    pub fn table_key(&self) -> String {
        task_key(&self.cluster, &self.arn)
    }
}

/// Composite key for a task in the tasks table.
pub fn task_key(cluster: &str, arn: &str) -> String {
    format!("{cluster}/{arn}")
}

/// A task the orchestrator could not launch or describe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskFailure {
    pub arn: TaskArn,
    pub reason: String,
}

impl TaskFailure {
    pub fn new(arn: &str, reason: &str) -> Self {
        Self {
            arn: arn.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
