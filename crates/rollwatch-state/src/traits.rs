//! Store seams consumed by the monitor and the reconciler.
//!
//! [`StateStore`](crate::StateStore) implements both traits; tests inject
//! their own implementations to stage races and count calls.

use crate::error::StateResult;
use crate::types::{Deployment, Environment};

/// Environment reads and the deployment write-back.
pub trait EnvironmentStore: Send + Sync {
    /// Get an environment by name. Absent is `Ok(None)`.
    fn get_environment(&self, name: &str) -> StateResult<Option<Environment>>;

    /// List all environments.
    fn list_environments(&self) -> StateResult<Vec<Environment>>;

    /// Write `deployment` into `environment`'s record.
    ///
    /// Atomic per environment. Fails with `StateError::Conflict` when the
    /// write would clash with what another writer already stored.
    fn update_deployment(
        &self,
        environment: &Environment,
        deployment: &Deployment,
    ) -> StateResult<Environment>;
}

/// Lookup of an environment's single in-progress deployment.
pub trait DeploymentStore: Send + Sync {
    /// The deployment in `PENDING` or `IN_PROGRESS` for the environment.
    /// Absent is `Ok(None)`.
    fn get_in_progress_deployment(&self, environment_name: &str)
        -> StateResult<Option<Deployment>>;
}
