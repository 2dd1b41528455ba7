//! StateStore: redb-backed state persistence for rollwatch.
//!
//! Provides typed operations over environments (with their embedded
//! deployments) and cluster task records. All values are JSON-serialized into
//! redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).
//!
//! Writes that depend on what is currently stored (adding a pending
//! deployment, writing back a reconciled one) read and write inside the same
//! redb write transaction. redb serializes write transactions, so those
//! checks behave as conditional writes.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::traits::{DeploymentStore, EnvironmentStore};
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(ENVIRONMENTS).map_err(map_err!(Table))?;
        txn.open_table(TASKS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Environments ───────────────────────────────────────────────

    /// Insert or replace an environment record.
    pub fn put_environment(&self, env: &Environment) -> StateResult<()> {
        let value = serde_json::to_vec(env).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ENVIRONMENTS).map_err(map_err!(Table))?;
            table
                .insert(env.name.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(environment = %env.name, "environment stored");
        Ok(())
    }

    /// Get an environment by name.
    pub fn get_environment(&self, name: &str) -> StateResult<Option<Environment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ENVIRONMENTS).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// List all environments.
    pub fn list_environments(&self) -> StateResult<Vec<Environment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ENVIRONMENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    /// Delete an environment by name. Returns true if it existed.
    pub fn delete_environment(&self, name: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(ENVIRONMENTS).map_err(map_err!(Table))?;
            existed = table.remove(name).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(environment = %name, existed, "environment deleted");
        Ok(existed)
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Record a new pending deployment for an environment.
    ///
    /// Fails with `Conflict` if the environment already has a deployment in
    /// `PENDING` or `IN_PROGRESS`, or if the id has been used before.
    pub fn add_pending_deployment(
        &self,
        environment_name: &str,
        deployment: &Deployment,
    ) -> StateResult<Environment> {
        if deployment.status != DeploymentStatus::Pending {
            return Err(StateError::Conflict(format!(
                "deployment {} is {}, expected PENDING",
                deployment.id, deployment.status
            )));
        }

        self.modify_environment(environment_name, |env| {
            if let Some(active) = env.in_progress_deployment() {
                return Err(StateError::Conflict(format!(
                    "environment {} already has in-progress deployment {}",
                    env.name, active.id
                )));
            }
            if env.deployments.contains_key(&deployment.id) {
                return Err(StateError::Conflict(format!(
                    "deployment {} already exists in environment {}",
                    deployment.id, env.name
                )));
            }
            env.deployments
                .insert(deployment.id.clone(), deployment.clone());
            Ok(())
        })
    }

    /// The environment's deployment in `PENDING` or `IN_PROGRESS`, if any.
    pub fn get_in_progress_deployment(
        &self,
        environment_name: &str,
    ) -> StateResult<Option<Deployment>> {
        Ok(self
            .get_environment(environment_name)?
            .and_then(|env| env.in_progress_deployment().cloned()))
    }

    /// Write a deployment back into its environment record.
    ///
    /// Only the deployment entry is replaced; the rest of the stored record
    /// wins over the caller's copy. Fails with `NotFound` if the environment
    /// is gone and with `Conflict` if the stored copy of this deployment is
    /// already completed or a different deployment is in progress.
    pub fn update_deployment(
        &self,
        environment: &Environment,
        deployment: &Deployment,
    ) -> StateResult<Environment> {
        self.modify_environment(&environment.name, |env| {
            if let Some(stored) = env.deployments.get(&deployment.id) {
                if stored.status == DeploymentStatus::Completed {
                    return Err(StateError::Conflict(format!(
                        "deployment {} is already completed",
                        deployment.id
                    )));
                }
            }
            if let Some(active) = env.in_progress_deployment() {
                if active.id != deployment.id {
                    return Err(StateError::Conflict(format!(
                        "deployment {} was superseded by {}",
                        deployment.id, active.id
                    )));
                }
            }
            env.deployments
                .insert(deployment.id.clone(), deployment.clone());
            Ok(())
        })
    }

    /// Read-modify-write one environment inside a single write transaction.
    fn modify_environment<F>(&self, name: &str, apply: F) -> StateResult<Environment>
    where
        F: FnOnce(&mut Environment) -> StateResult<()>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let env = {
            let mut table = txn.open_table(ENVIRONMENTS).map_err(map_err!(Table))?;
            let current: Option<Environment> = match table.get(name).map_err(map_err!(Read))? {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            };
            let mut env =
                current.ok_or_else(|| StateError::NotFound(format!("environment {name}")))?;

            // Dropping `txn` without commit discards the transaction.
            apply(&mut env)?;
            env.updated_at = epoch_secs();

            let value = serde_json::to_vec(&env).map_err(map_err!(Serialize))?;
            table
                .insert(name, value.as_slice())
                .map_err(map_err!(Write))?;
            env
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(environment = %name, "environment updated");
        Ok(env)
    }

    // ── Tasks ──────────────────────────────────────────────────────

    /// Insert or update a task record.
    pub fn put_task(&self, task: &Task) -> StateResult<()> {
        let key = task.table_key();
        let value = serde_json::to_vec(task).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(TASKS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a task by cluster and arn.
    pub fn get_task(&self, cluster: &str, arn: &str) -> StateResult<Option<Task>> {
        let key = task_key(cluster, arn);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TASKS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// List the tasks in `cluster` launched by `started_by`.
    pub fn list_tasks_started_by(&self, cluster: &str, started_by: &str) -> StateResult<Vec<Task>> {
        let prefix = format!("{cluster}/");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TASKS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let task: Task = decode(value.value())?;
                if task.started_by == started_by {
                    results.push(task);
                }
            }
        }
        Ok(results)
    }

    /// Delete a task record. Returns true if it existed.
    pub fn delete_task(&self, cluster: &str, arn: &str) -> StateResult<bool> {
        let key = task_key(cluster, arn);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(TASKS).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }
}

impl EnvironmentStore for StateStore {
    fn get_environment(&self, name: &str) -> StateResult<Option<Environment>> {
        StateStore::get_environment(self, name)
    }

    fn list_environments(&self) -> StateResult<Vec<Environment>> {
        StateStore::list_environments(self)
    }

    fn update_deployment(
        &self,
        environment: &Environment,
        deployment: &Deployment,
    ) -> StateResult<Environment> {
        StateStore::update_deployment(self, environment, deployment)
    }
}

impl DeploymentStore for StateStore {
    fn get_in_progress_deployment(
        &self,
        environment_name: &str,
    ) -> StateResult<Option<Deployment>> {
        StateStore::get_in_progress_deployment(self, environment_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_environment(name: &str) -> Environment {
        Environment::new(name, "prod-cluster", "web:7", 3)
    }

    fn test_task(cluster: &str, arn: &str, started_by: &str, status: TaskStatus) -> Task {
        Task {
            arn: arn.to_string(),
            cluster: cluster.to_string(),
            started_by: started_by.to_string(),
            task_definition: "web:7".to_string(),
            last_status: status,
            updated_at: 1000,
        }
    }

    fn seeded_store() -> (StateStore, Environment, Deployment) {
        let store = StateStore::open_in_memory().unwrap();
        let env = test_environment("web");
        store.put_environment(&env).unwrap();
        let dep = Deployment::pending("dep-1", "web:7", 3).unwrap();
        let env = store.add_pending_deployment("web", &dep).unwrap();
        (store, env, dep)
    }

    // ── Environment CRUD ───────────────────────────────────────────

    #[test]
    fn environment_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let env = test_environment("web");

        store.put_environment(&env).unwrap();
        let retrieved = store.get_environment("web").unwrap();

        assert_eq!(retrieved, Some(env));
    }

    #[test]
    fn environment_get_nonexistent_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_environment("nothing").unwrap().is_none());
    }

    #[test]
    fn environment_list_and_delete() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_environment(&test_environment("a")).unwrap();
        store.put_environment(&test_environment("b")).unwrap();
        assert_eq!(store.list_environments().unwrap().len(), 2);

        assert!(store.delete_environment("a").unwrap());
        assert!(!store.delete_environment("a").unwrap());
        assert_eq!(store.list_environments().unwrap().len(), 1);
    }

    // ── Deployments ────────────────────────────────────────────────

    #[test]
    fn pending_deployment_becomes_in_progress_deployment() {
        let (store, env, dep) = seeded_store();
        assert_eq!(env.deployments.len(), 1);

        let current = store.get_in_progress_deployment("web").unwrap();
        assert_eq!(current, Some(dep));
    }

    #[test]
    fn in_progress_for_missing_environment_is_none() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_in_progress_deployment("ghost").unwrap().is_none());
    }

    #[test]
    fn second_active_deployment_is_rejected() {
        let (store, _, _) = seeded_store();
        let other = Deployment::pending("dep-2", "web:8", 3).unwrap();

        let err = store.add_pending_deployment("web", &other).unwrap_err();
        assert!(matches!(err, StateError::Conflict(_)));
    }

    #[test]
    fn pending_deployment_for_missing_environment_fails() {
        let store = StateStore::open_in_memory().unwrap();
        let dep = Deployment::pending("dep-1", "web:7", 3).unwrap();

        let err = store.add_pending_deployment("ghost", &dep).unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[test]
    fn update_deployment_replaces_entry() {
        let (store, env, dep) = seeded_store();
        let next = dep.update_in_progress(4, &[]).unwrap();

        let stored = store.update_deployment(&env, &next).unwrap();
        assert_eq!(stored.deployments["dep-1"].status, DeploymentStatus::InProgress);
        assert_eq!(stored.deployments["dep-1"].desired_task_count, 4);

        let current = store.get_in_progress_deployment("web").unwrap().unwrap();
        assert_eq!(current, next);
    }

    #[test]
    fn update_deployment_keeps_stored_environment_fields() {
        let (store, env, dep) = seeded_store();

        let mut changed = store.get_environment("web").unwrap().unwrap();
        changed.desired_task_count = 9;
        store.put_environment(&changed).unwrap();

        // `env` is the stale copy read before the change.
        let next = dep.update_in_progress(3, &[]).unwrap();
        let stored = store.update_deployment(&env, &next).unwrap();
        assert_eq!(stored.desired_task_count, 9);
    }

    #[test]
    fn update_completed_deployment_conflicts() {
        let (store, env, dep) = seeded_store();
        let done = dep.update_completed(&[]).unwrap();
        store.update_deployment(&env, &done).unwrap();
        assert!(store.get_in_progress_deployment("web").unwrap().is_none());

        let late = dep.update_in_progress(3, &[]).unwrap();
        let err = store.update_deployment(&env, &late).unwrap_err();
        assert!(matches!(err, StateError::Conflict(_)));
    }

    #[test]
    fn update_superseded_deployment_conflicts() {
        let (store, env, dep) = seeded_store();

        // Another writer completes dep-1 and starts dep-2.
        let done = dep.update_completed(&[]).unwrap();
        store.update_deployment(&env, &done).unwrap();
        let replacement = Deployment::pending("dep-2", "web:8", 3).unwrap();
        store.add_pending_deployment("web", &replacement).unwrap();

        let stale = Deployment::pending("dep-3", "web:9", 3).unwrap();
        let err = store.update_deployment(&env, &stale).unwrap_err();
        assert!(matches!(err, StateError::Conflict(_)));
    }

    #[test]
    fn update_deployment_for_deleted_environment_fails() {
        let (store, env, dep) = seeded_store();
        store.delete_environment("web").unwrap();

        let next = dep.update_in_progress(3, &[]).unwrap();
        let err = store.update_deployment(&env, &next).unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    // ── Tasks ──────────────────────────────────────────────────────

    #[test]
    fn tasks_are_scoped_by_cluster_and_deployment() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_task(&test_task("prod", "t-1", "dep-1", TaskStatus::Running))
            .unwrap();
        store
            .put_task(&test_task("prod", "t-2", "dep-1", TaskStatus::Pending))
            .unwrap();
        store
            .put_task(&test_task("prod", "t-3", "dep-2", TaskStatus::Running))
            .unwrap();
        store
            .put_task(&test_task("staging", "t-4", "dep-1", TaskStatus::Running))
            .unwrap();

        assert_eq!(store.list_tasks_started_by("prod", "dep-1").unwrap().len(), 2);
        assert_eq!(store.list_tasks_started_by("prod", "dep-2").unwrap().len(), 1);
        assert_eq!(store.list_tasks_started_by("staging", "dep-1").unwrap().len(), 1);
        assert!(store.list_tasks_started_by("dev", "dep-1").unwrap().is_empty());
    }

    #[test]
    fn task_put_get_delete() {
        let store = StateStore::open_in_memory().unwrap();
        let task = test_task("prod", "t-1", "dep-1", TaskStatus::Pending);
        store.put_task(&task).unwrap();
        assert_eq!(store.get_task("prod", "t-1").unwrap(), Some(task));

        assert!(store.delete_task("prod", "t-1").unwrap());
        assert!(!store.delete_task("prod", "t-1").unwrap());
        assert!(store.get_task("prod", "t-1").unwrap().is_none());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_environment(&test_environment("web")).unwrap();
            let dep = Deployment::pending("dep-1", "web:7", 3).unwrap();
            store.add_pending_deployment("web", &dep).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        let dep = store.get_in_progress_deployment("web").unwrap();
        assert_eq!(dep.unwrap().id, "dep-1");
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_environments().unwrap().is_empty());
        assert!(store.list_tasks_started_by("any", "any").unwrap().is_empty());
        assert!(!store.delete_environment("nope").unwrap());
        assert!(!store.delete_task("any", "nope").unwrap());
    }
}
