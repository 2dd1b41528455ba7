//! Dispatcher: turns monitor events into reconciliation passes.
//!
//! Every environment event runs `reconcile_in_progress`; for a `PENDING`
//! deployment the first pass moves it to `IN_PROGRESS`. Passes run
//! concurrently up to a semaphore limit, and at most one pass per
//! environment is in flight. Events for an environment that is already
//! being reconciled are dropped; the next sweep brings them back.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use rollwatch_deployment::DeploymentWorker;
use rollwatch_monitor::Event;
use rollwatch_state::DeploymentStatus;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// What one reconciliation pass ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Updated(DeploymentStatus),
    Unchanged,
    Failed,
}

/// Counters for a dispatcher run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub updated: usize,
    pub completed: usize,
    pub unchanged: usize,
    pub failed: usize,
    /// Events dropped because the environment was already being reconciled.
    pub skipped: usize,
    pub monitor_errors: usize,
}

impl DispatchSummary {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Updated(status) => {
                self.updated += 1;
                if status == DeploymentStatus::Completed {
                    self.completed += 1;
                }
            }
            Outcome::Unchanged => self.unchanged += 1,
            Outcome::Failed => self.failed += 1,
        }
    }
}

pub struct Dispatcher {
    worker: DeploymentWorker,
    permits: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    shutdown: watch::Receiver<bool>,
}

impl Dispatcher {
    pub fn new(
        worker: DeploymentWorker,
        max_concurrent: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            worker,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            shutdown,
        }
    }

    /// Consume events until the channel closes or shutdown is requested,
    /// then wait for in-flight passes.
    pub async fn run(mut self, mut events: mpsc::Receiver<Event>) -> DispatchSummary {
        info!("dispatcher started");
        let mut summary = DispatchSummary::default();
        let mut passes = JoinSet::new();

        loop {
            let event = tokio::select! {
                biased;
                _ = cancelled(&mut self.shutdown) => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            while let Some(joined) = passes.try_join_next() {
                summary.record(joined.unwrap_or_else(join_failed));
            }

            let environment = match event {
                Event::MonitorError(err) => {
                    error!(error = %err, "monitor sweep failed");
                    summary.monitor_errors += 1;
                    continue;
                }
                Event::UpdatePending(env) | Event::UpdateInProgress(env) => env.name,
            };

            let Some(guard) = InFlight::claim(&self.in_flight, &environment) else {
                debug!(%environment, "reconciliation already running, skipping event");
                summary.skipped += 1;
                continue;
            };

            let permit = tokio::select! {
                biased;
                _ = cancelled(&mut self.shutdown) => break,
                permit = self.permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let worker = self.worker.clone();
            passes.spawn(async move {
                let _permit = permit;
                let _guard = guard;
                reconcile(&worker, &environment).await
            });
        }

        if !passes.is_empty() {
            info!(count = passes.len(), "waiting for in-flight reconciliations");
        }
        while let Some(joined) = passes.join_next().await {
            summary.record(joined.unwrap_or_else(join_failed));
        }

        info!(
            updated = summary.updated,
            completed = summary.completed,
            failed = summary.failed,
            "dispatcher stopped"
        );
        summary
    }
}

async fn reconcile(worker: &DeploymentWorker, environment: &str) -> Outcome {
    match worker.reconcile_in_progress(environment).await {
        Ok(Some(deployment)) => {
            debug!(
                %environment,
                deployment = %deployment.id,
                status = %deployment.status,
                "deployment reconciled"
            );
            Outcome::Updated(deployment.status)
        }
        Ok(None) => Outcome::Unchanged,
        Err(e) => {
            warn!(%environment, error = %e, "reconciliation failed");
            Outcome::Failed
        }
    }
}

fn join_failed(e: tokio::task::JoinError) -> Outcome {
    error!(error = %e, "reconciliation task panicked");
    Outcome::Failed
}

/// Marks an environment as being reconciled until dropped.
struct InFlight {
    set: Arc<Mutex<HashSet<String>>>,
    environment: String,
}

impl InFlight {
    fn claim(set: &Arc<Mutex<HashSet<String>>>, environment: &str) -> Option<Self> {
        let mut names = set.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !names.insert(environment.to_string()) {
            return None;
        }
        Some(Self {
            set: Arc::clone(set),
            environment: environment.to_string(),
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut names = self
            .set
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        names.remove(&self.environment);
    }
}

async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rollwatch_cluster::{
        ClusterFacade, ClusterFuture, StoreCluster, TaskDescription,
    };
    use rollwatch_monitor::{MonitorError, SweepPhase};
    use rollwatch_state::{Deployment, Environment, StateStore, Task, TaskArn, TaskStatus};

    fn seeded_store(names: &[&str]) -> StateStore {
        let store = StateStore::open_in_memory().unwrap();
        for name in names {
            store
                .put_environment(&Environment::new(*name, "prod", "app:2", 1))
                .unwrap();
            let id = format!("{name}-dep");
            store
                .add_pending_deployment(name, &Deployment::pending(&id, "app:2", 1).unwrap())
                .unwrap();
            store
                .put_task(&Task {
                    arn: format!("{name}-task"),
                    cluster: "prod".to_string(),
                    started_by: id,
                    task_definition: "app:2".to_string(),
                    last_status: TaskStatus::Running,
                    updated_at: 1000,
                })
                .unwrap();
        }
        store
    }

    fn worker_over(store: &StateStore, cluster: Arc<dyn ClusterFacade>) -> DeploymentWorker {
        DeploymentWorker::new(Arc::new(store.clone()), Arc::new(store.clone()), cluster)
    }

    fn env_event(store: &StateStore, name: &str) -> Event {
        SweepPhase::InProgress.event(store.get_environment(name).unwrap().unwrap())
    }

    /// Lists nothing until released, counting calls.
    struct GatedCluster {
        gate: Arc<Semaphore>,
        calls: AtomicUsize,
    }

    impl ClusterFacade for GatedCluster {
        fn list_tasks<'a>(&'a self, _: &'a str, _: &'a str) -> ClusterFuture<'a, Vec<TaskArn>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let _ = self.gate.acquire().await;
                Ok(Vec::new())
            })
        }

        fn describe_tasks<'a>(
            &'a self,
            _: &'a str,
            _: &'a [TaskArn],
        ) -> ClusterFuture<'a, TaskDescription> {
            Box::pin(async move { Ok(TaskDescription::default()) })
        }
    }

    #[tokio::test]
    async fn reconciles_until_channel_closes() {
        let store = seeded_store(&["web", "api"]);
        let worker = worker_over(&store, Arc::new(StoreCluster::new(store.clone())));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (tx, rx) = mpsc::channel(8);

        tx.send(env_event(&store, "web")).await.unwrap();
        tx.send(SweepPhase::Pending.event(store.get_environment("api").unwrap().unwrap()))
            .await
            .unwrap();
        tx.send(Event::MonitorError(MonitorError::ListEnvironments {
            phase: SweepPhase::Pending,
            reason: "read error".to_string(),
        }))
        .await
        .unwrap();
        drop(tx);

        let summary = Dispatcher::new(worker, 4, shutdown_rx).run(rx).await;
        assert_eq!(summary.completed, 2);
        assert_eq!(summary.monitor_errors, 1);
        assert_eq!(summary.failed, 0);

        for name in ["web", "api"] {
            assert!(store.get_in_progress_deployment(name).unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn unknown_environment_is_unchanged() {
        let store = seeded_store(&[]);
        let worker = worker_over(&store, Arc::new(StoreCluster::new(store.clone())));
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (tx, rx) = mpsc::channel(1);

        tx.send(SweepPhase::Pending.event(Environment::new("ghost", "prod", "app:1", 1)))
            .await
            .unwrap();
        drop(tx);

        let summary = Dispatcher::new(worker, 1, shutdown_rx).run(rx).await;
        assert_eq!(summary.unchanged, 1);
    }

    #[tokio::test]
    async fn one_pass_per_environment_at_a_time() {
        let store = seeded_store(&["web"]);
        let gate = Arc::new(Semaphore::new(0));
        let cluster = Arc::new(GatedCluster {
            gate: gate.clone(),
            calls: AtomicUsize::new(0),
        });
        let worker = worker_over(&store, cluster.clone());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (tx, rx) = mpsc::channel(8);

        let dispatcher = tokio::spawn(Dispatcher::new(worker, 4, shutdown_rx).run(rx));

        tx.send(env_event(&store, "web")).await.unwrap();
        while cluster.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        tx.send(env_event(&store, "web")).await.unwrap();
        tx.send(env_event(&store, "web")).await.unwrap();

        // Let the dispatcher drain the channel before the pass finishes.
        while tx.capacity() < tx.max_capacity() {
            tokio::task::yield_now().await;
        }
        drop(tx);
        gate.add_permits(1);

        let summary = dispatcher.await.unwrap();
        assert_eq!(cluster.calls.load(Ordering::SeqCst), 1);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.updated, 1);
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_pass() {
        let store = seeded_store(&["web"]);
        let gate = Arc::new(Semaphore::new(0));
        let cluster = Arc::new(GatedCluster {
            gate: gate.clone(),
            calls: AtomicUsize::new(0),
        });
        let worker = worker_over(&store, cluster.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (tx, rx) = mpsc::channel(8);

        let dispatcher = tokio::spawn(Dispatcher::new(worker, 4, shutdown_rx).run(rx));
        tx.send(env_event(&store, "web")).await.unwrap();
        while cluster.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        shutdown_tx.send(true).unwrap();
        tokio::task::yield_now().await;
        assert!(!dispatcher.is_finished());

        gate.add_permits(1);
        let summary = dispatcher.await.unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(
            store.get_in_progress_deployment("web").unwrap().unwrap().status,
            DeploymentStatus::InProgress
        );
        // The sender is still open; shutdown alone stopped the dispatcher.
        drop(tx);
    }
}
