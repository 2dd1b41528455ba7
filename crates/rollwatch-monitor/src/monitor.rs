//! Monitor: ticker-driven environment sweeps.
//!
//! Each loop owns its ticker and a clone of the shutdown receiver. The
//! shutdown signal is checked before every tick and raced against every
//! channel send, so nothing is emitted once it has been observed. A full
//! channel blocks the sweep, which slows the loop down instead of dropping
//! events.

use std::sync::Arc;
use std::time::Duration;

use rollwatch_state::EnvironmentStore;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::event::{Event, MonitorError, SweepPhase};

/// Default period of the in-progress sweep.
pub const IN_PROGRESS_MONITOR_INTERVAL: Duration = Duration::from_secs(10);

/// Default period of the pending sweep.
pub const PENDING_MONITOR_INTERVAL: Duration = Duration::from_secs(10);

/// Outcome of a single sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sweep {
    /// Emitted one event per listed environment.
    Emitted(usize),
    /// Listing failed; a `MonitorError` event was emitted instead.
    ListFailed,
    /// Shutdown was observed before the sweep finished.
    Cancelled,
    /// The event receiver is gone.
    Closed,
}

/// Emits work events for every environment on a fixed cadence.
///
/// Listing environments is a synchronous store call and blocks the loop's
/// task while the read transaction runs.
#[derive(Clone)]
pub struct Monitor {
    environments: Arc<dyn EnvironmentStore>,
    events: mpsc::Sender<Event>,
    shutdown: watch::Receiver<bool>,
}

impl Monitor {
    /// Create a monitor. Loops stop once `shutdown` turns `true` (or its
    /// sender is dropped).
    pub fn new(
        environments: Arc<dyn EnvironmentStore>,
        events: mpsc::Sender<Event>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            environments,
            events,
            shutdown,
        }
    }

    /// Spawn the pending-deployments loop.
    pub fn start_pending_loop(&self, interval: Duration) -> JoinHandle<()> {
        self.start_loop(SweepPhase::Pending, interval)
    }

    /// Spawn the in-progress-deployments loop.
    pub fn start_in_progress_loop(&self, interval: Duration) -> JoinHandle<()> {
        self.start_loop(SweepPhase::InProgress, interval)
    }

    fn start_loop(&self, phase: SweepPhase, interval: Duration) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move { monitor.run_loop(phase, interval).await })
    }

    /// Run one phase's loop until shutdown or until the receiver is dropped.
    ///
    /// The first sweep happens one `interval` after the call.
    pub async fn run_loop(mut self, phase: SweepPhase, interval: Duration) {
        info!(%phase, interval_secs = interval.as_secs(), "monitor started");

        let mut ticker = time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if self.is_cancelled() {
                break;
            }

            let ticked = tokio::select! {
                biased;
                _ = cancelled(&mut self.shutdown) => false,
                _ = ticker.tick() => true,
            };
            if !ticked {
                break;
            }

            match self.run_once(phase).await {
                Sweep::Emitted(count) => {
                    debug!(%phase, count, "monitor sweep emitted events");
                }
                Sweep::ListFailed => {}
                Sweep::Cancelled => break,
                Sweep::Closed => {
                    warn!(%phase, "event receiver dropped, stopping monitor");
                    break;
                }
            }
        }

        info!(%phase, "monitor shutting down");
    }

    /// List all environments and emit one `phase` event for each.
    pub async fn run_once(&mut self, phase: SweepPhase) -> Sweep {
        let environments = match self.environments.list_environments() {
            Ok(environments) => environments,
            Err(e) => {
                warn!(%phase, error = %e, "failed to list environments");
                let err = MonitorError::ListEnvironments {
                    phase,
                    reason: e.to_string(),
                };
                return match self.emit(Event::MonitorError(err)).await {
                    None => Sweep::ListFailed,
                    Some(stop) => stop,
                };
            }
        };

        let mut emitted = 0;
        for environment in environments {
            if let Some(stop) = self.emit(phase.event(environment)).await {
                return stop;
            }
            emitted += 1;
        }
        Sweep::Emitted(emitted)
    }

    /// Send one event unless shutdown wins the race. Returns why it stopped.
    async fn emit(&mut self, event: Event) -> Option<Sweep> {
        if self.is_cancelled() {
            return Some(Sweep::Cancelled);
        }
        tokio::select! {
            biased;
            _ = cancelled(&mut self.shutdown) => Some(Sweep::Cancelled),
            sent = self.events.send(event) => sent.err().map(|_| Sweep::Closed),
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Resolves once shutdown is requested or its sender is gone.
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
