//! rollwatchd: the rollwatch daemon.
//!
//! Wires the monitor loops to the deployment worker:
//!
//! ```text
//! Monitor (pending loop) ─┐
//!                         ├─ mpsc<Event> ─> Dispatcher ─> DeploymentWorker
//! Monitor (in-progress) ──┘                                 │
//!                                            StateStore <───┤
//!                                            StoreCluster <─┘
//! ```

pub mod config;
pub mod dispatcher;

pub use config::{DEFAULT_LOG_FILTER, DaemonConfig, Overrides};
pub use dispatcher::{DispatchSummary, Dispatcher, Outcome};
