//! rollwatch-monitor: periodic sweeps that produce deployment work.
//!
//! The monitor knows nothing about reconciliation. It runs one background
//! loop per deployment phase; every tick lists all environments and emits one
//! [`Event`] per environment on a shared channel. A dispatcher on the other
//! end decides what to do with each event.
//!
//! # Architecture
//!
//! ```text
//! Monitor
//!   ├── pending loop      (ticker) → UpdatePending(env) × N
//!   ├── in-progress loop  (ticker) → UpdateInProgress(env) × N
//!   ├── listing failure            → MonitorError(err), loop keeps going
//!   └── watch::Receiver<bool>      → both loops stop, no further events
//! ```

pub mod event;
pub mod monitor;

pub use event::{Event, MonitorError, SweepPhase};
pub use monitor::{IN_PROGRESS_MONITOR_INTERVAL, Monitor, PENDING_MONITOR_INTERVAL, Sweep};
