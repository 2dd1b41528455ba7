//! Events emitted by the monitor loops.

use std::fmt;

use rollwatch_state::Environment;
use thiserror::Error;

/// Which deployment phase a sweep looks after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SweepPhase {
    Pending,
    InProgress,
}

impl SweepPhase {
    /// Wrap an environment in this phase's event.
    pub fn event(self, environment: Environment) -> Event {
        match self {
            Self::Pending => Event::UpdatePending(environment),
            Self::InProgress => Event::UpdateInProgress(environment),
        }
    }
}

impl fmt::Display for SweepPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::InProgress => f.write_str("in-progress"),
        }
    }
}

/// Failure of a monitor sweep, delivered as an event instead of stopping the loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MonitorError {
    #[error("could not retrieve environments while running the {phase} deployments monitor: {reason}")]
    ListEnvironments { phase: SweepPhase, reason: String },
}

/// A unit of work for the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    UpdatePending(Environment),
    UpdateInProgress(Environment),
    MonitorError(MonitorError),
}

impl Event {
    /// Name of the environment the event is about, if any.
    pub fn environment_name(&self) -> Option<&str> {
        match self {
            Self::UpdatePending(env) | Self::UpdateInProgress(env) => Some(&env.name),
            Self::MonitorError(_) => None,
        }
    }
}
