//! Cluster facade error types.

use thiserror::Error;

/// Errors returned by a [`ClusterFacade`](crate::ClusterFacade).
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("orchestrator unavailable: {0}")]
    Unavailable(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("state store error: {0}")]
    State(#[from] rollwatch_state::StateError),
}

pub type ClusterResult<T> = Result<T, ClusterError>;
