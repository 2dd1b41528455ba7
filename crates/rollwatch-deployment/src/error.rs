//! Deployment worker error types.

use rollwatch_cluster::ClusterError;
use rollwatch_state::{StateError, ValidationError};
use thiserror::Error;

/// Errors that can occur during a reconciliation pass.
///
/// A missing environment, a missing in-progress deployment, and a superseded
/// deployment are not errors; the pass returns `Ok(None)` for those.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("invalid deployment update: {0}")]
    Validation(#[from] ValidationError),

    #[error("{context}: {source}")]
    Store {
        context: String,
        #[source]
        source: StateError,
    },

    #[error("{context}: {source}")]
    Cluster {
        context: String,
        #[source]
        source: ClusterError,
    },
}

pub type WorkerResult<T> = Result<T, WorkerError>;
