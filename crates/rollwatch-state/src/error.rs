//! Error types for the rollwatch state store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// The write would break the single active deployment rule or touch a
    /// deployment that another writer already completed.
    #[error("conflict: {0}")]
    Conflict(String),
}

/// A deployment update that cannot be built from its inputs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("deployment id is missing")]
    MissingId,

    #[error("deployment {0} is already completed")]
    AlreadyCompleted(String),

    #[error("task failure for deployment {0} has no arn")]
    FailureWithoutArn(String),
}
