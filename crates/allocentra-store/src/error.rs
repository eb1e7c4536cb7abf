//! Error types for the storage layer.

use thiserror::Error;

use crate::cycle::CycleStatus;
use crate::ids::{CycleId, PoolId, RequestId, RunId};
use crate::run::RunStatus;

/// Errors produced by storage trait implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cycle not found: {0}")]
    CycleNotFound(CycleId),

    #[error("pool not found: {0}")]
    PoolNotFound(PoolId),

    #[error("request not found: {0}")]
    RequestNotFound(RequestId),

    #[error("run not found: {0}")]
    RunNotFound(RunId),

    #[error("cycle {cycle_id}: illegal status transition {from:?} -> {to:?}")]
    InvalidCycleTransition {
        cycle_id: CycleId,
        from: CycleStatus,
        to: CycleStatus,
    },

    #[error("run {run_id} is {status:?}; a terminal run is immutable")]
    RunAlreadyFinished { run_id: RunId, status: RunStatus },

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Result type for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
