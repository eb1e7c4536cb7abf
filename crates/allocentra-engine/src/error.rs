//! Engine error taxonomy.
//!
//! Capacity shortfall during allocation is *not* an error — it is normal
//! decision output (denied/partial results). Only structural input
//! problems, concurrency conflicts, and persistence failures propagate as
//! errors here.

use thiserror::Error;

use allocentra_store::{CycleId, CycleStatus, PoolId, RequestId, RunMode, StoreError};

/// Malformed input, rejected before any mutation. Fully recoverable by
/// caller resubmission.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("request {request_id} requests zero quantity from every pool")]
    EmptyRequest { request_id: RequestId },

    #[error("request {request_id} references pool {pool_id} outside its cycle")]
    CrossCycleReference {
        request_id: RequestId,
        pool_id: PoolId,
    },

    #[error("invalid allocation policy: {reason}")]
    InvalidPolicy { reason: String },

    #[error("invalid cycle: {reason}")]
    InvalidCycle { reason: String },
}

/// Errors from pool ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("pool {pool_id}: requested {requested} exceeds available {available}")]
    InsufficientCapacity {
        pool_id: PoolId,
        requested: u64,
        available: u64,
    },

    #[error("unknown pool: {0}")]
    UnknownPool(PoolId),

    #[error("unknown reservation token for pool {pool_id}; already committed or released")]
    UnknownToken { pool_id: PoolId },
}

/// Top-level engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("ledger operation failed: {0}")]
    Ledger(#[from] LedgerError),

    #[error("cycle {cycle_id} is {status:?}; {mode:?} runs are not permitted")]
    CycleNotRunnable {
        cycle_id: CycleId,
        status: CycleStatus,
        mode: RunMode,
    },

    #[error("a commit run already holds the ledger lock for cycle {cycle_id}; retry with backoff")]
    LockHeld { cycle_id: CycleId },

    #[error("cycle {cycle_id} is closed; no further mutations are accepted")]
    CycleClosed { cycle_id: CycleId },

    #[error("run exceeded its {timeout_ms}ms budget; all reservations released")]
    Timeout { timeout_ms: u64 },

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_display() {
        let err = ValidationError::EmptyRequest {
            request_id: RequestId::new(),
        };
        assert!(err.to_string().contains("zero quantity"));
    }

    #[test]
    fn insufficient_capacity_names_quantities() {
        let err = LedgerError::InsufficientCapacity {
            pool_id: PoolId::new(),
            requested: 50,
            available: 30,
        };
        let msg = err.to_string();
        assert!(msg.contains("50"));
        assert!(msg.contains("30"));
    }

    #[test]
    fn store_error_converts() {
        let id = CycleId::new();
        let err: EngineError = StoreError::CycleNotFound(id).into();
        assert!(matches!(err, EngineError::Store(StoreError::CycleNotFound(_))));
    }
}
