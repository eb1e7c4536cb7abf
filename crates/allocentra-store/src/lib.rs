//! Allocentra storage layer.
//!
//! Canonical record types for the allocation domain (cycles, pools,
//! requests, runs, audit entries) plus backend-agnostic async storage
//! traits. The in-memory implementations in [`memory`] satisfy every
//! trait contract and double as the default backend and the test fakes.

pub mod audit;
pub mod cycle;
pub mod error;
pub mod ids;
pub mod memory;
pub mod request;
pub mod run;
pub mod traits;

pub use audit::{AuditAction, AuditCursor, AuditEntry, AuditQuery};
pub use cycle::{Cycle, CycleStatus, Pool, PoolKind};
pub use error::{StoreError, StoreResult};
pub use ids::{AuditEntryId, CycleId, PoolId, RequestId, RunId};
pub use memory::{MemoryAuditLog, MemoryCycleStore, MemoryRequestStore, MemoryRunStore};
pub use request::{Impact, Request, RequestStatus, Risk};
pub use run::{
    AllocationPolicy, AllocationResult, DecisionKind, ExplanationTrace, LimitingFactor, RunMode,
    RunRecord, RunStatus, RunSummary, TraceStep,
};
pub use traits::{AuditLog, CycleStore, RequestStore, RunStore};
