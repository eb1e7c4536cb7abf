//! Storage trait definitions for Allocentra.
//!
//! These traits define the persistence abstractions consumed by the
//! allocation engine:
//! - `CycleStore`: cycles and the pools they own
//! - `RequestStore`: allocation requests per cycle
//! - `RunStore`: run records with results and traces
//! - `AuditLog`: append-only audit trail with restartable paged queries
//!
//! All traits are async and backend-agnostic. The in-memory
//! implementations in [`crate::memory`] satisfy every contract.

use async_trait::async_trait;

use crate::audit::{AuditEntry, AuditQuery};
use crate::cycle::{Cycle, CycleStatus, Pool};
use crate::error::StoreResult;
use crate::ids::{CycleId, RequestId, RunId};
use crate::request::{Request, RequestStatus};
use crate::run::RunRecord;

/// Cycle persistence.
///
/// Guarantees:
/// - `set_status` enforces the forward-only `Draft → Active → Closed`
///   lifecycle and fails with `InvalidCycleTransition` otherwise.
/// - `update_pools` replaces the cycle's pool set atomically (used for
///   capacity edits and committed-quantity write-back after a run).
#[async_trait]
pub trait CycleStore: Send + Sync {
    /// Persist a new cycle.
    async fn create(&self, cycle: Cycle) -> StoreResult<()>;

    /// Fetch a cycle by id. `CycleNotFound` if absent.
    async fn get(&self, cycle_id: CycleId) -> StoreResult<Cycle>;

    /// List cycles, optionally filtered by status.
    async fn list(&self, status: Option<CycleStatus>) -> StoreResult<Vec<Cycle>>;

    /// Transition a cycle to a new status. Returns the updated cycle.
    async fn set_status(&self, cycle_id: CycleId, status: CycleStatus) -> StoreResult<Cycle>;

    /// Replace the cycle's pools atomically.
    async fn update_pools(&self, cycle_id: CycleId, pools: Vec<Pool>) -> StoreResult<()>;
}

/// Request persistence.
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Persist a new request.
    async fn create(&self, request: Request) -> StoreResult<()>;

    /// Fetch a request by id. `RequestNotFound` if absent.
    async fn get(&self, request_id: RequestId) -> StoreResult<Request>;

    /// List requests for a cycle, optionally filtered by status, ordered
    /// by submission time then id.
    async fn list(
        &self,
        cycle_id: CycleId,
        status: Option<RequestStatus>,
    ) -> StoreResult<Vec<Request>>;

    /// Set a request's status. Only a committed run may call this.
    async fn set_status(&self, request_id: RequestId, status: RequestStatus) -> StoreResult<()>;
}

/// Run persistence.
///
/// Guarantees:
/// - A run transitions `Pending → Running → {Succeeded, Failed}`.
/// - `update` fails with `RunAlreadyFinished` once the stored run is
///   terminal; finished runs are immutable.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Persist a new pending run.
    async fn create(&self, run: RunRecord) -> StoreResult<()>;

    /// Replace a non-terminal run record.
    async fn update(&self, run: RunRecord) -> StoreResult<()>;

    /// Fetch a run by id. `RunNotFound` if absent.
    async fn get(&self, run_id: RunId) -> StoreResult<RunRecord>;

    /// List runs for a cycle, newest first.
    async fn list(&self, cycle_id: CycleId) -> StoreResult<Vec<RunRecord>>;
}

/// Append-only audit trail.
///
/// Guarantees:
/// - `append` never overwrites or deletes prior entries.
/// - `query` returns entries ordered by (timestamp asc, id asc); the
///   cursor in `AuditQuery::after` resumes strictly after a prior page,
///   so concatenated pages equal one full ordered scan.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Append an entry to the log.
    async fn append(&self, entry: AuditEntry) -> StoreResult<()>;

    /// Paged, ordered retrieval of entries matching the query.
    async fn query(&self, query: AuditQuery) -> StoreResult<Vec<AuditEntry>>;
}
