//! In-memory storage backends.
//!
//! `MemoryCycleStore`, `MemoryRequestStore`, `MemoryRunStore`, and
//! `MemoryAuditLog` satisfy the trait contracts without any external
//! dependencies. They are the default backend for the daemon and CLI and
//! the fakes used throughout the test suites.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::audit::{AuditEntry, AuditQuery};
use crate::cycle::{Cycle, CycleStatus, Pool};
use crate::error::{StoreError, StoreResult};
use crate::ids::{CycleId, RequestId, RunId};
use crate::request::{Request, RequestStatus};
use crate::run::RunRecord;
use crate::traits::{AuditLog, CycleStore, RequestStore, RunStore};

// ---------------------------------------------------------------------------
// MemoryCycleStore
// ---------------------------------------------------------------------------

/// In-memory cycle store backed by a `HashMap<CycleId, Cycle>`.
#[derive(Debug, Default)]
pub struct MemoryCycleStore {
    cycles: Mutex<HashMap<CycleId, Cycle>>,
}

impl MemoryCycleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CycleStore for MemoryCycleStore {
    async fn create(&self, cycle: Cycle) -> StoreResult<()> {
        let mut cycles = self.cycles.lock().unwrap();
        cycles.insert(cycle.id, cycle);
        Ok(())
    }

    async fn get(&self, cycle_id: CycleId) -> StoreResult<Cycle> {
        let cycles = self.cycles.lock().unwrap();
        cycles
            .get(&cycle_id)
            .cloned()
            .ok_or(StoreError::CycleNotFound(cycle_id))
    }

    async fn list(&self, status: Option<CycleStatus>) -> StoreResult<Vec<Cycle>> {
        let cycles = self.cycles.lock().unwrap();
        let mut out: Vec<Cycle> = cycles
            .values()
            .filter(|c| status.map(|s| c.status == s).unwrap_or(true))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn set_status(&self, cycle_id: CycleId, status: CycleStatus) -> StoreResult<Cycle> {
        let mut cycles = self.cycles.lock().unwrap();
        let cycle = cycles
            .get_mut(&cycle_id)
            .ok_or(StoreError::CycleNotFound(cycle_id))?;
        if !cycle.status.can_transition_to(status) {
            return Err(StoreError::InvalidCycleTransition {
                cycle_id,
                from: cycle.status,
                to: status,
            });
        }
        cycle.status = status;
        Ok(cycle.clone())
    }

    async fn update_pools(&self, cycle_id: CycleId, pools: Vec<Pool>) -> StoreResult<()> {
        let mut cycles = self.cycles.lock().unwrap();
        let cycle = cycles
            .get_mut(&cycle_id)
            .ok_or(StoreError::CycleNotFound(cycle_id))?;
        cycle.pools = pools;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryRequestStore
// ---------------------------------------------------------------------------

/// In-memory request store backed by a `HashMap<RequestId, Request>`.
#[derive(Debug, Default)]
pub struct MemoryRequestStore {
    requests: Mutex<HashMap<RequestId, Request>>,
}

impl MemoryRequestStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RequestStore for MemoryRequestStore {
    async fn create(&self, request: Request) -> StoreResult<()> {
        let mut requests = self.requests.lock().unwrap();
        requests.insert(request.id, request);
        Ok(())
    }

    async fn get(&self, request_id: RequestId) -> StoreResult<Request> {
        let requests = self.requests.lock().unwrap();
        requests
            .get(&request_id)
            .cloned()
            .ok_or(StoreError::RequestNotFound(request_id))
    }

    async fn list(
        &self,
        cycle_id: CycleId,
        status: Option<RequestStatus>,
    ) -> StoreResult<Vec<Request>> {
        let requests = self.requests.lock().unwrap();
        let mut out: Vec<Request> = requests
            .values()
            .filter(|r| r.cycle_id == cycle_id)
            .filter(|r| status.map(|s| r.status == s).unwrap_or(true))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    async fn set_status(&self, request_id: RequestId, status: RequestStatus) -> StoreResult<()> {
        let mut requests = self.requests.lock().unwrap();
        let request = requests
            .get_mut(&request_id)
            .ok_or(StoreError::RequestNotFound(request_id))?;
        request.status = status;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryRunStore
// ---------------------------------------------------------------------------

/// In-memory run store backed by a `HashMap<RunId, RunRecord>`.
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    runs: Mutex<HashMap<RunId, RunRecord>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn create(&self, run: RunRecord) -> StoreResult<()> {
        let mut runs = self.runs.lock().unwrap();
        runs.insert(run.id, run);
        Ok(())
    }

    async fn update(&self, run: RunRecord) -> StoreResult<()> {
        let mut runs = self.runs.lock().unwrap();
        let existing = runs.get_mut(&run.id).ok_or(StoreError::RunNotFound(run.id))?;
        if existing.status.is_terminal() {
            return Err(StoreError::RunAlreadyFinished {
                run_id: run.id,
                status: existing.status,
            });
        }
        *existing = run;
        Ok(())
    }

    async fn get(&self, run_id: RunId) -> StoreResult<RunRecord> {
        let runs = self.runs.lock().unwrap();
        runs.get(&run_id)
            .cloned()
            .ok_or(StoreError::RunNotFound(run_id))
    }

    async fn list(&self, cycle_id: CycleId) -> StoreResult<Vec<RunRecord>> {
        let runs = self.runs.lock().unwrap();
        let mut out: Vec<RunRecord> = runs
            .values()
            .filter(|r| r.cycle_id == cycle_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// MemoryAuditLog
// ---------------------------------------------------------------------------

/// In-memory append-only audit log.
///
/// Entries are only ever pushed; ordering and pagination happen at query
/// time so that concatenated cursor pages equal one full ordered scan.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn append(&self, entry: AuditEntry) -> StoreResult<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.push(entry);
        Ok(())
    }

    async fn query(&self, query: AuditQuery) -> StoreResult<Vec<AuditEntry>> {
        let entries = self.entries.lock().unwrap();
        let mut out: Vec<AuditEntry> = entries
            .iter()
            .filter(|e| e.cycle_id == query.cycle_id)
            .filter(|e| query.from.map(|t| e.timestamp >= t).unwrap_or(true))
            .filter(|e| query.to.map(|t| e.timestamp < t).unwrap_or(true))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.id.cmp(&b.id)));
        if let Some(cursor) = query.after {
            out.retain(|e| (e.timestamp, e.id) > (cursor.timestamp, cursor.id));
        }
        if let Some(limit) = query.limit {
            out.truncate(limit);
        }
        Ok(out)
    }
}
