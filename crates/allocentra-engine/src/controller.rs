//! Allocation Run Controller — run lifecycle orchestration.
//!
//! The controller owns the per-cycle [`PoolLedger`] and commit lock, wires
//! the pure allocation algorithm to the storage traits, and enforces the
//! run lifecycle `Pending → Running → {Succeeded, Failed}`:
//!
//! 1. validate cycle status, policy, and the pending request set;
//! 2. snapshot pool capacity and persist a `Pending` run record;
//! 3. evaluate the ordered queue with [`allocate`];
//! 4. apply (commit mode) or discard (scenario mode) the grants.
//!
//! Commit application is all-or-nothing: grants are first *reserved* on
//! the ledger, then the audit entry is appended, and only then are the
//! reservations committed and the stores written back. The audit append
//! is the commit point: a failure (or run timeout) before it releases
//! every reservation and leaves the ledger byte-identical to its pre-run
//! state, while everything after it runs to completion outside the
//! timeout. A failed run finishes with its results and traces intact but
//! `committed = false`.
//!
//! At most one commit run may hold a cycle's ledger lock; a concurrent
//! attempt fails fast with [`EngineError::LockHeld`] instead of queueing.
//! Scenario runs never take the lock or touch the ledger, so they
//! overlap freely with each other and with an in-flight commit.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, error, Instrument};

use allocentra_store::{
    AllocationPolicy, AllocationResult, AuditAction, AuditEntry, AuditLog, Cycle, CycleId,
    CycleStatus, CycleStore, DecisionKind, PoolId, Request, RequestStatus, RequestStore, RunMode,
    RunRecord, RunStatus, RunStore, RunSummary, StoreError,
};

use crate::algorithm::{allocate, AllocationOutcome};
use crate::digest::StateDigest;
use crate::error::{EngineError, EngineResult, ValidationError};
use crate::ledger::{PoolLedger, PoolSnapshot, ReservationSet};
use crate::obs;
use crate::queue::{order_requests, validate_request, validate_requests};
use crate::scoring::{ScoringEngine, ScoringWeights};

/// Engine-wide configuration.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Scoring weights for explanation breakdowns.
    pub scoring: ScoringWeights,

    /// Wall-clock budget applied to the apply/persist phase of every run
    /// that does not set its own. `None` means unbounded.
    pub default_timeout: Option<Duration>,
}

/// Per-run options supplied by the caller.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: RunMode,
    pub policy: AllocationPolicy,
    /// Who asked for the run; recorded on the run and its audit entry.
    pub actor: String,
    /// Overrides the engine's default timeout when set.
    pub timeout: Option<Duration>,
}

impl RunOptions {
    pub fn new(mode: RunMode, actor: impl Into<String>) -> Self {
        Self {
            mode,
            policy: AllocationPolicy::default(),
            actor: actor.into(),
            timeout: None,
        }
    }

    pub fn with_policy(mut self, policy: AllocationPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// In-process capacity state for one cycle: the ledger plus the lock
/// serializing commit runs against it.
struct CycleState {
    ledger: PoolLedger,
    commit_lock: Arc<AsyncMutex<()>>,
}

/// Everything gathered in the synchronous phase of a run, before the
/// caller decides to finish inline or in a spawned task. Holding this
/// value holds the commit lock (commit mode).
struct PreparedRun {
    run: RunRecord,
    cycle: Cycle,
    ordered: Vec<Request>,
    snapshot: PoolSnapshot,
    state: Arc<CycleState>,
    timeout: Option<Duration>,
    _commit_guard: Option<OwnedMutexGuard<()>>,
}

/// The allocation engine: storage-backed run controller.
pub struct AllocationEngine {
    cycles: Arc<dyn CycleStore>,
    requests: Arc<dyn RequestStore>,
    runs: Arc<dyn RunStore>,
    audit: Arc<dyn AuditLog>,
    scoring: ScoringEngine,
    default_timeout: Option<Duration>,

    /// Lazily built per-cycle ledgers. The engine is the only writer of
    /// pool capacity, so a ledger built once from the store stays
    /// authoritative for the life of the process.
    state: Mutex<HashMap<CycleId, Arc<CycleState>>>,
}

impl AllocationEngine {
    pub fn new(
        config: EngineConfig,
        cycles: Arc<dyn CycleStore>,
        requests: Arc<dyn RequestStore>,
        runs: Arc<dyn RunStore>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            cycles,
            requests,
            runs,
            audit,
            scoring: ScoringEngine::new(config.scoring),
            default_timeout: config.default_timeout,
            state: Mutex::new(HashMap::new()),
        }
    }

    fn cycle_state(&self, cycle: &Cycle) -> Arc<CycleState> {
        let mut map = self.state.lock().unwrap();
        Arc::clone(map.entry(cycle.id).or_insert_with(|| {
            Arc::new(CycleState {
                ledger: PoolLedger::from_pools(&cycle.pools),
                commit_lock: Arc::new(AsyncMutex::new(())),
            })
        }))
    }

    // ------------------------------------------------------------------
    // Cycle and request administration
    // ------------------------------------------------------------------

    /// Persist a new cycle after structural validation.
    pub async fn create_cycle(&self, cycle: Cycle) -> EngineResult<Cycle> {
        if cycle.start_date >= cycle.end_date {
            return Err(ValidationError::InvalidCycle {
                reason: format!(
                    "start date {} is not before end date {}",
                    cycle.start_date, cycle.end_date
                ),
            }
            .into());
        }
        for pool in &cycle.pools {
            if pool.cycle_id != cycle.id {
                return Err(ValidationError::InvalidCycle {
                    reason: format!("pool {} does not belong to cycle {}", pool.id, cycle.id),
                }
                .into());
            }
            if pool.committed > pool.capacity {
                return Err(ValidationError::InvalidCycle {
                    reason: format!(
                        "pool {}: committed {} exceeds capacity {}",
                        pool.id, pool.committed, pool.capacity
                    ),
                }
                .into());
            }
        }
        self.cycles.create(cycle.clone()).await?;
        debug!(cycle_id = %cycle.id, pools = cycle.pools.len(), "cycle created");
        Ok(cycle)
    }

    /// Transition a cycle's lifecycle status, with an audit entry. The
    /// store enforces the forward-only `Draft → Active → Closed` order.
    pub async fn set_cycle_status(
        &self,
        cycle_id: CycleId,
        status: CycleStatus,
        actor: impl Into<String>,
    ) -> EngineResult<Cycle> {
        let before = self.cycles.get(cycle_id).await?;
        let updated = self.cycles.set_status(cycle_id, status).await?;

        // Pool state is untouched by a status change; both digests record
        // the state the transition happened under.
        let digest = self.cycle_state(&updated).ledger.state_digest().to_string();
        let entry = AuditEntry::new(
            cycle_id,
            None,
            actor.into(),
            AuditAction::CycleStatusChanged,
            digest.clone(),
            digest,
            serde_json::json!({ "from": before.status, "to": status }),
        );
        self.audit.append(entry).await?;
        obs::emit_audit_appended(None, "CYCLE_STATUS_CHANGED");
        Ok(updated)
    }

    /// Change a pool's total capacity. Fails if the new capacity is below
    /// what is already committed or reserved; audited on success.
    pub async fn set_pool_capacity(
        &self,
        cycle_id: CycleId,
        pool_id: PoolId,
        capacity: u64,
        actor: impl Into<String>,
    ) -> EngineResult<Cycle> {
        let cycle = self.cycles.get(cycle_id).await?;
        if cycle.status == CycleStatus::Closed {
            return Err(EngineError::CycleClosed { cycle_id });
        }
        let old = cycle
            .pool(pool_id)
            .ok_or(StoreError::PoolNotFound(pool_id))?
            .capacity;

        let state = self.cycle_state(&cycle);
        let before_digest = state.ledger.state_digest();
        state.ledger.set_capacity(pool_id, capacity)?;
        let after_digest = state.ledger.state_digest();

        let entry = AuditEntry::new(
            cycle_id,
            None,
            actor.into(),
            AuditAction::PoolCapacityChanged,
            before_digest.to_string(),
            after_digest.to_string(),
            serde_json::json!({ "poolId": pool_id, "from": old, "to": capacity }),
        );
        if let Err(err) = self.audit.append(entry).await {
            // Unaudited mutations must not stand; put the capacity back.
            let _ = state.ledger.set_capacity(pool_id, old);
            return Err(err.into());
        }
        obs::emit_audit_appended(None, "POOL_CAPACITY_CHANGED");

        let mut pools = cycle.pools.clone();
        for pool in &mut pools {
            if pool.id == pool_id {
                pool.capacity = capacity;
            }
        }
        self.cycles.update_pools(cycle_id, pools).await?;
        self.cycles.get(cycle_id).await.map_err(Into::into)
    }

    /// Validate and persist a new allocation request.
    pub async fn submit_request(&self, request: Request) -> EngineResult<Request> {
        let cycle = self.cycles.get(request.cycle_id).await?;
        if cycle.status == CycleStatus::Closed {
            return Err(EngineError::CycleClosed { cycle_id: cycle.id });
        }
        validate_request(&cycle, &request)?;
        for &dep in &request.dependencies {
            let dep_request = self.requests.get(dep).await?;
            if dep_request.cycle_id != request.cycle_id {
                return Err(ValidationError::InvalidCycle {
                    reason: format!("dependency {dep} belongs to a different cycle"),
                }
                .into());
            }
        }
        self.requests.create(request.clone()).await?;
        debug!(request_id = %request.id, cycle_id = %request.cycle_id, "request submitted");
        Ok(request)
    }

    // ------------------------------------------------------------------
    // Runs
    // ------------------------------------------------------------------

    /// Start a run asynchronously. Validation, locking, and snapshotting
    /// happen before this returns, so `LockHeld` and `CycleNotRunnable`
    /// surface to the caller; evaluation and application continue in a
    /// spawned task. Returns the `Pending` run record to poll.
    pub async fn start_run(
        self: &Arc<Self>,
        cycle_id: CycleId,
        opts: RunOptions,
    ) -> EngineResult<RunRecord> {
        let prepared = self.prepare(cycle_id, opts).await?;
        let pending = prepared.run.clone();
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.finish(prepared).await;
        });
        Ok(pending)
    }

    /// Run to completion inline and return the terminal record. Used by
    /// the CLI and tests; the daemon uses [`Self::start_run`].
    pub async fn execute_run(
        self: &Arc<Self>,
        cycle_id: CycleId,
        opts: RunOptions,
    ) -> EngineResult<RunRecord> {
        let prepared = self.prepare(cycle_id, opts).await?;
        Ok(self.finish(prepared).await)
    }

    /// Synchronous phase: validate, lock, snapshot, persist `Pending`.
    async fn prepare(&self, cycle_id: CycleId, opts: RunOptions) -> EngineResult<PreparedRun> {
        validate_policy(&opts.policy)?;

        let cycle = self.cycles.get(cycle_id).await?;
        let runnable = match opts.mode {
            RunMode::Commit => cycle.status == CycleStatus::Active,
            RunMode::Scenario => {
                matches!(cycle.status, CycleStatus::Draft | CycleStatus::Active)
            }
        };
        if !runnable {
            return Err(EngineError::CycleNotRunnable {
                cycle_id,
                status: cycle.status,
                mode: opts.mode,
            });
        }

        let state = self.cycle_state(&cycle);
        let commit_guard = match opts.mode {
            RunMode::Commit => Some(
                state
                    .commit_lock
                    .clone()
                    .try_lock_owned()
                    .map_err(|_| EngineError::LockHeld { cycle_id })?,
            ),
            RunMode::Scenario => None,
        };

        let pending = self
            .requests
            .list(cycle_id, Some(RequestStatus::Pending))
            .await?;
        validate_requests(&cycle, &pending)?;
        let ordered = order_requests(pending);

        let snapshot = state.ledger.snapshot(opts.mode);
        let run = RunRecord::new(
            cycle_id,
            opts.mode,
            opts.policy,
            opts.actor,
            state.ledger.state_digest().to_string(),
        );
        self.runs.create(run.clone()).await?;

        Ok(PreparedRun {
            run,
            cycle,
            ordered,
            snapshot,
            state,
            timeout: opts.timeout.or(self.default_timeout),
            _commit_guard: commit_guard,
        })
    }

    /// Evaluation and application phase. Never fails outward: internal
    /// errors become a `Failed` run record with reservations released.
    async fn finish(&self, prepared: PreparedRun) -> RunRecord {
        let span = obs::run_span(prepared.run.id);
        self.finish_inner(prepared).instrument(span).await
    }

    async fn finish_inner(&self, prepared: PreparedRun) -> RunRecord {
        let PreparedRun {
            mut run,
            cycle,
            ordered,
            snapshot,
            state,
            timeout,
            _commit_guard,
        } = prepared;

        let started = Instant::now();
        obs::emit_run_started(run.id, run.mode, ordered.len());

        run.status = RunStatus::Running;
        run.started_at = Some(Utc::now());
        if let Err(err) = self.runs.update(run.clone()).await {
            obs::emit_run_finalize_error(run.id, &err);
        }

        let outcome = allocate(&snapshot, &ordered, &run.policy);
        run.results = self.build_results(&ordered, &outcome);
        let grants = total_grants(&run.results);

        // The reservation set lives outside the timed future: if the
        // timeout drops the staging future mid-reserve, the tokens taken
        // so far are still here to release.
        let mut reservations = ReservationSet::new();
        let applied = if run.mode == RunMode::Scenario {
            // Scenarios plan purely against their snapshot and take
            // nothing from the shared ledger, so they cannot contend
            // with an in-flight commit's reservations.
            Ok(false)
        } else {
            let staged = match timeout {
                Some(budget) => {
                    let stage = self.stage_commit(&cycle, &run, &grants, &state, &mut reservations);
                    match tokio::time::timeout(budget, stage).await {
                        Ok(result) => result,
                        Err(_) => Err(EngineError::Timeout {
                            timeout_ms: budget.as_millis() as u64,
                        }),
                    }
                }
                None => {
                    self.stage_commit(&cycle, &run, &grants, &state, &mut reservations)
                        .await
                }
            };
            match staged {
                Ok(()) => {
                    // The audit entry is the commit point: from here the
                    // grants stand. The write-back runs outside the
                    // timeout; an error in it is logged, not reverted.
                    if let Err(err) = self
                        .complete_commit(&cycle, &run, &state, &mut reservations)
                        .await
                    {
                        obs::emit_run_finalize_error(run.id, &err);
                    }
                    Ok(true)
                }
                Err(err) => Err(err),
            }
        };

        match applied {
            Ok(committed) => {
                run.committed = committed;
                run.status = RunStatus::Succeeded;
            }
            Err(err) => {
                reservations.release_all(&state.ledger);
                run.committed = false;
                run.status = RunStatus::Failed;
                run.error = Some(err.to_string());
                error!(run_id = %run.id, error = %err, "allocation run failed");
            }
        }

        run.finished_at = Some(Utc::now());
        run.summary = Some(summarize(&run.results, started.elapsed()));
        if let Err(err) = self.runs.update(run.clone()).await {
            obs::emit_run_finalize_error(run.id, &err);
        }
        obs::emit_run_finished(
            run.id,
            run.status,
            run.committed,
            started.elapsed().as_millis() as u64,
        );
        run
    }

    /// Revocable half of a commit: reserve the grants, then append the
    /// audit entry. An error — or a timeout cancelling this future —
    /// leaves nothing committed and nothing written; the caller releases
    /// whatever was reserved.
    async fn stage_commit(
        &self,
        cycle: &Cycle,
        run: &RunRecord,
        grants: &BTreeMap<PoolId, u64>,
        state: &CycleState,
        reservations: &mut ReservationSet,
    ) -> EngineResult<()> {
        reservations.reserve_all(&state.ledger, grants)?;

        let before = state.ledger.committed_state();
        let before_digest = StateDigest::of_pool_state(&before);
        let mut after = before.clone();
        for (pool_id, qty) in grants {
            if let Some((_, committed)) = after.get_mut(pool_id) {
                *committed += qty;
            }
        }
        let after_digest = StateDigest::of_pool_state(&after);

        let (allocated, partial, denied) = decision_counts(&run.results);
        let entry = AuditEntry::new(
            cycle.id,
            Some(run.id),
            run.actor.clone(),
            AuditAction::RunCommitted,
            before_digest.to_string(),
            after_digest.to_string(),
            serde_json::json!({
                "totalRequests": run.results.len(),
                "allocated": allocated,
                "partial": partial,
                "denied": denied,
                "grantedPerPool": grants,
            }),
        );
        self.audit.append(entry).await?;
        obs::emit_audit_appended(Some(run.id), "RUN_COMMITTED");
        Ok(())
    }

    /// Irrevocable half: move the reservations into committed capacity
    /// and write request statuses and pool counters back. Runs only once
    /// the audit entry exists, outside any run timeout, so a slow store
    /// cannot strand a half-applied commit.
    async fn complete_commit(
        &self,
        cycle: &Cycle,
        run: &RunRecord,
        state: &CycleState,
        reservations: &mut ReservationSet,
    ) -> EngineResult<()> {
        reservations.commit_all(&state.ledger)?;

        for result in &run.results {
            let status = match result.decision {
                DecisionKind::Allocated => RequestStatus::Allocated,
                DecisionKind::Partial => RequestStatus::Partial,
                DecisionKind::Denied => RequestStatus::Denied,
            };
            self.requests.set_status(result.request_id, status).await?;
        }

        let committed = state.ledger.committed_state();
        let mut pools = cycle.pools.clone();
        for pool in &mut pools {
            if let Some(&(capacity, committed_qty)) = committed.get(&pool.id) {
                pool.capacity = capacity;
                pool.committed = committed_qty;
            }
        }
        self.cycles.update_pools(cycle.id, pools).await?;
        Ok(())
    }

    fn build_results(
        &self,
        ordered: &[Request],
        outcome: &AllocationOutcome,
    ) -> Vec<AllocationResult> {
        let as_of = Utc::now().date_naive();
        ordered
            .iter()
            .zip(&outcome.decisions)
            .enumerate()
            .map(|(index, (request, decision))| {
                let breakdown = self.scoring.score(request, as_of);
                AllocationResult {
                    request_id: request.id,
                    decision: decision.kind,
                    granted: decision.granted.clone(),
                    reason: decision.reason.clone(),
                    rank: (index + 1) as u32,
                    score: breakdown.total,
                    score_breakdown: serde_json::to_value(breakdown)
                        .unwrap_or(serde_json::Value::Null),
                    trace: decision.trace.clone(),
                }
            })
            .collect()
    }
}

fn validate_policy(policy: &AllocationPolicy) -> Result<(), ValidationError> {
    if let Some(cap) = policy.per_pool_cap {
        if !(cap > 0.0 && cap <= 1.0) {
            return Err(ValidationError::InvalidPolicy {
                reason: format!("perPoolCap must be in (0, 1], got {cap}"),
            });
        }
    }
    Ok(())
}

/// Total quantity granted per pool across all results.
fn total_grants(results: &[AllocationResult]) -> BTreeMap<PoolId, u64> {
    let mut grants = BTreeMap::new();
    for result in results {
        for (&pool_id, &qty) in &result.granted {
            *grants.entry(pool_id).or_insert(0) += qty;
        }
    }
    grants
}

fn decision_counts(results: &[AllocationResult]) -> (u64, u64, u64) {
    let mut counts = (0, 0, 0);
    for result in results {
        match result.decision {
            DecisionKind::Allocated => counts.0 += 1,
            DecisionKind::Partial => counts.1 += 1,
            DecisionKind::Denied => counts.2 += 1,
        }
    }
    counts
}

fn summarize(results: &[AllocationResult], elapsed: Duration) -> RunSummary {
    let (allocated, partial, denied) = decision_counts(results);
    RunSummary {
        total_requests: results.len() as u64,
        allocated,
        partial,
        denied,
        granted_per_pool: total_grants(results),
        duration_ms: elapsed.as_millis() as u64,
    }
}
