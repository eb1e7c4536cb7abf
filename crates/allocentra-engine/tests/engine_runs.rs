//! End-to-end run workflows against the in-memory stores: commit and
//! scenario lifecycles, lock contention, commit atomicity under audit
//! failure, and timeout recovery.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;

use allocentra_engine::{AllocationEngine, EngineConfig, EngineError, RunOptions, ValidationError};
use allocentra_store::{
    AllocationPolicy, AuditAction, AuditEntry, AuditLog, AuditQuery, Cycle, CycleId, CycleStatus,
    CycleStore, DecisionKind, MemoryAuditLog, MemoryCycleStore, MemoryRequestStore, MemoryRunStore,
    Pool, PoolId, PoolKind, Request, RequestId, RequestStatus, RequestStore, RunMode, RunStatus,
    RunStore, StoreError, StoreResult,
};

// ----------------------------------------------------------------------
// Fixtures and test doubles
// ----------------------------------------------------------------------

struct Harness {
    engine: Arc<AllocationEngine>,
    cycles: Arc<MemoryCycleStore>,
    requests: Arc<dyn RequestStore>,
    runs: Arc<MemoryRunStore>,
    audit: Arc<dyn AuditLog>,
}

fn harness_with(requests: Arc<dyn RequestStore>, audit: Arc<dyn AuditLog>) -> Harness {
    let cycles = Arc::new(MemoryCycleStore::new());
    let runs = Arc::new(MemoryRunStore::new());
    let engine = Arc::new(AllocationEngine::new(
        EngineConfig::default(),
        cycles.clone(),
        requests.clone(),
        runs.clone(),
        audit.clone(),
    ));
    Harness {
        engine,
        cycles,
        requests,
        runs,
        audit,
    }
}

fn harness_with_audit(audit: Arc<dyn AuditLog>) -> Harness {
    harness_with(Arc::new(MemoryRequestStore::new()), audit)
}

fn harness() -> Harness {
    harness_with_audit(Arc::new(MemoryAuditLog::new()))
}

fn pool(cycle_id: CycleId, kind: PoolKind, capacity: u64) -> Pool {
    Pool {
        id: PoolId::new(),
        cycle_id,
        kind,
        name: match kind {
            PoolKind::Budget => "Opex".to_string(),
            PoolKind::Resource => "Vehicles".to_string(),
        },
        unit: match kind {
            PoolKind::Budget => "USD".to_string(),
            PoolKind::Resource => "COUNT".to_string(),
        },
        capacity,
        committed: 0,
    }
}

/// Create a cycle with a budget pool and a resource pool, activate it, and
/// return `(cycle, budget_pool_id, resource_pool_id)`.
async fn active_cycle(h: &Harness, budget: u64, resources: u64) -> (Cycle, PoolId, PoolId) {
    let mut cycle = Cycle::new(
        "Q3 2026".to_string(),
        NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
        NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
        "ops".to_string(),
    );
    cycle
        .pools
        .push(pool(cycle.id, PoolKind::Budget, budget));
    cycle
        .pools
        .push(pool(cycle.id, PoolKind::Resource, resources));
    let budget_id = cycle.pools[0].id;
    let resource_id = cycle.pools[1].id;
    let cycle = h.engine.create_cycle(cycle).await.unwrap();
    let cycle = h
        .engine
        .set_cycle_status(cycle.id, CycleStatus::Active, "ops")
        .await
        .unwrap();
    (cycle, budget_id, resource_id)
}

async fn submit(h: &Harness, request: Request) -> Request {
    h.engine.submit_request(request).await.unwrap()
}

/// Audit log that rejects the first `failures` appends, then delegates.
struct FlakyAuditLog {
    inner: MemoryAuditLog,
    failures: AtomicUsize,
}

impl FlakyAuditLog {
    fn new(failures: usize) -> Self {
        Self {
            inner: MemoryAuditLog::new(),
            failures: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl AuditLog for FlakyAuditLog {
    async fn append(&self, entry: AuditEntry) -> StoreResult<()> {
        // Only sabotage run commits; lifecycle entries go through so the
        // fixtures can activate cycles.
        if entry.action == AuditAction::RunCommitted {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Backend("audit backend unavailable".to_string()));
            }
        }
        self.inner.append(entry).await
    }

    async fn query(&self, query: AuditQuery) -> StoreResult<Vec<AuditEntry>> {
        self.inner.query(query).await
    }
}

/// Audit log that sleeps before the first `slow` run-commit appends.
struct SlowAuditLog {
    inner: MemoryAuditLog,
    slow: AtomicUsize,
    delay: Duration,
}

impl SlowAuditLog {
    fn new(slow: usize, delay: Duration) -> Self {
        Self {
            inner: MemoryAuditLog::new(),
            slow: AtomicUsize::new(slow),
            delay,
        }
    }
}

#[async_trait]
impl AuditLog for SlowAuditLog {
    async fn append(&self, entry: AuditEntry) -> StoreResult<()> {
        if entry.action == AuditAction::RunCommitted {
            let remaining = self.slow.load(Ordering::SeqCst);
            if remaining > 0 {
                self.slow.store(remaining - 1, Ordering::SeqCst);
                tokio::time::sleep(self.delay).await;
            }
        }
        self.inner.append(entry).await
    }

    async fn query(&self, query: AuditQuery) -> StoreResult<Vec<AuditEntry>> {
        self.inner.query(query).await
    }
}

/// Request store whose status writes stall, simulating a slow backend.
struct StalledRequestStore {
    inner: MemoryRequestStore,
    delay: Duration,
}

#[async_trait]
impl RequestStore for StalledRequestStore {
    async fn create(&self, request: Request) -> StoreResult<()> {
        self.inner.create(request).await
    }

    async fn get(&self, request_id: RequestId) -> StoreResult<Request> {
        self.inner.get(request_id).await
    }

    async fn list(
        &self,
        cycle_id: CycleId,
        status: Option<RequestStatus>,
    ) -> StoreResult<Vec<Request>> {
        self.inner.list(cycle_id, status).await
    }

    async fn set_status(&self, request_id: RequestId, status: RequestStatus) -> StoreResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner.set_status(request_id, status).await
    }
}

// ----------------------------------------------------------------------
// Commit workflow
// ----------------------------------------------------------------------

#[tokio::test]
async fn commit_run_applies_grants_and_statuses() {
    let h = harness();
    let (cycle, budget, vehicles) = active_cycle(&h, 100_000, 10).await;

    let fundable = submit(
        &h,
        Request::new(cycle.id, "alice".to_string(), "Field kit".to_string())
            .with_amount(budget, 60_000)
            .with_amount(vehicles, 2)
            .with_priority(1),
    )
    .await;
    let partial = submit(
        &h,
        Request::new(cycle.id, "bob".to_string(), "Refit".to_string())
            .with_amount(budget, 70_000)
            .with_priority(2),
    )
    .await;

    let run = h
        .engine
        .execute_run(cycle.id, RunOptions::new(RunMode::Commit, "ops"))
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Succeeded);
    assert!(run.committed);
    assert_eq!(run.results.len(), 2);
    assert_eq!(run.results[0].request_id, fundable.id);
    assert_eq!(run.results[0].decision, DecisionKind::Allocated);
    assert_eq!(run.results[1].decision, DecisionKind::Partial);
    assert_eq!(run.results[1].granted[&budget], 40_000);

    // Grants were written back to the persisted pools.
    let stored = h.cycles.get(cycle.id).await.unwrap();
    assert_eq!(stored.pool(budget).unwrap().committed, 100_000);
    assert_eq!(stored.pool(vehicles).unwrap().committed, 2);

    // Request statuses reflect the decisions.
    let alice = h.requests.get(fundable.id).await.unwrap();
    let bob = h.requests.get(partial.id).await.unwrap();
    assert_eq!(alice.status, RequestStatus::Allocated);
    assert_eq!(bob.status, RequestStatus::Partial);

    // Exactly one RUN_COMMITTED entry, linked to the run, with a digest
    // transition.
    let entries = h
        .audit
        .query(AuditQuery::for_cycle(cycle.id))
        .await
        .unwrap();
    let commits: Vec<_> = entries
        .iter()
        .filter(|e| e.action == AuditAction::RunCommitted)
        .collect();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].run_id, Some(run.id));
    assert_ne!(commits[0].before_digest, commits[0].after_digest);
    assert_eq!(commits[0].before_digest, run.snapshot_digest);
}

#[tokio::test]
async fn commit_runs_compound_across_invocations() {
    let h = harness();
    let (cycle, budget, _) = active_cycle(&h, 100, 10).await;

    submit(
        &h,
        Request::new(cycle.id, "a".to_string(), "first".to_string()).with_amount(budget, 60),
    )
    .await;
    let run1 = h
        .engine
        .execute_run(cycle.id, RunOptions::new(RunMode::Commit, "ops"))
        .await
        .unwrap();
    assert!(run1.committed);

    // The second run only sees what the first left behind.
    submit(
        &h,
        Request::new(cycle.id, "b".to_string(), "second".to_string()).with_amount(budget, 60),
    )
    .await;
    let run2 = h
        .engine
        .execute_run(cycle.id, RunOptions::new(RunMode::Commit, "ops"))
        .await
        .unwrap();
    assert_eq!(run2.results.len(), 1);
    assert_eq!(run2.results[0].decision, DecisionKind::Partial);
    assert_eq!(run2.results[0].granted[&budget], 40);

    let stored = h.cycles.get(cycle.id).await.unwrap();
    assert_eq!(stored.pool(budget).unwrap().committed, 100);
}

#[tokio::test]
async fn no_partial_policy_denies_shortfalls() {
    let h = harness();
    let (cycle, budget, _) = active_cycle(&h, 100, 10).await;
    let req = submit(
        &h,
        Request::new(cycle.id, "a".to_string(), "big ask".to_string()).with_amount(budget, 150),
    )
    .await;

    let opts = RunOptions::new(RunMode::Commit, "ops").with_policy(AllocationPolicy {
        partial_allocation_allowed: false,
        per_pool_cap: None,
    });
    let run = h.engine.execute_run(cycle.id, opts).await.unwrap();

    assert_eq!(run.results[0].decision, DecisionKind::Denied);
    assert!(run.results[0].granted.is_empty());
    assert_eq!(
        h.requests.get(req.id).await.unwrap().status,
        RequestStatus::Denied
    );
    // Nothing granted, nothing committed.
    let stored = h.cycles.get(cycle.id).await.unwrap();
    assert_eq!(stored.pool(budget).unwrap().committed, 0);
}

// ----------------------------------------------------------------------
// Scenario workflow
// ----------------------------------------------------------------------

#[tokio::test]
async fn scenario_run_never_mutates_shared_state() {
    let h = harness();
    let (cycle, budget, _) = active_cycle(&h, 100, 10).await;
    let req = submit(
        &h,
        Request::new(cycle.id, "a".to_string(), "what if".to_string()).with_amount(budget, 80),
    )
    .await;

    let run = h
        .engine
        .execute_run(cycle.id, RunOptions::new(RunMode::Scenario, "planner"))
        .await
        .unwrap();

    assert_eq!(run.status, RunStatus::Succeeded);
    assert!(!run.committed);
    assert_eq!(run.results[0].decision, DecisionKind::Allocated);

    // No pool, request, or audit mutation.
    let stored = h.cycles.get(cycle.id).await.unwrap();
    assert_eq!(stored.pool(budget).unwrap().committed, 0);
    assert_eq!(
        h.requests.get(req.id).await.unwrap().status,
        RequestStatus::Pending
    );
    let entries = h
        .audit
        .query(AuditQuery::for_cycle(cycle.id))
        .await
        .unwrap();
    assert!(entries.iter().all(|e| e.action != AuditAction::RunCommitted));
}

#[tokio::test]
async fn scenario_allowed_on_draft_cycle() {
    let h = harness();
    let mut cycle = Cycle::new(
        "draft".to_string(),
        NaiveDate::from_ymd_opt(2026, 7, 1).unwrap(),
        NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
        "ops".to_string(),
    );
    cycle.pools.push(pool(cycle.id, PoolKind::Budget, 100));
    let cycle = h.engine.create_cycle(cycle).await.unwrap();

    let scenario = h
        .engine
        .execute_run(cycle.id, RunOptions::new(RunMode::Scenario, "planner"))
        .await
        .unwrap();
    assert_eq!(scenario.status, RunStatus::Succeeded);

    let err = h
        .engine
        .execute_run(cycle.id, RunOptions::new(RunMode::Commit, "ops"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::CycleNotRunnable { .. }));
}

#[tokio::test]
async fn identical_scenarios_produce_identical_results() {
    let h = harness();
    let (cycle, budget, vehicles) = active_cycle(&h, 100_000, 10).await;
    for i in 0..5 {
        submit(
            &h,
            Request::new(cycle.id, format!("r{i}"), format!("request {i}"))
                .with_amount(budget, 30_000)
                .with_amount(vehicles, 3)
                .with_priority((i % 3) as u32 + 1),
        )
        .await;
    }

    let first = h
        .engine
        .execute_run(cycle.id, RunOptions::new(RunMode::Scenario, "planner"))
        .await
        .unwrap();
    let second = h
        .engine
        .execute_run(cycle.id, RunOptions::new(RunMode::Scenario, "planner"))
        .await
        .unwrap();

    assert_eq!(first.snapshot_digest, second.snapshot_digest);
    assert_eq!(first.results, second.results);
}

#[tokio::test]
async fn scenario_overlapping_commit_reservations_succeeds() {
    let audit = Arc::new(SlowAuditLog::new(1, Duration::from_millis(300)));
    let h = harness_with_audit(audit);
    let (cycle, budget, _) = active_cycle(&h, 100, 10).await;
    submit(
        &h,
        Request::new(cycle.id, "a".to_string(), "most of it".to_string()).with_amount(budget, 80),
    )
    .await;

    let commit = h
        .engine
        .start_run(cycle.id, RunOptions::new(RunMode::Commit, "ops"))
        .await
        .unwrap();
    // Give the spawned commit time to reserve its 80 units and stall in
    // the audit append.
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The scenario plans against capacity - committed; the commit's
    // in-flight reservation neither shrinks its grants nor fails it.
    let scenario = h
        .engine
        .execute_run(cycle.id, RunOptions::new(RunMode::Scenario, "planner"))
        .await
        .unwrap();
    assert_eq!(scenario.status, RunStatus::Succeeded);
    assert_eq!(scenario.results[0].decision, DecisionKind::Allocated);
    assert_eq!(scenario.results[0].granted[&budget], 80);

    let finished = wait_terminal(&h, commit.id).await;
    assert_eq!(finished.status, RunStatus::Succeeded);
    assert!(finished.committed);
}

// ----------------------------------------------------------------------
// Validation and lifecycle guards
// ----------------------------------------------------------------------

#[tokio::test]
async fn submit_rejects_empty_and_cross_cycle_requests() {
    let h = harness();
    let (cycle, _, _) = active_cycle(&h, 100, 10).await;
    let (other, other_budget, _) = active_cycle(&h, 100, 10).await;

    let empty = Request::new(cycle.id, "a".to_string(), "nothing".to_string());
    let err = h.engine.submit_request(empty).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::EmptyRequest { .. })
    ));

    let foreign = Request::new(cycle.id, "a".to_string(), "wrong pool".to_string())
        .with_amount(other_budget, 10);
    let err = h.engine.submit_request(foreign).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::CrossCycleReference { .. })
    ));
    drop(other);
}

#[tokio::test]
async fn closed_cycle_rejects_requests_and_runs() {
    let h = harness();
    let (cycle, budget, _) = active_cycle(&h, 100, 10).await;
    h.engine
        .set_cycle_status(cycle.id, CycleStatus::Closed, "ops")
        .await
        .unwrap();

    let req =
        Request::new(cycle.id, "late".to_string(), "too late".to_string()).with_amount(budget, 10);
    let err = h.engine.submit_request(req).await.unwrap_err();
    assert!(matches!(err, EngineError::CycleClosed { .. }));

    for mode in [RunMode::Commit, RunMode::Scenario] {
        let err = h
            .engine
            .execute_run(cycle.id, RunOptions::new(mode, "ops"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::CycleNotRunnable { .. }));
    }
}

#[tokio::test]
async fn invalid_policy_is_rejected_before_any_run_record() {
    let h = harness();
    let (cycle, _, _) = active_cycle(&h, 100, 10).await;

    let opts = RunOptions::new(RunMode::Scenario, "ops").with_policy(AllocationPolicy {
        partial_allocation_allowed: true,
        per_pool_cap: Some(1.5),
    });
    let err = h.engine.execute_run(cycle.id, opts).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::InvalidPolicy { .. })
    ));
    assert!(h.runs.list(cycle.id).await.unwrap().is_empty());
}

// ----------------------------------------------------------------------
// Concurrency: commit lock
// ----------------------------------------------------------------------

#[tokio::test]
async fn concurrent_commit_fails_fast_scenario_passes() {
    let audit = Arc::new(SlowAuditLog::new(1, Duration::from_millis(200)));
    let h = harness_with_audit(audit);
    let (cycle, budget, _) = active_cycle(&h, 100, 10).await;
    submit(
        &h,
        Request::new(cycle.id, "a".to_string(), "slow one".to_string()).with_amount(budget, 50),
    )
    .await;

    let first = h
        .engine
        .start_run(cycle.id, RunOptions::new(RunMode::Commit, "ops"))
        .await
        .unwrap();
    assert_eq!(first.status, RunStatus::Pending);

    // While the first commit holds the lock: a second commit is refused,
    // a scenario sails through.
    let err = h
        .engine
        .start_run(cycle.id, RunOptions::new(RunMode::Commit, "ops"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::LockHeld { .. }));

    let scenario = h
        .engine
        .execute_run(cycle.id, RunOptions::new(RunMode::Scenario, "planner"))
        .await
        .unwrap();
    assert_eq!(scenario.status, RunStatus::Succeeded);

    // Wait for the first run to finish, then the lock is free again.
    let finished = wait_terminal(&h, first.id).await;
    assert_eq!(finished.status, RunStatus::Succeeded);
    assert!(finished.committed);

    let again = h
        .engine
        .execute_run(cycle.id, RunOptions::new(RunMode::Commit, "ops"))
        .await
        .unwrap();
    assert_eq!(again.status, RunStatus::Succeeded);
}

async fn wait_terminal(h: &Harness, run_id: allocentra_store::RunId) -> allocentra_store::RunRecord {
    for _ in 0..100 {
        let run = h.runs.get(run_id).await.unwrap();
        if run.status.is_terminal() {
            return run;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run {run_id} never reached a terminal status");
}

// ----------------------------------------------------------------------
// Atomicity: audit failure and timeout
// ----------------------------------------------------------------------

#[tokio::test]
async fn audit_failure_fails_run_and_leaves_ledger_unchanged() {
    let audit = Arc::new(FlakyAuditLog::new(1));
    let h = harness_with_audit(audit);
    let (cycle, budget, _) = active_cycle(&h, 100, 10).await;
    let req = submit(
        &h,
        Request::new(cycle.id, "a".to_string(), "doomed".to_string()).with_amount(budget, 60),
    )
    .await;

    let failed = h
        .engine
        .execute_run(cycle.id, RunOptions::new(RunMode::Commit, "ops"))
        .await
        .unwrap();
    assert_eq!(failed.status, RunStatus::Failed);
    assert!(!failed.committed);
    assert!(failed.error.as_deref().unwrap().contains("audit"));
    // The trace survives even though nothing was applied.
    assert_eq!(failed.results.len(), 1);
    assert_eq!(failed.results[0].decision, DecisionKind::Allocated);

    // Nothing leaked: the request is still pending and the pool untouched.
    assert_eq!(
        h.requests.get(req.id).await.unwrap().status,
        RequestStatus::Pending
    );
    let stored = h.cycles.get(cycle.id).await.unwrap();
    assert_eq!(stored.pool(budget).unwrap().committed, 0);

    // With the audit healthy again the same grant fits in full, which it
    // could not if the failed run had leaked a reservation.
    let retry = h
        .engine
        .execute_run(cycle.id, RunOptions::new(RunMode::Commit, "ops"))
        .await
        .unwrap();
    assert_eq!(retry.status, RunStatus::Succeeded);
    assert_eq!(retry.results[0].granted[&budget], 60);
    assert!(retry.committed);
}

#[tokio::test]
async fn timed_out_run_releases_reservations() {
    let audit = Arc::new(SlowAuditLog::new(1, Duration::from_millis(500)));
    let h = harness_with_audit(audit);
    let (cycle, budget, _) = active_cycle(&h, 100, 10).await;
    submit(
        &h,
        Request::new(cycle.id, "a".to_string(), "slow".to_string()).with_amount(budget, 60),
    )
    .await;

    let mut opts = RunOptions::new(RunMode::Commit, "ops");
    opts.timeout = Some(Duration::from_millis(20));
    let timed_out = h.engine.execute_run(cycle.id, opts).await.unwrap();
    assert_eq!(timed_out.status, RunStatus::Failed);
    assert!(!timed_out.committed);
    assert!(timed_out.error.as_deref().unwrap().contains("budget"));

    let stored = h.cycles.get(cycle.id).await.unwrap();
    assert_eq!(stored.pool(budget).unwrap().committed, 0);

    // Reservations were released; a retry without the deadline commits.
    let retry = h
        .engine
        .execute_run(cycle.id, RunOptions::new(RunMode::Commit, "ops"))
        .await
        .unwrap();
    assert_eq!(retry.status, RunStatus::Succeeded);
    assert_eq!(retry.results[0].granted[&budget], 60);
}

#[tokio::test]
async fn slow_status_write_back_never_strands_a_commit() {
    // Status writes stall well past the run budget. Once the audit entry
    // is in, the commit must stand in full: the write-back runs to
    // completion instead of being cancelled half-applied.
    let requests = Arc::new(StalledRequestStore {
        inner: MemoryRequestStore::new(),
        delay: Duration::from_millis(100),
    });
    let h = harness_with(requests, Arc::new(MemoryAuditLog::new()));
    let (cycle, budget, _) = active_cycle(&h, 100, 10).await;
    let req = submit(
        &h,
        Request::new(cycle.id, "a".to_string(), "slow write".to_string()).with_amount(budget, 60),
    )
    .await;

    let mut opts = RunOptions::new(RunMode::Commit, "ops");
    opts.timeout = Some(Duration::from_millis(20));
    let run = h.engine.execute_run(cycle.id, opts).await.unwrap();

    assert_eq!(run.status, RunStatus::Succeeded);
    assert!(run.committed);
    assert_eq!(
        h.requests.get(req.id).await.unwrap().status,
        RequestStatus::Allocated
    );
    let stored = h.cycles.get(cycle.id).await.unwrap();
    assert_eq!(stored.pool(budget).unwrap().committed, 60);

    // Exactly one audited commit, and the persisted state agrees with it.
    let entries = h
        .audit
        .query(AuditQuery::for_cycle(cycle.id))
        .await
        .unwrap();
    let commits = entries
        .iter()
        .filter(|e| e.action == AuditAction::RunCommitted)
        .count();
    assert_eq!(commits, 1);

    // Headroom reflects the full grant: a follow-up ask for the remainder
    // gets exactly what is left, no more.
    submit(
        &h,
        Request::new(cycle.id, "b".to_string(), "remainder".to_string()).with_amount(budget, 60),
    )
    .await;
    let next = h
        .engine
        .execute_run(cycle.id, RunOptions::new(RunMode::Commit, "ops"))
        .await
        .unwrap();
    assert_eq!(next.results[0].decision, DecisionKind::Partial);
    assert_eq!(next.results[0].granted[&budget], 40);
}

// ----------------------------------------------------------------------
// Audit trail chaining
// ----------------------------------------------------------------------

#[tokio::test]
async fn audit_digests_chain_across_mutations() {
    let h = harness();
    let (cycle, budget, _) = active_cycle(&h, 100, 10).await;
    submit(
        &h,
        Request::new(cycle.id, "a".to_string(), "spend".to_string()).with_amount(budget, 40),
    )
    .await;

    h.engine
        .execute_run(cycle.id, RunOptions::new(RunMode::Commit, "ops"))
        .await
        .unwrap();
    h.engine
        .set_pool_capacity(cycle.id, budget, 200, "ops")
        .await
        .unwrap();

    let entries = h
        .audit
        .query(AuditQuery::for_cycle(cycle.id))
        .await
        .unwrap();
    let mutations: Vec<_> = entries
        .iter()
        .filter(|e| e.action != AuditAction::CycleStatusChanged)
        .collect();
    assert_eq!(mutations.len(), 2);
    assert_eq!(mutations[0].action, AuditAction::RunCommitted);
    assert_eq!(mutations[1].action, AuditAction::PoolCapacityChanged);
    // Each mutation starts from the state the previous one left.
    assert_eq!(mutations[1].before_digest, mutations[0].after_digest);
}

#[tokio::test]
async fn capacity_cannot_shrink_below_committed() {
    let h = harness();
    let (cycle, budget, _) = active_cycle(&h, 100, 10).await;
    submit(
        &h,
        Request::new(cycle.id, "a".to_string(), "spend".to_string()).with_amount(budget, 70),
    )
    .await;
    h.engine
        .execute_run(cycle.id, RunOptions::new(RunMode::Commit, "ops"))
        .await
        .unwrap();

    let err = h
        .engine
        .set_pool_capacity(cycle.id, budget, 50, "ops")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Ledger(_)));

    // Growing is fine and opens headroom for the next run.
    let grown = h
        .engine
        .set_pool_capacity(cycle.id, budget, 300, "ops")
        .await
        .unwrap();
    assert_eq!(grown.pool(budget).unwrap().capacity, 300);
    assert_eq!(grown.pool(budget).unwrap().committed, 70);
}

// ----------------------------------------------------------------------
// Dependencies
// ----------------------------------------------------------------------

#[tokio::test]
async fn unmet_dependency_denies_dependent_request() {
    let h = harness();
    let (cycle, budget, _) = active_cycle(&h, 100, 10).await;

    // The dependency asks for more than the pool holds, so it lands
    // PARTIAL; the dependent must then be denied.
    let base = submit(
        &h,
        Request::new(cycle.id, "a".to_string(), "base".to_string())
            .with_amount(budget, 150)
            .with_priority(1),
    )
    .await;
    let mut dependent = Request::new(cycle.id, "b".to_string(), "follow-up".to_string())
        .with_amount(budget, 10)
        .with_priority(2);
    dependent.dependencies.push(base.id);
    submit(&h, dependent).await;

    let run = h
        .engine
        .execute_run(cycle.id, RunOptions::new(RunMode::Commit, "ops"))
        .await
        .unwrap();
    assert_eq!(run.results[0].decision, DecisionKind::Partial);
    assert_eq!(run.results[1].decision, DecisionKind::Denied);
    assert!(run.results[1].reason.contains("dependency"));

    // Only the partial grant reached the ledger.
    let stored = h.cycles.get(cycle.id).await.unwrap();
    assert_eq!(stored.pool(budget).unwrap().committed, 100);
}

#[tokio::test]
async fn dependency_must_exist_at_submission() {
    let h = harness();
    let (cycle, budget, _) = active_cycle(&h, 100, 10).await;
    let mut request = Request::new(cycle.id, "a".to_string(), "orphan dep".to_string())
        .with_amount(budget, 10);
    request.dependencies.push(RequestId::new());

    let err = h.engine.submit_request(request).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Store(StoreError::RequestNotFound(_))
    ));
}

// ----------------------------------------------------------------------
// Summary bookkeeping
// ----------------------------------------------------------------------

#[tokio::test]
async fn summary_totals_match_results() {
    let h = harness();
    let (cycle, budget, vehicles) = active_cycle(&h, 100, 4).await;
    submit(
        &h,
        Request::new(cycle.id, "a".to_string(), "one".to_string())
            .with_amount(budget, 50)
            .with_priority(1),
    )
    .await;
    submit(
        &h,
        Request::new(cycle.id, "b".to_string(), "two".to_string())
            .with_amount(budget, 80)
            .with_amount(vehicles, 2)
            .with_priority(2),
    )
    .await;

    let run = h
        .engine
        .execute_run(cycle.id, RunOptions::new(RunMode::Commit, "ops"))
        .await
        .unwrap();
    let summary = run.summary.unwrap();
    assert_eq!(summary.total_requests, 2);
    assert_eq!(summary.allocated + summary.partial + summary.denied, 2);

    let mut expected = BTreeMap::new();
    for result in &run.results {
        for (&pool_id, &qty) in &result.granted {
            *expected.entry(pool_id).or_insert(0u64) += qty;
        }
    }
    assert_eq!(summary.granted_per_pool, expected);
}
