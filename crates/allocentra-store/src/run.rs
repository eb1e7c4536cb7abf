//! Allocation runs, per-request results, and explanation traces.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CycleId, PoolId, RequestId, RunId};

/// Whether a run mutates shared state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunMode {
    /// Results are applied to the ledger, request statuses, and audit log.
    Commit,
    /// Hypothetical run; never mutates shared state.
    Scenario,
}

/// Run lifecycle: `Pending → Running → {Succeeded, Failed}`. Terminal
/// states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }
}

/// Policy options recognized by the allocation algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationPolicy {
    /// When false, a request that cannot be fully satisfied on every
    /// requested pool is denied instead of partially granted.
    pub partial_allocation_allowed: bool,

    /// No single request may consume more than this fraction of a pool's
    /// total capacity. Must be in `(0, 1]` when present.
    pub per_pool_cap: Option<f64>,
}

impl Default for AllocationPolicy {
    fn default() -> Self {
        Self {
            partial_allocation_allowed: true,
            per_pool_cap: None,
        }
    }
}

/// What bounded a grant on a single pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LimitingFactor {
    /// The full requested quantity was grantable.
    None,
    /// Remaining pool capacity was the binding constraint.
    PoolCapacity,
    /// The per-request pool cap fraction was the binding constraint.
    PerPoolCap,
    /// A declared dependency was not fully allocated earlier in the pass.
    DependencyUnmet,
}

/// One reason step in an explanation trace: a single pool evaluated for a
/// single request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceStep {
    pub pool_id: PoolId,
    pub available_before: u64,
    pub requested: u64,
    pub granted: u64,
    pub limiting_factor: LimitingFactor,
}

/// Ordered sequence of reason steps behind one decision. Owned exclusively
/// by its result; exposed verbatim, never summarized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplanationTrace {
    pub steps: Vec<TraceStep>,
}

/// Decision for a single request within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DecisionKind {
    Allocated,
    Partial,
    Denied,
}

/// Per-(run, request) outcome. Immutable once the owning run finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationResult {
    pub request_id: RequestId,
    pub decision: DecisionKind,

    /// Quantity granted per pool, in minor units. Empty for denials.
    pub granted: BTreeMap<PoolId, u64>,

    /// Human-readable decision reason.
    pub reason: String,

    /// Evaluation order within the run (1 = evaluated first).
    pub rank: u32,

    /// Diagnostic composite score (does not affect ordering).
    pub score: f64,

    /// Per-component score breakdown, serialized by the scoring engine.
    pub score_breakdown: serde_json::Value,

    pub trace: ExplanationTrace,
}

/// Aggregate statistics for a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total_requests: u64,
    pub allocated: u64,
    pub partial: u64,
    pub denied: u64,

    /// Total quantity granted per pool.
    pub granted_per_pool: BTreeMap<PoolId, u64>,

    pub duration_ms: u64,
}

/// One invocation of the allocation engine. Immutable once finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub id: RunId,
    pub cycle_id: CycleId,
    pub mode: RunMode,
    pub status: RunStatus,
    pub policy: AllocationPolicy,
    pub actor: String,

    /// Digest of the pool state the run evaluated against.
    pub snapshot_digest: String,

    /// Whether the results were applied to the ledger. Always false for
    /// scenario and failed runs.
    pub committed: bool,

    pub results: Vec<AllocationResult>,
    pub summary: Option<RunSummary>,
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    /// Create a pending run for a cycle.
    pub fn new(
        cycle_id: CycleId,
        mode: RunMode,
        policy: AllocationPolicy,
        actor: String,
        snapshot_digest: String,
    ) -> Self {
        Self {
            id: RunId::new(),
            cycle_id,
            mode,
            status: RunStatus::Pending,
            policy,
            actor,
            snapshot_digest,
            committed: false,
            results: Vec::new(),
            summary: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}
