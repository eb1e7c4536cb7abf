//! Allocation Algorithm — pure, deterministic, single-pass.
//!
//! `(pools, ordered requests, policy) → (decisions, residual pools,
//! traces)`. No I/O, no shared mutable state; safe to invoke concurrently
//! for different cycles.
//!
//! Priority order is a hard guarantee: higher-priority requests are
//! evaluated, and may exhaust capacity, before any lower-priority request
//! is considered. There is no backtracking — an earlier grant is never
//! revoked to benefit a later request.

use std::collections::BTreeMap;

use allocentra_store::{
    AllocationPolicy, DecisionKind, ExplanationTrace, LimitingFactor, PoolId, Request, RequestId,
};

use crate::ledger::PoolSnapshot;
use crate::trace::TraceBuilder;

/// Decision for one request, with its grants and explanation trace.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub request_id: RequestId,
    pub kind: DecisionKind,
    /// Quantity granted per pool. Empty for denials.
    pub granted: BTreeMap<PoolId, u64>,
    pub reason: String,
    pub trace: ExplanationTrace,
}

/// Output of one allocation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationOutcome {
    /// Decisions in evaluation order (same order as the input requests).
    pub decisions: Vec<Decision>,
    /// Pool state after all grants were applied to the snapshot.
    pub residual: PoolSnapshot,
}

/// What bounded the grant on one pool during evaluation.
struct PoolEvaluation {
    pool_id: PoolId,
    available_before: u64,
    requested: u64,
    grantable: u64,
    limiting: LimitingFactor,
}

/// Run the single-pass allocation over an ordered request list.
///
/// Inputs must already be validated (`queue::validate_requests`) and
/// ordered (`queue::order_requests`); unknown pools are treated as having
/// zero capacity rather than failing the pass.
pub fn allocate(
    snapshot: &PoolSnapshot,
    ordered: &[Request],
    policy: &AllocationPolicy,
) -> AllocationOutcome {
    let mut residual = snapshot.clone();
    let mut decisions = Vec::with_capacity(ordered.len());
    let mut outcomes: BTreeMap<RequestId, DecisionKind> = BTreeMap::new();

    for request in ordered {
        let decision = evaluate_request(request, &mut residual, policy, &outcomes);
        outcomes.insert(request.id, decision.kind);
        decisions.push(decision);
    }

    AllocationOutcome { decisions, residual }
}

fn evaluate_request(
    request: &Request,
    residual: &mut PoolSnapshot,
    policy: &AllocationPolicy,
    outcomes: &BTreeMap<RequestId, DecisionKind>,
) -> Decision {
    let mut trace = TraceBuilder::new();

    // Dependencies must have ended fully allocated earlier in this pass.
    if let Some(&unmet) = request.dependencies.iter().find(|dep| {
        outcomes
            .get(dep)
            .map(|kind| *kind != DecisionKind::Allocated)
            .unwrap_or(true)
    }) {
        for (&pool_id, &requested) in &request.amounts {
            let available = residual.pools.get(&pool_id).map(|p| p.available).unwrap_or(0);
            trace.record(pool_id, available, requested, 0, LimitingFactor::DependencyUnmet);
        }
        return Decision {
            request_id: request.id,
            kind: DecisionKind::Denied,
            granted: BTreeMap::new(),
            reason: format!("denied: dependency {unmet} not fully allocated"),
            trace: trace.finish(),
        };
    }

    // Evaluate every referenced pool before mutating any of them, so a
    // no-partial denial leaves the snapshot untouched.
    let evaluations: Vec<PoolEvaluation> = request
        .amounts
        .iter()
        .map(|(&pool_id, &requested)| evaluate_pool(residual, pool_id, requested, policy))
        .collect();

    let fully_grantable = evaluations.iter().all(|e| e.grantable == e.requested);
    let total_grantable: u64 = evaluations.iter().map(|e| e.grantable).sum();

    if fully_grantable {
        let mut granted = BTreeMap::new();
        for eval in &evaluations {
            trace.record(
                eval.pool_id,
                eval.available_before,
                eval.requested,
                eval.grantable,
                LimitingFactor::None,
            );
            apply_grant(residual, eval.pool_id, eval.grantable);
            granted.insert(eval.pool_id, eval.grantable);
        }
        return Decision {
            request_id: request.id,
            kind: DecisionKind::Allocated,
            granted,
            reason: "fully allocated".to_string(),
            trace: trace.finish(),
        };
    }

    if !policy.partial_allocation_allowed || total_grantable == 0 {
        // Denied: record what each pool could have granted, touch nothing.
        for eval in &evaluations {
            trace.record(
                eval.pool_id,
                eval.available_before,
                eval.requested,
                0,
                eval.limiting,
            );
        }
        let reason = if total_grantable == 0 {
            "denied: referenced pools exhausted".to_string()
        } else {
            "denied: partial allocation not permitted by policy".to_string()
        };
        return Decision {
            request_id: request.id,
            kind: DecisionKind::Denied,
            granted: BTreeMap::new(),
            reason,
            trace: trace.finish(),
        };
    }

    // Partial: pools are independent — a full grant on one pool and a
    // reduced grant on another is valid within a single decision.
    let mut granted = BTreeMap::new();
    for eval in &evaluations {
        trace.record(
            eval.pool_id,
            eval.available_before,
            eval.requested,
            eval.grantable,
            eval.limiting,
        );
        apply_grant(residual, eval.pool_id, eval.grantable);
        granted.insert(eval.pool_id, eval.grantable);
    }
    Decision {
        request_id: request.id,
        kind: DecisionKind::Partial,
        granted,
        reason: "partially allocated: capacity constraint on one or more pools".to_string(),
        trace: trace.finish(),
    }
}

fn evaluate_pool(
    residual: &PoolSnapshot,
    pool_id: PoolId,
    requested: u64,
    policy: &AllocationPolicy,
) -> PoolEvaluation {
    let view = residual.pools.get(&pool_id).copied().unwrap_or(
        // Unknown pool: zero capacity. Validation rejects cross-cycle
        // references before the pass, so this only covers deleted pools.
        crate::ledger::PoolView {
            capacity: 0,
            available: 0,
        },
    );

    let cap_bound = match policy.per_pool_cap {
        Some(fraction) => (view.capacity as f64 * fraction).floor() as u64,
        None => u64::MAX,
    };
    let effective = view.available.min(cap_bound);
    let grantable = requested.min(effective);

    let limiting = if grantable == requested {
        LimitingFactor::None
    } else if cap_bound < view.available {
        LimitingFactor::PerPoolCap
    } else {
        LimitingFactor::PoolCapacity
    };

    PoolEvaluation {
        pool_id,
        available_before: view.available,
        requested,
        grantable,
        limiting,
    }
}

fn apply_grant(residual: &mut PoolSnapshot, pool_id: PoolId, qty: u64) {
    if let Some(view) = residual.pools.get_mut(&pool_id) {
        view.available -= qty;
    }
}
