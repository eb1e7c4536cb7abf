//! Allocation requests.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CycleId, PoolId, RequestId};

/// Status of an allocation request. Mutated only by a committed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestStatus {
    Pending,
    Allocated,
    Partial,
    Denied,
}

/// Expected impact if the request is funded. The numeric weight feeds the
/// diagnostic score breakdown (1–5 scale).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Impact {
    Low,
    Medium,
    High,
    Critical,
}

impl Impact {
    pub fn weight(self) -> f64 {
        match self {
            Impact::Low => 1.0,
            Impact::Medium => 3.0,
            Impact::High => 4.0,
            Impact::Critical => 5.0,
        }
    }
}

/// Risk of not funding the request (1–5 scale).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Risk {
    Low,
    Operational,
    Safety,
    Legal,
}

impl Risk {
    pub fn weight(self) -> f64 {
        match self {
            Risk::Low => 1.0,
            Risk::Operational => 3.0,
            Risk::Safety => 5.0,
            Risk::Legal => 5.0,
        }
    }
}

/// A request competing for one or more pools within a cycle.
///
/// Ordering contract: requests are evaluated by (`priority` ascending,
/// `submitted_at` ascending, `id` ascending) — lower priority value means
/// higher priority. The `BTreeMap` of requested amounts keeps per-pool
/// iteration deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub id: RequestId,
    pub cycle_id: CycleId,
    pub requester: String,
    pub title: String,
    pub justification: Option<String>,

    /// Requested quantity per pool, in the pool's minor units.
    pub amounts: BTreeMap<PoolId, u64>,

    /// Priority class; lower value = higher priority.
    pub priority: u32,

    /// Requests that must be fully allocated (in the same run) before this
    /// one is eligible.
    pub dependencies: Vec<RequestId>,

    /// Deadline after which the work loses value; drives the urgency
    /// score component.
    pub urgency_deadline: Option<NaiveDate>,
    pub impact: Impact,
    pub risk: Risk,

    /// Strategic alignment, 1–5.
    pub strategic: u8,

    pub status: RequestStatus,
    pub submitted_at: DateTime<Utc>,
}

impl Request {
    /// Create a pending request for the given cycle.
    pub fn new(cycle_id: CycleId, requester: String, title: String) -> Self {
        Self {
            id: RequestId::new(),
            cycle_id,
            requester,
            title,
            justification: None,
            amounts: BTreeMap::new(),
            priority: 3,
            dependencies: Vec::new(),
            urgency_deadline: None,
            impact: Impact::Medium,
            risk: Risk::Low,
            strategic: 3,
            status: RequestStatus::Pending,
            submitted_at: Utc::now(),
        }
    }

    /// Add a requested quantity for a pool (builder-style).
    pub fn with_amount(mut self, pool_id: PoolId, qty: u64) -> Self {
        self.amounts.insert(pool_id, qty);
        self
    }

    /// Set the priority class (builder-style).
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Total requested quantity across all pools.
    pub fn total_requested(&self) -> u64 {
        self.amounts.values().sum()
    }
}
