//! Allocation cycles and the pools they own.
//!
//! A cycle is a bounded allocation period (monthly, quarterly, a mission
//! window). It owns the budget and resource pools that requests compete
//! for. Committed runs are only accepted while the cycle is `Active`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{CycleId, PoolId};

/// Lifecycle status of an allocation cycle.
///
/// Transitions are forward-only: `Draft → Active → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CycleStatus {
    /// Being set up; pools and requests may still change shape.
    Draft,
    /// Open for requests and committed runs.
    Active,
    /// No further runs may commit against this cycle.
    Closed,
}

impl CycleStatus {
    /// Whether a `status → next` transition is legal.
    pub fn can_transition_to(self, next: CycleStatus) -> bool {
        matches!(
            (self, next),
            (CycleStatus::Draft, CycleStatus::Active) | (CycleStatus::Active, CycleStatus::Closed)
        )
    }
}

/// Whether a pool holds money or a countable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PoolKind {
    Budget,
    Resource,
}

/// A finite capacity of budget or resource within a cycle.
///
/// Quantities are integers in minor units: cents for budget pools, whole
/// units (vehicles, hours, seats) for resource pools. `committed` only
/// moves when a commit run succeeds; transient scenario holds never reach
/// the persisted record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pool {
    pub id: PoolId,
    pub cycle_id: CycleId,
    pub kind: PoolKind,

    /// Human-readable pool name ("Q3 Opex", "Vehicles").
    pub name: String,

    /// Unit label: an ISO currency code for budget pools, a count unit
    /// ("COUNT", "HOURS") for resource pools.
    pub unit: String,

    /// Total capacity in minor units.
    pub capacity: u64,

    /// Quantity already granted by committed runs. Invariant:
    /// `committed <= capacity`.
    pub committed: u64,
}

impl Pool {
    /// Capacity not yet granted by a committed run.
    pub fn remaining(&self) -> u64 {
        self.capacity.saturating_sub(self.committed)
    }
}

/// An allocation cycle owning budget and resource pools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cycle {
    pub id: CycleId,
    pub name: String,
    pub description: Option<String>,
    pub status: CycleStatus,

    /// Cycle time window, half-open: `[start_date, end_date)`.
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,

    /// Pools owned by this cycle.
    pub pools: Vec<Pool>,

    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

impl Cycle {
    /// Create a new cycle in `Draft` status with no pools.
    pub fn new(name: String, start_date: NaiveDate, end_date: NaiveDate, created_by: String) -> Self {
        Self {
            id: CycleId::new(),
            name,
            description: None,
            status: CycleStatus::Draft,
            start_date,
            end_date,
            pools: Vec::new(),
            created_at: Utc::now(),
            created_by,
        }
    }

    /// Look up a pool owned by this cycle.
    pub fn pool(&self, pool_id: PoolId) -> Option<&Pool> {
        self.pools.iter().find(|p| p.id == pool_id)
    }

    /// Whether `pool_id` belongs to this cycle.
    pub fn owns_pool(&self, pool_id: PoolId) -> bool {
        self.pool(pool_id).is_some()
    }
}
