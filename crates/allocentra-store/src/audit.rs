//! Append-only audit log records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AuditEntryId, CycleId, RunId};

/// What kind of mutation an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditAction {
    /// A commit run applied its results to the pool ledger.
    RunCommitted,
    /// A pool's total capacity was changed directly.
    PoolCapacityChanged,
    /// The cycle moved to a new lifecycle status.
    CycleStatusChanged,
}

/// One immutable audit entry. Never mutated or deleted once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: AuditEntryId,
    pub cycle_id: CycleId,
    pub run_id: Option<RunId>,
    pub actor: String,
    pub action: AuditAction,

    /// Digest of the affected pool state before the mutation.
    pub before_digest: String,
    /// Digest of the affected pool state after the mutation.
    pub after_digest: String,

    /// Action-specific detail payload.
    pub detail: serde_json::Value,

    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        cycle_id: CycleId,
        run_id: Option<RunId>,
        actor: String,
        action: AuditAction,
        before_digest: String,
        after_digest: String,
        detail: serde_json::Value,
    ) -> Self {
        Self {
            id: AuditEntryId::new(),
            cycle_id,
            run_id,
            actor,
            action,
            before_digest,
            after_digest,
            detail,
            timestamp: Utc::now(),
        }
    }
}

/// Resume point for a paged audit query: entries strictly after
/// `(timestamp, id)` in the (timestamp asc, id asc) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditCursor {
    pub timestamp: DateTime<Utc>,
    pub id: AuditEntryId,
}

/// Filter for audit retrieval. Results are ordered by timestamp ascending,
/// then entry id ascending; `after` + `limit` make the scan restartable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQuery {
    pub cycle_id: CycleId,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub after: Option<AuditCursor>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    /// Query every entry for a cycle.
    pub fn for_cycle(cycle_id: CycleId) -> Self {
        Self {
            cycle_id,
            from: None,
            to: None,
            after: None,
            limit: None,
        }
    }
}
