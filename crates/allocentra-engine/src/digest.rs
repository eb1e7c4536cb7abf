//! Content digests over pool state.
//!
//! Audit entries carry before/after digests of the affected pools so a
//! reader can verify exactly which state a committed run transformed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use allocentra_store::PoolId;

/// SHA-256 digest (lowercase hex) of a canonical state serialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateDigest(String);

impl StateDigest {
    /// Compute the digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        StateDigest(hex::encode(hasher.finalize()))
    }

    /// Digest of per-pool `(capacity, committed)` counters. The `BTreeMap`
    /// keeps serialization canonical, so equal states yield equal digests.
    pub fn of_pool_state(state: &BTreeMap<PoolId, (u64, u64)>) -> Self {
        // PoolId serializes as a UUID string, so keys are valid JSON keys.
        let bytes = serde_json::to_vec(state).unwrap_or_default();
        Self::from_bytes(&bytes)
    }

    /// Full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for StateDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
