//! Pool Ledger — the single source of truth for capacity.
//!
//! Tracks available/committed/reserved quantities for every pool in a
//! cycle. All operations on the ledger go through one mutex, so
//! `reserve`/`commit`/`release` are linearizable and the invariant
//! `committed + reserved <= capacity` holds under any interleaving of
//! concurrent callers.
//!
//! Reservations follow a token pattern: `reserve` returns a
//! [`ReservationToken`] that is consumed exactly once, by `commit` or
//! `release`. Consuming the token by value gives deterministic cleanup —
//! a cancelled run just releases whatever tokens it still owns.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use uuid::Uuid;

use allocentra_store::{Pool, PoolId, RunMode};

use crate::digest::StateDigest;
use crate::error::LedgerError;

/// Proof of a successful reservation on one pool. Not cloneable; consumed
/// by `PoolLedger::commit` or `PoolLedger::release`.
#[derive(Debug)]
pub struct ReservationToken {
    id: Uuid,
    pool_id: PoolId,
    qty: u64,
}

impl ReservationToken {
    pub fn pool_id(&self) -> PoolId {
        self.pool_id
    }

    pub fn qty(&self) -> u64 {
        self.qty
    }
}

#[derive(Debug, Clone, Copy)]
struct PoolAccount {
    capacity: u64,
    committed: u64,
    reserved: u64,
}

impl PoolAccount {
    fn headroom(&self) -> u64 {
        self.capacity - self.committed - self.reserved
    }
}

#[derive(Debug, Default)]
struct LedgerInner {
    pools: BTreeMap<PoolId, PoolAccount>,
    /// Open reservations by token id.
    reservations: HashMap<Uuid, (PoolId, u64)>,
}

/// Per-cycle capacity ledger with linearizable reserve/commit/release.
#[derive(Debug, Default)]
pub struct PoolLedger {
    inner: Mutex<LedgerInner>,
}

impl PoolLedger {
    /// Build a ledger from persisted pool records. `reserved` starts at
    /// zero; scenario holds never survive a run.
    pub fn from_pools(pools: &[Pool]) -> Self {
        let accounts = pools
            .iter()
            .map(|p| {
                (
                    p.id,
                    PoolAccount {
                        capacity: p.capacity,
                        committed: p.committed,
                        reserved: 0,
                    },
                )
            })
            .collect();
        Self {
            inner: Mutex::new(LedgerInner {
                pools: accounts,
                reservations: HashMap::new(),
            }),
        }
    }

    /// Reserve `qty` on a pool. Fails with `InsufficientCapacity` when
    /// `qty > capacity - committed - reserved`.
    pub fn reserve(&self, pool_id: PoolId, qty: u64) -> Result<ReservationToken, LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        let account = inner
            .pools
            .get_mut(&pool_id)
            .ok_or(LedgerError::UnknownPool(pool_id))?;
        let headroom = account.headroom();
        if qty > headroom {
            return Err(LedgerError::InsufficientCapacity {
                pool_id,
                requested: qty,
                available: headroom,
            });
        }
        account.reserved += qty;
        let token = ReservationToken {
            id: Uuid::new_v4(),
            pool_id,
            qty,
        };
        inner.reservations.insert(token.id, (pool_id, qty));
        Ok(token)
    }

    /// Move a reservation into committed capacity, consuming the token.
    /// Fails with `UnknownToken` if the token was already consumed by
    /// another ledger (tokens are not transferable between ledgers).
    pub fn commit(&self, token: ReservationToken) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        let (pool_id, qty) = inner
            .reservations
            .remove(&token.id)
            .ok_or(LedgerError::UnknownToken {
                pool_id: token.pool_id,
            })?;
        let account = inner
            .pools
            .get_mut(&pool_id)
            .ok_or(LedgerError::UnknownPool(pool_id))?;
        account.reserved -= qty;
        account.committed += qty;
        Ok(())
    }

    /// Return reserved capacity without committing. Idempotent: releasing
    /// a token unknown to this ledger is a no-op.
    pub fn release(&self, token: ReservationToken) {
        let mut inner = self.inner.lock().unwrap();
        if let Some((pool_id, qty)) = inner.reservations.remove(&token.id) {
            if let Some(account) = inner.pools.get_mut(&pool_id) {
                account.reserved -= qty;
            }
        }
    }

    /// Capacity snapshot for one run.
    ///
    /// Commit evaluation treats in-flight reservations as unavailable;
    /// scenario evaluation sees `capacity - committed` (an uncommitted
    /// reservation is not yet a real grant, so hypothetical planning
    /// ignores it).
    pub fn snapshot(&self, mode: RunMode) -> PoolSnapshot {
        let inner = self.inner.lock().unwrap();
        let pools = inner
            .pools
            .iter()
            .map(|(id, a)| {
                let available = match mode {
                    RunMode::Commit => a.capacity - a.committed - a.reserved,
                    RunMode::Scenario => a.capacity - a.committed,
                };
                (
                    *id,
                    PoolView {
                        capacity: a.capacity,
                        available,
                    },
                )
            })
            .collect();
        PoolSnapshot { pools }
    }

    /// Per-pool `(capacity, committed)` counters, for write-back and
    /// audit digests.
    pub fn committed_state(&self) -> BTreeMap<PoolId, (u64, u64)> {
        let inner = self.inner.lock().unwrap();
        inner
            .pools
            .iter()
            .map(|(id, a)| (*id, (a.capacity, a.committed)))
            .collect()
    }

    /// Digest of the committed state.
    pub fn state_digest(&self) -> StateDigest {
        StateDigest::of_pool_state(&self.committed_state())
    }

    /// Replace a pool's total capacity. Fails if the new capacity is below
    /// what is already committed or reserved.
    pub fn set_capacity(&self, pool_id: PoolId, capacity: u64) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        let account = inner
            .pools
            .get_mut(&pool_id)
            .ok_or(LedgerError::UnknownPool(pool_id))?;
        let floor = account.committed + account.reserved;
        if capacity < floor {
            return Err(LedgerError::InsufficientCapacity {
                pool_id,
                requested: floor,
                available: capacity,
            });
        }
        account.capacity = capacity;
        Ok(())
    }
}

/// Immutable per-pool capacity view handed to the allocation algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolView {
    pub capacity: u64,
    pub available: u64,
}

/// Immutable pool-capacity snapshot for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub pools: BTreeMap<PoolId, PoolView>,
}

/// A batch of reservations taken by one run, with all-or-nothing cleanup.
///
/// The set owns its tokens; dropping the future that was filling it
/// leaves the set intact, so the caller can always `release_all` after a
/// timeout or mid-run failure.
#[derive(Debug, Default)]
pub struct ReservationSet {
    tokens: Vec<ReservationToken>,
}

impl ReservationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Reserve every `(pool, qty)` grant in order. On the first failure
    /// the tokens taken so far are released and the error is returned —
    /// the ledger is left exactly as it was.
    pub fn reserve_all(
        &mut self,
        ledger: &PoolLedger,
        grants: &BTreeMap<PoolId, u64>,
    ) -> Result<(), LedgerError> {
        for (&pool_id, &qty) in grants {
            if qty == 0 {
                continue;
            }
            match ledger.reserve(pool_id, qty) {
                Ok(token) => self.tokens.push(token),
                Err(err) => {
                    self.release_all(ledger);
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Commit every held token.
    pub fn commit_all(&mut self, ledger: &PoolLedger) -> Result<(), LedgerError> {
        for token in self.tokens.drain(..) {
            ledger.commit(token)?;
        }
        Ok(())
    }

    /// Release every held token. Idempotent.
    pub fn release_all(&mut self, ledger: &PoolLedger) {
        for token in self.tokens.drain(..) {
            ledger.release(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use allocentra_store::{CycleId, PoolKind};

    fn pool(capacity: u64, committed: u64) -> Pool {
        Pool {
            id: PoolId::new(),
            cycle_id: CycleId::new(),
            kind: PoolKind::Budget,
            name: "Opex".to_string(),
            unit: "USD".to_string(),
            capacity,
            committed,
        }
    }

    #[test]
    fn reserve_within_headroom_succeeds() {
        let p = pool(100, 0);
        let ledger = PoolLedger::from_pools(&[p.clone()]);
        let token = ledger.reserve(p.id, 70).unwrap();
        assert_eq!(token.qty(), 70);
        assert_eq!(ledger.snapshot(RunMode::Commit).pools[&p.id].available, 30);
    }

    #[test]
    fn reserve_beyond_headroom_fails() {
        let p = pool(100, 40);
        let ledger = PoolLedger::from_pools(&[p.clone()]);
        let err = ledger.reserve(p.id, 61).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientCapacity {
                requested: 61,
                available: 60,
                ..
            }
        ));
    }

    #[test]
    fn commit_moves_reserved_to_committed() {
        let p = pool(100, 0);
        let ledger = PoolLedger::from_pools(&[p.clone()]);
        let token = ledger.reserve(p.id, 30).unwrap();
        ledger.commit(token).unwrap();
        assert_eq!(ledger.committed_state()[&p.id], (100, 30));
        // Nothing reserved anymore.
        assert_eq!(ledger.snapshot(RunMode::Commit).pools[&p.id].available, 70);
    }

    #[test]
    fn release_returns_capacity() {
        let p = pool(100, 0);
        let ledger = PoolLedger::from_pools(&[p.clone()]);
        let token = ledger.reserve(p.id, 30).unwrap();
        ledger.release(token);
        assert_eq!(ledger.snapshot(RunMode::Commit).pools[&p.id].available, 100);
        assert_eq!(ledger.committed_state()[&p.id], (100, 0));
    }

    #[test]
    fn foreign_token_commit_is_unknown() {
        let p = pool(100, 0);
        let ledger_a = PoolLedger::from_pools(&[p.clone()]);
        let ledger_b = PoolLedger::from_pools(&[p.clone()]);
        let token = ledger_a.reserve(p.id, 10).unwrap();
        let err = ledger_b.commit(token).unwrap_err();
        assert!(matches!(err, LedgerError::UnknownToken { .. }));
    }

    #[test]
    fn foreign_token_release_is_noop() {
        let p = pool(100, 0);
        let ledger_a = PoolLedger::from_pools(&[p.clone()]);
        let ledger_b = PoolLedger::from_pools(&[p.clone()]);
        let token = ledger_a.reserve(p.id, 10).unwrap();
        ledger_b.release(token);
        assert_eq!(
            ledger_a.snapshot(RunMode::Commit).pools[&p.id].available,
            90
        );
    }

    #[test]
    fn scenario_snapshot_ignores_reservations() {
        let p = pool(100, 20);
        let ledger = PoolLedger::from_pools(&[p.clone()]);
        let _token = ledger.reserve(p.id, 30).unwrap();
        assert_eq!(ledger.snapshot(RunMode::Commit).pools[&p.id].available, 50);
        assert_eq!(
            ledger.snapshot(RunMode::Scenario).pools[&p.id].available,
            80
        );
    }

    #[test]
    fn set_capacity_respects_floor() {
        let p = pool(100, 60);
        let ledger = PoolLedger::from_pools(&[p.clone()]);
        assert!(ledger.set_capacity(p.id, 50).is_err());
        ledger.set_capacity(p.id, 200).unwrap();
        assert_eq!(ledger.committed_state()[&p.id], (200, 60));
    }

    #[test]
    fn reservation_set_rolls_back_on_failure() {
        let a = pool(100, 0);
        let b = pool(10, 0);
        let ledger = PoolLedger::from_pools(&[a.clone(), b.clone()]);

        let grants = BTreeMap::from([(a.id, 50), (b.id, 20)]);
        let mut set = ReservationSet::new();
        let err = set.reserve_all(&ledger, &grants).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientCapacity { .. }));
        assert!(set.is_empty());

        // First reservation was rolled back.
        let snap = ledger.snapshot(RunMode::Commit);
        assert_eq!(snap.pools[&a.id].available, 100);
        assert_eq!(snap.pools[&b.id].available, 10);
    }

    #[test]
    fn reservation_set_commit_all() {
        let a = pool(100, 0);
        let b = pool(50, 0);
        let ledger = PoolLedger::from_pools(&[a.clone(), b.clone()]);

        let grants = BTreeMap::from([(a.id, 70), (b.id, 20)]);
        let mut set = ReservationSet::new();
        set.reserve_all(&ledger, &grants).unwrap();
        set.commit_all(&ledger).unwrap();

        assert_eq!(ledger.committed_state()[&a.id], (100, 70));
        assert_eq!(ledger.committed_state()[&b.id], (50, 20));
    }

    #[test]
    fn zero_quantity_grants_take_no_token() {
        let a = pool(100, 0);
        let ledger = PoolLedger::from_pools(&[a.clone()]);
        let grants = BTreeMap::from([(a.id, 0)]);
        let mut set = ReservationSet::new();
        set.reserve_all(&ledger, &grants).unwrap();
        assert!(set.is_empty());
    }
}
