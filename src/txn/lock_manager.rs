//! Row-granularity shared/exclusive locking under strict two-phase
//! locking, per §4.D. No deadlock detection: acquisition is no-wait
//! and simply fails (returns `Error::Conflicts`) if it would violate
//! 2PL, leaving the caller to abort and retry.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::types::{RowPosition, TxnId};

struct Inner {
    shared: HashMap<RowPosition, HashSet<TxnId>>,
    exclusive: HashMap<RowPosition, TxnId>,
}

/// Single internal mutex guarding both lock sets, per §4.D -- this is
/// a leaf in the locking hierarchy and is never held across any other
/// acquisition.
pub struct LockManager {
    inner: Mutex<Inner>,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                shared: HashMap::new(),
                exclusive: HashMap::new(),
            }),
        }
    }

    /// Succeeds iff no exclusive holder currently exists (other than
    /// the requester itself, which may already hold it).
    pub fn get_shared(&self, txn: TxnId, pos: RowPosition) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(holder) = inner.exclusive.get(&pos) {
            if *holder != txn {
                return Err(Error::Conflicts);
            }
        }
        inner.shared.entry(pos).or_default().insert(txn);
        Ok(())
    }

    pub fn release_shared(&self, txn: TxnId, pos: RowPosition) {
        let mut inner = self.inner.lock();
        if let Some(set) = inner.shared.get_mut(&pos) {
            set.remove(&txn);
            if set.is_empty() {
                inner.shared.remove(&pos);
            }
        }
    }

    /// Succeeds iff no shared holder other than the requester and no
    /// exclusive holder other than the requester currently exists.
    pub fn get_exclusive(&self, txn: TxnId, pos: RowPosition) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(holder) = inner.exclusive.get(&pos) {
            if *holder != txn {
                return Err(Error::Conflicts);
            }
            return Ok(());
        }
        let other_shared_holders = inner
            .shared
            .get(&pos)
            .map(|set| set.iter().any(|h| *h != txn))
            .unwrap_or(false);
        if other_shared_holders {
            return Err(Error::Conflicts);
        }
        inner.exclusive.insert(pos, txn);
        Ok(())
    }

    pub fn release_exclusive(&self, txn: TxnId, pos: RowPosition) {
        let mut inner = self.inner.lock();
        if inner.exclusive.get(&pos) == Some(&txn) {
            inner.exclusive.remove(&pos);
        }
    }

    /// Atomically drops the requester's shared lock and acquires the
    /// exclusive lock iff no other shared holders exist. Implemented
    /// under a single critical section (the whole method holds
    /// `inner`'s lock), resolving open question (b): the source's
    /// `TryUpgradeLock` is not strictly atomic w.r.t. concurrent
    /// shared acquirers; this port is.
    pub fn try_upgrade(&self, txn: TxnId, pos: RowPosition) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(holder) = inner.exclusive.get(&pos) {
            return if *holder == txn { Ok(()) } else { Err(Error::Conflicts) };
        }
        let others = inner
            .shared
            .get(&pos)
            .map(|set| set.iter().any(|h| *h != txn))
            .unwrap_or(false);
        if others {
            return Err(Error::Conflicts);
        }
        if let Some(set) = inner.shared.get_mut(&pos) {
            set.remove(&txn);
            if set.is_empty() {
                inner.shared.remove(&pos);
            }
        }
        inner.exclusive.insert(pos, txn);
        Ok(())
    }

    /// Releases every lock held by `txn`, regardless of position.
    /// Called by the transaction manager on precommit/abort.
    pub fn release_all(&self, txn: TxnId) {
        let mut inner = self.inner.lock();
        inner.shared.retain(|_, holders| {
            holders.remove(&txn);
            !holders.is_empty()
        });
        inner.exclusive.retain(|_, holder| *holder != txn);
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_locks_from_different_transactions_coexist() {
        let lm = LockManager::new();
        let pos = (1, 0);
        assert!(lm.get_shared(1, pos).is_ok());
        assert!(lm.get_shared(2, pos).is_ok());
    }

    #[test]
    fn exclusive_conflicts_with_existing_shared() {
        let lm = LockManager::new();
        let pos = (1, 0);
        lm.get_shared(1, pos).unwrap();
        assert!(lm.get_exclusive(2, pos).is_err());
    }

    #[test]
    fn upgrade_succeeds_when_sole_shared_holder() {
        let lm = LockManager::new();
        let pos = (1, 0);
        lm.get_shared(1, pos).unwrap();
        assert!(lm.try_upgrade(1, pos).is_ok());
        assert!(lm.get_shared(2, pos).is_err());
    }

    #[test]
    fn upgrade_fails_with_other_shared_holders() {
        let lm = LockManager::new();
        let pos = (1, 0);
        lm.get_shared(1, pos).unwrap();
        lm.get_shared(2, pos).unwrap();
        assert!(lm.try_upgrade(1, pos).is_err());
    }

    #[test]
    fn release_all_drops_every_lock_for_a_transaction() {
        let lm = LockManager::new();
        lm.get_shared(1, (1, 0)).unwrap();
        lm.get_exclusive(1, (2, 0)).unwrap();
        lm.release_all(1);
        assert!(lm.get_exclusive(2, (2, 0)).is_ok());
    }
}
