/// Per-entity advisory locks
///
/// Serializes concurrent mutation of the same logical entity (one signature
/// request, one epoch) while leaving unrelated entities free to proceed.
/// Holding the lock around a transaction keeps optimistic-commit conflicts
/// for a hot request from turning into retry storms.

use crate::crypto::Hash;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Identity of a lockable entity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockKey {
    /// Signature/proof state for one request
    Request(Hash),
    /// Validator set and network config for one epoch
    Epoch(u64),
}

/// Map from entity key to its advisory mutex
pub struct LockTable {
    entries: StdMutex<HashMap<LockKey, Arc<Mutex<()>>>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self {
            entries: StdMutex::new(HashMap::new()),
        }
    }

    /// Acquire the lock for `key`, waiting if another writer holds it.
    ///
    /// The guard owns its mutex, so it can be held across await points and
    /// outlives the table borrow.
    pub async fn acquire(&self, key: LockKey) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut entries = self.entries.lock().expect("lock table poisoned");
            entries.entry(key).or_default().clone()
        };
        mutex.lock_owned().await
    }

    /// Drop entries nobody holds; returns how many were removed.
    ///
    /// Called from pruning so the table stays proportional to the live
    /// working set rather than to history.
    pub fn compact(&self) -> usize {
        let mut entries = self.entries.lock().expect("lock table poisoned");
        let before = entries.len();
        entries.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("lock table poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}
