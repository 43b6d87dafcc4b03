/// Validator-set lookup with bounded re-derivation
///
/// Sets are produced by an external derivation step and persisted once per
/// epoch. A lookup miss triggers exactly one derivation attempt through the
/// injected `SetDeriver`; if the set is still unavailable the caller gets a
/// hard error. No error-driven retry loops.

use crate::storage::{LockKey, LockTable, StorageError, Store};
use crate::types::{SetStatus, TypesError, ValidatorSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Validator set for epoch {0} is not derivable: {1}")]
    NotDerivable(u64, String),

    #[error("Derived set is invalid: {0}")]
    InvalidDerivedSet(#[from] TypesError),

    #[error("Deriver produced a set for epoch {got}, expected {expected}")]
    EpochMismatch { expected: u64, got: u64 },
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// External derivation step producing an epoch's validator set
pub trait SetDeriver: Send + Sync {
    fn derive(&self, epoch: u64) -> Result<ValidatorSet>;
}

/// Deriver for nodes that never derive locally (pure followers)
pub struct NullDeriver;

impl SetDeriver for NullDeriver {
    fn derive(&self, epoch: u64) -> Result<ValidatorSet> {
        Err(ProviderError::NotDerivable(
            epoch,
            "no deriver configured".into(),
        ))
    }
}

/// Ensure-then-act access to per-epoch validator sets
pub struct ValidatorSetProvider {
    store: Arc<Store>,
    deriver: Arc<dyn SetDeriver>,
}

impl ValidatorSetProvider {
    pub fn new(store: Arc<Store>, deriver: Arc<dyn SetDeriver>) -> Self {
        Self { store, deriver }
    }

    /// Plain lookup; a miss is `StorageError::NotFound`
    pub fn get(&self, epoch: u64) -> Result<ValidatorSet> {
        self.store
            .view(|tx| tx.validator_set(epoch))?
            .ok_or(ProviderError::Storage(StorageError::NotFound(
                "validator set",
            )))
    }

    /// Lookup with one bounded re-derivation attempt on a miss.
    ///
    /// A derived set is validated (epoch match, canonical ordering),
    /// persisted with `Derived` status and returned. If another writer
    /// persisted the epoch concurrently, the stored set wins.
    pub async fn get_or_derive(&self, locks: &LockTable, epoch: u64) -> Result<ValidatorSet> {
        if let Some(set) = self.store.view(|tx| tx.validator_set(epoch))? {
            return Ok(set);
        }

        debug!(epoch, "validator set missing, attempting derivation");
        let mut derived = self.deriver.derive(epoch)?;
        if derived.epoch != epoch {
            return Err(ProviderError::EpochMismatch {
                expected: epoch,
                got: derived.epoch,
            });
        }
        derived.ensure_sorted()?;
        if derived.status == SetStatus::Pending {
            derived.status = SetStatus::Derived;
        }

        let _guard = locks.acquire(LockKey::Epoch(epoch)).await;
        let stored = self.store.update(|tx| {
            if let Some(existing) = tx.validator_set(epoch)? {
                return Ok::<ValidatorSet, ProviderError>(existing);
            }
            tx.put_validator_set(&derived)?;
            Ok(derived.clone())
        })?;
        info!(epoch, validators = stored.validators.len(), "validator set derived");
        Ok(stored)
    }
}
