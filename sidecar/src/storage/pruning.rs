/// Pruning logic for quorum state
///
/// Signature-side data (raw signatures, trackers) and proof-side data
/// (aggregation proofs) age out on independent retention schedules: raw
/// signatures are bulky and disposable once a proof exists, while proofs
/// stay queryable much longer. The per-epoch request index entry is deleted
/// only once both sides of a request are gone, so a partially pruned request
/// remains discoverable by later passes.

use crate::storage::{LockKey, LockTable, Result, Store};
use tracing::{debug, info};

/// Retention policy determines how many epochs of data to keep
#[derive(Clone, Debug)]
pub enum RetentionPolicy {
    /// Never prune
    KeepAll,

    /// Keep the last N epochs
    KeepRecent(u64),
}

impl RetentionPolicy {
    /// Whether data for `epoch` should be pruned at `latest_epoch`.
    /// Keep the last N epochs means: at epoch L, keep (L-N+1) through L.
    pub fn should_prune(&self, epoch: u64, latest_epoch: u64) -> bool {
        match self {
            RetentionPolicy::KeepAll => false,
            RetentionPolicy::KeepRecent(n) => {
                if latest_epoch < *n {
                    false
                } else {
                    epoch <= latest_epoch - n
                }
            }
        }
    }

    /// Exclusive upper bound of prunable epochs at `latest_epoch`
    fn prune_before(&self, latest_epoch: u64) -> u64 {
        match self {
            RetentionPolicy::KeepAll => 0,
            RetentionPolicy::KeepRecent(n) => {
                if latest_epoch < *n {
                    0
                } else {
                    latest_epoch - n + 1
                }
            }
        }
    }
}

/// Pruning configuration
#[derive(Clone, Debug)]
pub struct PruningConfig {
    /// Retention for raw signatures and quorum trackers
    pub signatures: RetentionPolicy,

    /// Retention for aggregation proofs
    pub proofs: RetentionPolicy,
}

impl Default for PruningConfig {
    fn default() -> Self {
        Self {
            signatures: RetentionPolicy::KeepRecent(8),
            proofs: RetentionPolicy::KeepRecent(64),
        }
    }
}

/// Pruning statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneStats {
    pub signatures_pruned: u64,
    pub trackers_pruned: u64,
    pub proofs_pruned: u64,
    pub requests_pruned: u64,
    pub sets_pruned: u64,
    pub configs_pruned: u64,
    pub locks_compacted: u64,
}

/// Pruner manages storage retention based on configuration
pub struct Pruner {
    config: PruningConfig,
}

impl Pruner {
    pub fn new(config: PruningConfig) -> Self {
        Self { config }
    }

    /// Prune aged-out records, serializing with live writers through the
    /// per-request locks. Returns counts of what was removed.
    pub async fn prune(
        &self,
        store: &Store,
        locks: &LockTable,
        latest_epoch: u64,
    ) -> Result<PruneStats> {
        let mut stats = PruneStats::default();

        let signature_bound = self.config.signatures.prune_before(latest_epoch);
        let proof_bound = self.config.proofs.prune_before(latest_epoch);
        let scan_bound = signature_bound.max(proof_bound);
        if scan_bound == 0 {
            return Ok(stats);
        }

        let entries = store.view(|tx| tx.request_epochs_below(scan_bound))?;
        for (epoch, request, _key_tag) in entries {
            let signature_due = self.config.signatures.should_prune(epoch, latest_epoch);
            let proof_due = self.config.proofs.should_prune(epoch, latest_epoch);

            let _guard = locks.acquire(LockKey::Request(request)).await;
            let (signatures, trackers, proofs, requests) = store.update(|tx| {
                let mut signatures = 0u64;
                let mut trackers = 0u64;
                let mut proofs = 0u64;
                let mut requests = 0u64;
                if signature_due {
                    signatures = tx.delete_signatures(&request)?;
                    if tx.signature_map(&request)?.is_some() {
                        tx.delete_signature_map(&request)?;
                        trackers = 1;
                    }
                    tx.remove_pending_signature(epoch, &request)?;
                }
                if proof_due {
                    if tx.aggregation_proof(&request)?.is_some() {
                        tx.delete_aggregation_proof(&request)?;
                        proofs = 1;
                    }
                    tx.remove_pending_proof(epoch, &request)?;
                }
                // The index entry goes only once both sides are gone, so a
                // request pruned on one schedule stays discoverable for the
                // other.
                if signature_due && proof_due {
                    if tx.signature_request(&request)?.is_some() {
                        tx.delete_signature_request(&request)?;
                        requests = 1;
                    }
                    tx.remove_request_epoch(epoch, &request)?;
                }
                Ok::<_, crate::storage::StorageError>((signatures, trackers, proofs, requests))
            })?;
            stats.signatures_pruned += signatures;
            stats.trackers_pruned += trackers;
            stats.proofs_pruned += proofs;
            stats.requests_pruned += requests;
            debug!(epoch, request = %request, signature_due, proof_due, "pruned request");
        }

        // Per-epoch records fall with the slower of the two schedules
        let epoch_bound = signature_bound.min(proof_bound);
        let floor = store.view(|tx| tx.pruned_floor())?;
        if epoch_bound > floor {
            for epoch in floor..epoch_bound {
                let _guard = locks.acquire(LockKey::Epoch(epoch)).await;
                let (sets, configs) = store.update(|tx| {
                    let mut sets = 0u64;
                    let mut configs = 0u64;
                    if tx.validator_set(epoch)?.is_some() {
                        tx.delete_validator_set(epoch)?;
                        sets = 1;
                    }
                    if tx.network_config(epoch)?.is_some() {
                        tx.delete_network_config(epoch)?;
                        configs = 1;
                    }
                    Ok::<_, crate::storage::StorageError>((sets, configs))
                })?;
                stats.sets_pruned += sets;
                stats.configs_pruned += configs;
            }
            store.update(|tx| tx.set_pruned_floor(epoch_bound))?;
        }

        stats.locks_compacted = locks.compact() as u64;

        info!(
            latest_epoch,
            signatures = stats.signatures_pruned,
            trackers = stats.trackers_pruned,
            proofs = stats.proofs_pruned,
            requests = stats.requests_pruned,
            sets = stats.sets_pruned,
            "pruning pass complete"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{hash_data, Hash};
    use crate::quorum::QuorumTracker;
    use crate::types::{
        AggregationProof, KeyTag, SetStatus, SignatureExtended, SignatureRequest, ValidatorSet,
        VerificationType,
    };

    fn seed_request(store: &Store, epoch: u64, name: &[u8]) -> Hash {
        let request = SignatureRequest::new(KeyTag::Bls, epoch, name.to_vec());
        let id = request.request_id();
        let mut tracker = QuorumTracker::new(id, epoch, 2);
        tracker.set_validator_present(0, 100).unwrap();

        store
            .update(|tx| {
                tx.put_signature_request(&id, &request)?;
                tx.record_request_epoch(epoch, &id, KeyTag::Bls)?;
                tx.put_signature_map(&tracker)?;
                tx.put_signature(
                    &id,
                    0,
                    &SignatureExtended {
                        message_hash: request.message_hash(),
                        signature: vec![1; 96],
                        public_key: vec![2; 48],
                    },
                )?;
                tx.add_pending_signature(epoch, &id)?;
                tx.put_aggregation_proof(
                    &id,
                    &AggregationProof {
                        verification_type: VerificationType::Bls,
                        message_hash: request.message_hash(),
                        proof: vec![3; 16],
                    },
                )?;
                tx.put_validator_set(&ValidatorSet {
                    epoch,
                    validators: vec![],
                    quorum_threshold: 100,
                    required_key_tag: KeyTag::Bls,
                    previous_header_hash: Hash::zero(),
                    status: SetStatus::Committed,
                })
            })
            .unwrap();
        id
    }

    #[tokio::test]
    async fn test_keep_all_never_prunes() {
        let store = Store::open_temp().unwrap();
        let locks = LockTable::new();
        seed_request(&store, 1, b"old");

        let pruner = Pruner::new(PruningConfig {
            signatures: RetentionPolicy::KeepAll,
            proofs: RetentionPolicy::KeepAll,
        });
        let stats = pruner.prune(&store, &locks, 100).await.unwrap();

        assert_eq!(stats.signatures_pruned, 0);
        assert_eq!(stats.proofs_pruned, 0);
    }

    #[tokio::test]
    async fn test_independent_retention_schedules() {
        let store = Store::open_temp().unwrap();
        let locks = LockTable::new();

        // Latest epoch 10; signatures keep 5 (prune <= 5), proofs keep 8
        // (prune <= 2)
        let old = seed_request(&store, 1, b"both-due");
        let mid = seed_request(&store, 5, b"signature-due-only");
        let fresh = seed_request(&store, 9, b"fresh");
        store
            .update(|tx| {
                tx.put_validator_set(&ValidatorSet {
                    epoch: 10,
                    validators: vec![],
                    quorum_threshold: 100,
                    required_key_tag: KeyTag::Bls,
                    previous_header_hash: Hash::zero(),
                    status: SetStatus::Committed,
                })
            })
            .unwrap();

        let pruner = Pruner::new(PruningConfig {
            signatures: RetentionPolicy::KeepRecent(5),
            proofs: RetentionPolicy::KeepRecent(8),
        });
        let stats = pruner.prune(&store, &locks, 10).await.unwrap();

        assert_eq!(stats.signatures_pruned, 2); // epochs 1 and 5
        assert_eq!(stats.trackers_pruned, 2);
        assert_eq!(stats.proofs_pruned, 1); // epoch 1 only
        assert_eq!(stats.requests_pruned, 1);

        store
            .view(|tx| {
                // Fully pruned: nothing left, index entry gone
                assert!(tx.signature_map(&old)?.is_none());
                assert!(tx.aggregation_proof(&old)?.is_none());
                assert!(tx.signature_request(&old)?.is_none());

                // Signature side gone, proof side retained, index entry kept
                assert!(tx.signature_map(&mid)?.is_none());
                assert!(tx.signature(&mid, 0)?.is_none());
                assert!(tx.aggregation_proof(&mid)?.is_some());
                assert!(tx.signature_request(&mid)?.is_some());
                let indexed = tx.request_epochs_below(u64::MAX)?;
                assert!(indexed.iter().any(|(_, id, _)| id == &mid));
                assert!(!indexed.iter().any(|(_, id, _)| id == &old));

                // Untouched
                assert!(tx.signature_map(&fresh)?.is_some());
                assert!(tx.aggregation_proof(&fresh)?.is_some());

                // Epoch records fall with the slower schedule: sets for
                // epochs 1..=2 are gone, epoch 5 survives
                assert!(tx.validator_set(1)?.is_none());
                assert!(tx.validator_set(5)?.is_some());
                Ok::<(), crate::storage::StorageError>(())
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_second_pass_finishes_the_job() {
        let store = Store::open_temp().unwrap();
        let locks = LockTable::new();

        let pruner = Pruner::new(PruningConfig {
            signatures: RetentionPolicy::KeepRecent(5),
            proofs: RetentionPolicy::KeepRecent(8),
        });

        // At epoch 10 only the signature side of epoch 5 is due
        let mid = seed_request(&store, 5, b"later");
        pruner.prune(&store, &locks, 10).await.unwrap();
        assert!(store.view(|tx| tx.aggregation_proof(&mid)).unwrap().is_some());

        // Advance far enough that the proof schedule catches up
        store
            .update(|tx| {
                tx.put_validator_set(&ValidatorSet {
                    epoch: 20,
                    validators: vec![],
                    quorum_threshold: 100,
                    required_key_tag: KeyTag::Bls,
                    previous_header_hash: Hash::zero(),
                    status: SetStatus::Committed,
                })
            })
            .unwrap();
        let stats = pruner.prune(&store, &locks, 20).await.unwrap();
        assert_eq!(stats.proofs_pruned, 1);

        store
            .view(|tx| {
                assert!(tx.aggregation_proof(&mid)?.is_none());
                assert!(tx.signature_request(&mid)?.is_none());
                assert!(tx.request_epochs_below(u64::MAX)?.is_empty());
                Ok::<(), crate::storage::StorageError>(())
            })
            .unwrap();
    }

    #[test]
    fn test_retention_boundaries() {
        let policy = RetentionPolicy::KeepRecent(5);

        // At epoch 10, keep 6..=10
        assert!(policy.should_prune(5, 10));
        assert!(!policy.should_prune(6, 10));

        // Early life: nothing prunable yet
        assert!(!policy.should_prune(0, 4));

        assert_eq!(policy.prune_before(10), 6);
        assert_eq!(policy.prune_before(4), 0);
        assert_eq!(RetentionPolicy::KeepAll.prune_before(100), 0);
    }
}
