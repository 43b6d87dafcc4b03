/// Signature orchestration
///
/// Turns incoming signatures into quorum decisions exactly once. Every
/// mutation runs under the per-request advisory lock inside one storage
/// transaction: tracker update, signature persistence, request registration
/// and pending-index maintenance either all commit or none do. Duplicate
/// submissions surface as `AlreadyExists` and change nothing.

use crate::aggregation::{AggregationError, AggregationScheme, ExtraDataEntry};
use crate::crypto::Hash;
use crate::provider::{ProviderError, ValidatorSetProvider};
use crate::quorum::{QuorumError, QuorumTracker};
use crate::signer::{LocalSigner, SignerError};
use crate::storage::{LockKey, LockTable, StorageError, Store};
use crate::types::{
    AggregationProof, KeyTag, OperatorId, RequestId, SignatureExtended, SignatureRequest,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Quorum(#[from] QuorumError),

    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Signer(#[from] SignerError),

    #[error("Validator index {index} out of range for epoch {epoch}")]
    InvalidValidatorIndex { index: u32, epoch: u64 },

    #[error("No local signer configured")]
    NoSigner,

    #[error("Local operator is not active in epoch {0}")]
    NotInValidatorSet(u64),
}

impl OrchestratorError {
    /// Duplicate-protection outcome, not a failure: the signature or proof
    /// was already recorded
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            OrchestratorError::Quorum(QuorumError::AlreadyExists { .. })
                | OrchestratorError::Storage(StorageError::AlreadyExists(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// What a processed signature did to the request's quorum state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub quorum_reached: bool,
    /// True exactly once per request: the submission that first crossed the
    /// threshold
    pub newly_reached: bool,
}

/// Voting-power status of one request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregationStatus {
    pub voting_power: u128,
    pub quorum_threshold: u128,
    pub signers: Vec<OperatorId>,
}

/// Coordinates signatures, proofs and pending indices over one store
pub struct SignatureManager {
    store: Arc<Store>,
    locks: Arc<LockTable>,
    scheme: AggregationScheme,
    provider: Arc<ValidatorSetProvider>,
    signer: Option<Arc<LocalSigner>>,
}

impl SignatureManager {
    pub fn new(
        store: Arc<Store>,
        locks: Arc<LockTable>,
        scheme: AggregationScheme,
        provider: Arc<ValidatorSetProvider>,
        signer: Option<Arc<LocalSigner>>,
    ) -> Self {
        Self {
            store,
            locks,
            scheme,
            provider,
            signer,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn locks(&self) -> &Arc<LockTable> {
        &self.locks
    }

    pub fn scheme(&self) -> &AggregationScheme {
        &self.scheme
    }

    /// Record one validator's signature for a request, as a single atomic
    /// unit.
    ///
    /// Creates the quorum tracker lazily, persists the raw signature,
    /// registers a first-seen request in the pending indices and maintains
    /// the await-quorum index: aggregation-capable tags leave it once the
    /// threshold is crossed, non-aggregation tags once every validator has
    /// signed. A duplicate (request, validator) pair fails with
    /// `AlreadyExists` and leaves all state untouched.
    pub async fn process_signature(
        &self,
        request_hash: RequestId,
        validator_index: u32,
        signature: &SignatureExtended,
        epoch: u64,
        request: Option<&SignatureRequest>,
        key_tag: KeyTag,
        voting_power: u128,
    ) -> Result<ProcessOutcome> {
        let _guard = self.locks.acquire(LockKey::Request(request_hash)).await;

        let outcome = self.store.update(|tx| {
            let set = tx
                .validator_set(epoch)?
                .ok_or(StorageError::NotFound("validator set"))?;
            if validator_index >= set.active_count() {
                return Err(OrchestratorError::InvalidValidatorIndex {
                    index: validator_index,
                    epoch,
                });
            }

            let mut tracker = match tx.signature_map(&request_hash)? {
                Some(tracker) => tracker,
                None => QuorumTracker::new(request_hash, epoch, set.active_count()),
            };
            let was_reached = tracker.threshold_reached(set.quorum_threshold);

            tracker.set_validator_present(validator_index, voting_power)?;
            tx.put_signature_map(&tracker)?;
            tx.put_signature(&request_hash, validator_index, signature)?;

            // First sighting of the request payload registers it; the
            // await-proof index only applies where a proof will ever exist
            if let Some(request) = request {
                if tx.signature_request(&request_hash)?.is_none() {
                    tx.put_signature_request(&request_hash, request)?;
                    tx.record_request_epoch(epoch, &request_hash, key_tag)?;
                    tx.add_pending_signature(epoch, &request_hash)?;
                    if key_tag.supports_aggregation() {
                        tx.add_pending_proof(epoch, &request_hash)?;
                    }
                }
            }

            let reached = tracker.threshold_reached(set.quorum_threshold);
            if key_tag.supports_aggregation() {
                if reached {
                    tx.remove_pending_signature(epoch, &request_hash)?;
                }
            } else if tracker.all_present() {
                // No compact proof exists for this tag; gossip keeps
                // soliciting until every validator's signature is on hand
                tx.remove_pending_signature(epoch, &request_hash)?;
            }

            Ok(ProcessOutcome {
                quorum_reached: reached,
                newly_reached: reached && !was_reached,
            })
        })?;

        if outcome.newly_reached {
            info!(request = %request_hash, epoch, "quorum reached");
        } else {
            debug!(request = %request_hash, epoch, validator_index, "signature recorded");
        }
        Ok(outcome)
    }

    /// Persist an aggregation proof exactly once, then clear the request's
    /// await-proof marker. The marker being absent is normal (removed
    /// earlier, or the request was never registered here).
    pub async fn process_aggregation_proof(
        &self,
        request_hash: RequestId,
        proof: &AggregationProof,
    ) -> Result<()> {
        let _guard = self.locks.acquire(LockKey::Request(request_hash)).await;

        self.store.update(|tx| {
            tx.put_aggregation_proof(&request_hash, proof)?;

            let epoch = match tx.signature_map(&request_hash)? {
                Some(tracker) => Some(tracker.epoch()),
                None => tx
                    .signature_request(&request_hash)?
                    .map(|request| request.required_epoch),
            };
            if let Some(epoch) = epoch {
                tx.remove_pending_proof(epoch, &request_hash)?;
            }
            Ok::<(), OrchestratorError>(())
        })?;

        info!(request = %request_hash, "aggregation proof persisted");
        Ok(())
    }

    /// Aggregate a request's signatures into a proof if quorum is reached.
    ///
    /// Returns `None` while below quorum or for non-aggregation tags. If
    /// another aggregator already persisted a proof, the stored one is
    /// returned.
    pub async fn try_aggregate(&self, request_hash: RequestId) -> Result<Option<AggregationProof>> {
        let (request, tracker, signatures) = self.store.view(|tx| {
            let request = tx
                .signature_request(&request_hash)?
                .ok_or(StorageError::NotFound("signature request"))?;
            let tracker = tx
                .signature_map(&request_hash)?
                .ok_or(StorageError::NotFound("signature map"))?;
            let signatures = tx.signatures_for_request(&request_hash)?;
            Ok::<_, OrchestratorError>((request, tracker, signatures))
        })?;

        if !request.key_tag.supports_aggregation() {
            return Ok(None);
        }
        let set = self.provider.get(request.required_epoch)?;
        if !tracker.threshold_reached(set.quorum_threshold) {
            return Ok(None);
        }

        let raw: Vec<SignatureExtended> =
            signatures.into_iter().map(|(_, signature)| signature).collect();
        let proof =
            self.scheme
                .aggregate(&set, request.key_tag, &request.message_hash(), &raw)?;

        match self.process_aggregation_proof(request_hash, &proof).await {
            Ok(()) => Ok(Some(proof)),
            Err(e) if e.is_already_exists() => {
                debug!(request = %request_hash, "proof already aggregated elsewhere");
                Ok(self.store.view(|tx| tx.aggregation_proof(&request_hash))?)
            }
            Err(e) => Err(e),
        }
    }

    /// Collaborator surface: sign a request with the local key and run the
    /// result through `process_signature` at our own validator index
    pub async fn sign(&self, request: &SignatureRequest) -> Result<ProcessOutcome> {
        let signer = self.signer.as_ref().ok_or(OrchestratorError::NoSigner)?;
        let set = self
            .provider
            .get_or_derive(&self.locks, request.required_epoch)
            .await?;
        let index = set
            .active_index_of(signer.operator())
            .ok_or(OrchestratorError::NotInValidatorSet(request.required_epoch))?;
        let voting_power = set
            .active_validator(index)
            .map(|v| v.voting_power)
            .unwrap_or_default();

        let signature = signer.sign_request(request)?;
        self.process_signature(
            request.request_id(),
            index,
            &signature,
            request.required_epoch,
            Some(request),
            request.key_tag,
            voting_power,
        )
        .await
    }

    /// Collaborator surface: stored proof for a request
    pub fn get_aggregation_proof(&self, request_hash: &RequestId) -> Result<AggregationProof> {
        self.store
            .view(|tx| tx.aggregation_proof(request_hash))?
            .ok_or_else(|| StorageError::NotFound("aggregation proof").into())
    }

    /// Collaborator surface: accumulated voting power and signer list
    pub fn get_aggregation_status(&self, request_hash: &RequestId) -> Result<AggregationStatus> {
        let tracker = self
            .store
            .view(|tx| tx.signature_map(request_hash))?
            .ok_or(StorageError::NotFound("signature map"))?;
        let set = self.provider.get(tracker.epoch())?;

        let signers = tracker
            .signer_indices()
            .into_iter()
            .filter_map(|index| set.active_validator(index))
            .map(|validator| validator.operator)
            .collect();

        Ok(AggregationStatus {
            voting_power: tracker.voting_power(),
            quorum_threshold: set.quorum_threshold,
            signers,
        })
    }

    /// Validator-set commitments for the settlement layer
    pub fn extra_data(&self, epoch: u64, key_tags: &[KeyTag]) -> Result<Vec<ExtraDataEntry>> {
        let set = self.provider.get(epoch)?;
        Ok(self.scheme.generate_extra_data(&set, key_tags)?)
    }
}
