/// Gossip reconciliation protocol
///
/// Nodes that missed gossip messages converge by asking peers for exactly
/// what they are missing: per-request bitmaps of absent signatures and ids
/// of absent proofs. Every request builder and response handler is bounded
/// by configuration, independent of transport-level flow control, so a
/// single round caps memory and CPU no matter how aggressively peers query.
/// Ingestion trusts nothing: items outside the original want set are
/// discarded, signatures are checked against registered keys, proofs are
/// verified cryptographically, and one bad item never aborts the batch.

pub mod types;

use crate::network::{
    AggregatedSignatureMessage, SignatureMessage, WantAggregationProofsRequest,
    WantAggregationProofsResponse, WantSignaturesRequest, WantSignaturesResponse,
};
use crate::orchestrator::SignatureManager;
use crate::provider::ValidatorSetProvider;
use crate::quorum;
use crate::storage::StorageError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub use types::{IngestReport, RoundReport, SyncStats};

/// Sync errors
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Peer request failed: {0}")]
    Client(String),

    #[error("Timeout waiting for peer response")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Configuration for the sync protocol
#[derive(Clone)]
pub struct SyncConfig {
    /// How many epochs behind the latest to reconcile
    pub epochs_to_sync: u64,

    /// Cap on requests per outgoing want-signatures message
    pub max_signature_requests_per_sync: usize,

    /// Cap on requests per outgoing want-proofs message
    pub max_agg_proof_requests_per_sync: usize,

    /// Cap on signatures served in one response, across all requests
    pub max_response_signature_count: usize,

    /// Cap on proofs served in one response
    pub max_response_agg_proof_count: usize,

    /// Timeout for one peer round trip
    pub request_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            epochs_to_sync: 10,
            max_signature_requests_per_sync: 128,
            max_agg_proof_requests_per_sync: 128,
            max_response_signature_count: 1024,
            max_response_agg_proof_count: 128,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Transport-side of a sync round; implemented over whatever wire the
/// daemon uses
#[async_trait]
pub trait SyncClient: Send + Sync {
    async fn want_signatures(&self, request: WantSignaturesRequest)
        -> Result<WantSignaturesResponse>;

    async fn want_aggregation_proofs(
        &self,
        request: WantAggregationProofsRequest,
    ) -> Result<WantAggregationProofsResponse>;
}

/// Peer reconciliation manager
pub struct GossipSync {
    manager: Arc<SignatureManager>,
    provider: Arc<ValidatorSetProvider>,
    config: SyncConfig,
    stats: RwLock<SyncStats>,
}

impl GossipSync {
    pub fn new(
        manager: Arc<SignatureManager>,
        provider: Arc<ValidatorSetProvider>,
        config: SyncConfig,
    ) -> Self {
        Self {
            manager,
            provider,
            config,
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Build a bounded "what am I missing" request over the await-quorum
    /// index, newest epoch first
    pub fn build_want_signatures(&self) -> Result<WantSignaturesRequest> {
        self.manager.store().view(|tx| {
            let mut wants = BTreeMap::new();
            let Some(latest) = tx.latest_epoch()? else {
                return Ok(WantSignaturesRequest::default());
            };
            let start = latest.saturating_sub(self.config.epochs_to_sync);
            let mut budget = self.config.max_signature_requests_per_sync;

            for epoch in (start..=latest).rev() {
                if budget == 0 {
                    break;
                }
                for request in tx.pending_signature_requests(epoch, budget)? {
                    let Some(tracker) = tx.signature_map(&request)? else {
                        // Pending entry without a tracker: nothing signed
                        // here yet, nothing to subtract either
                        continue;
                    };
                    if tracker.missing_indices().is_empty() {
                        continue;
                    }
                    wants.insert(request, tracker.missing_validators());
                    budget -= 1;
                    if budget == 0 {
                        break;
                    }
                }
            }
            Ok(WantSignaturesRequest { wants })
        })
    }

    /// Build a bounded proof request over the await-proof index, newest
    /// epoch first. Self-heals: a pending marker whose proof already exists
    /// locally is deleted instead of requested.
    pub async fn build_want_aggregation_proofs(&self) -> Result<WantAggregationProofsRequest> {
        let (request, healed) = self.manager.store().update(|tx| {
            let mut hashes = Vec::new();
            let mut healed = 0u64;
            let Some(latest) = tx.latest_epoch()? else {
                return Ok((WantAggregationProofsRequest::default(), 0));
            };
            let start = latest.saturating_sub(self.config.epochs_to_sync);
            let mut budget = self.config.max_agg_proof_requests_per_sync;

            for epoch in (start..=latest).rev() {
                if budget == 0 {
                    break;
                }
                for request in tx.pending_proof_requests(epoch, budget)? {
                    if tx.aggregation_proof(&request)?.is_some() {
                        tx.remove_pending_proof(epoch, &request)?;
                        healed += 1;
                        continue;
                    }
                    hashes.push(request);
                    budget -= 1;
                    if budget == 0 {
                        break;
                    }
                }
            }
            Ok::<_, StorageError>((WantAggregationProofsRequest { request_hashes: hashes }, healed))
        })?;

        if healed > 0 {
            debug!(healed, "removed stale await-proof markers");
            self.stats.write().await.stale_markers_healed += healed;
        }
        Ok(request)
    }

    /// Serve a peer's want-signatures request. One counter bounds the whole
    /// response: outer and inner loops stop as soon as
    /// `max_response_signature_count` signatures have been collected.
    pub fn handle_want_signatures(
        &self,
        request: &WantSignaturesRequest,
    ) -> Result<WantSignaturesResponse> {
        self.manager.store().view(|tx| {
            let mut budget = self.config.max_response_signature_count;
            let mut out: BTreeMap<_, Vec<(u32, _)>> = BTreeMap::new();

            'requests: for (request_hash, missing) in &request.wants {
                let mut items = Vec::new();
                for index in 0..(missing.len() as u32 * 8) {
                    if !quorum::bit(missing, index) {
                        continue;
                    }
                    if budget == 0 {
                        if !items.is_empty() {
                            out.insert(*request_hash, items);
                        }
                        break 'requests;
                    }
                    if let Some(signature) = tx.signature(request_hash, index)? {
                        items.push((index, signature));
                        budget -= 1;
                    }
                }
                if !items.is_empty() {
                    out.insert(*request_hash, items);
                }
            }
            Ok(WantSignaturesResponse { signatures: out })
        })
    }

    /// Serve a peer's want-proofs request. Proofs only exist for
    /// aggregation-capable key tags; anything else (or simply not having
    /// the proof) is silently omitted.
    pub fn handle_want_aggregation_proofs(
        &self,
        request: &WantAggregationProofsRequest,
    ) -> Result<WantAggregationProofsResponse> {
        self.manager.store().view(|tx| {
            let mut out = BTreeMap::new();
            for request_hash in &request.request_hashes {
                if out.len() >= self.config.max_response_agg_proof_count {
                    break;
                }
                let Some(record) = tx.signature_request(request_hash)? else {
                    continue;
                };
                if !record.key_tag.supports_aggregation() {
                    continue;
                }
                if let Some(proof) = tx.aggregation_proof(request_hash)? {
                    out.insert(*request_hash, proof);
                }
            }
            Ok(WantAggregationProofsResponse { proofs: out })
        })
    }

    /// Feed a peer's signature response through the orchestrator.
    ///
    /// Defensive on every item: must have been requested, must come from the
    /// validator's registered key, must actually verify. Outcomes are
    /// counted, never fatal.
    pub async fn ingest_signatures(
        &self,
        want: &WantSignaturesRequest,
        response: WantSignaturesResponse,
    ) -> IngestReport {
        let mut report = IngestReport::default();

        for (request_hash, items) in response.signatures {
            let Some(requested) = want.wants.get(&request_hash) else {
                report.unrequested += items.len() as u64;
                continue;
            };
            for (index, signature) in items {
                if !quorum::bit(requested, index) {
                    report.unrequested += 1;
                    continue;
                }

                let record = match self
                    .manager
                    .store()
                    .view(|tx| tx.signature_request(&request_hash))
                {
                    Ok(Some(record)) => record,
                    Ok(None) | Err(_) => {
                        report.request_lookup_errors += 1;
                        continue;
                    }
                };
                let Ok(set) = self.provider.get(record.required_epoch) else {
                    report.request_lookup_errors += 1;
                    continue;
                };
                let Some(validator) = set.active_validator(index) else {
                    report.processing_errors += 1;
                    continue;
                };

                let registered = validator.key(record.key_tag);
                if registered != Some(signature.public_key.as_slice())
                    || signature.message_hash != record.message_hash()
                    || !signature.verify(record.key_tag)
                {
                    warn!(request = %request_hash, index, "peer sent an invalid signature");
                    report.processing_errors += 1;
                    continue;
                }

                match self
                    .manager
                    .process_signature(
                        request_hash,
                        index,
                        &signature,
                        record.required_epoch,
                        None,
                        record.key_tag,
                        validator.voting_power,
                    )
                    .await
                {
                    Ok(_) => report.processed += 1,
                    Err(e) if e.is_already_exists() => report.already_exists += 1,
                    Err(e) => {
                        warn!(request = %request_hash, index, error = %e, "signature ingestion failed");
                        report.processing_errors += 1;
                    }
                }
            }
        }
        report
    }

    /// Feed a peer's proof response through the orchestrator, verifying
    /// each proof against the current validator set first
    pub async fn ingest_proofs(
        &self,
        want: &WantAggregationProofsRequest,
        response: WantAggregationProofsResponse,
    ) -> IngestReport {
        let mut report = IngestReport::default();

        for (request_hash, proof) in response.proofs {
            if !want.request_hashes.contains(&request_hash) {
                report.unrequested += 1;
                continue;
            }

            let record = match self
                .manager
                .store()
                .view(|tx| tx.signature_request(&request_hash))
            {
                Ok(Some(record)) => record,
                Ok(None) | Err(_) => {
                    report.request_lookup_errors += 1;
                    continue;
                }
            };
            let Ok(set) = self.provider.get(record.required_epoch) else {
                report.request_lookup_errors += 1;
                continue;
            };

            match self.manager.scheme().verify(&set, record.key_tag, &proof) {
                Ok(true) => {}
                Ok(false) | Err(_) => {
                    warn!(request = %request_hash, "peer sent an unverifiable proof");
                    report.processing_errors += 1;
                    continue;
                }
            }

            match self.manager.process_aggregation_proof(request_hash, &proof).await {
                Ok(()) => report.processed += 1,
                Err(e) if e.is_already_exists() => report.already_exists += 1,
                Err(e) => {
                    warn!(request = %request_hash, error = %e, "proof ingestion failed");
                    report.processing_errors += 1;
                }
            }
        }
        report
    }

    /// Apply a signature heard live on the gossip mesh.
    ///
    /// The signer is resolved by its registered key for the message's tag;
    /// unknown keys, failed verification and duplicates all come back as
    /// `false` (dropped), matching how peer-supplied data is treated during
    /// reconciliation.
    pub async fn handle_signature_message(&self, message: &SignatureMessage) -> bool {
        let Ok(set) = self.provider.get(message.epoch) else {
            debug!(epoch = message.epoch, "signature gossip for unknown epoch dropped");
            return false;
        };
        let signer = set.active_validators().enumerate().find(|(_, validator)| {
            validator.key(message.key_tag) == Some(message.signature.public_key.as_slice())
        });
        let Some((index, validator)) = signer else {
            warn!(request = %message.request_hash, "signature gossip from unregistered key");
            return false;
        };
        if !message.signature.verify(message.key_tag) {
            warn!(request = %message.request_hash, "invalid signature gossip dropped");
            return false;
        }

        match self
            .manager
            .process_signature(
                message.request_hash,
                index as u32,
                &message.signature,
                message.epoch,
                None,
                message.key_tag,
                validator.voting_power,
            )
            .await
        {
            Ok(_) => true,
            Err(e) if e.is_already_exists() => false,
            Err(e) => {
                warn!(request = %message.request_hash, error = %e, "signature gossip rejected");
                false
            }
        }
    }

    /// Apply an aggregation proof heard live on the gossip mesh, verifying
    /// it against the current validator set first
    pub async fn handle_aggregation_message(&self, message: &AggregatedSignatureMessage) -> bool {
        let Ok(set) = self.provider.get(message.epoch) else {
            debug!(epoch = message.epoch, "proof gossip for unknown epoch dropped");
            return false;
        };
        match self.manager.scheme().verify(&set, message.key_tag, &message.proof) {
            Ok(true) => {}
            Ok(false) | Err(_) => {
                warn!(request = %message.request_hash, "unverifiable proof gossip dropped");
                return false;
            }
        }
        match self
            .manager
            .process_aggregation_proof(message.request_hash, &message.proof)
            .await
        {
            Ok(()) => true,
            Err(e) if e.is_already_exists() => false,
            Err(e) => {
                warn!(request = %message.request_hash, error = %e, "proof gossip rejected");
                false
            }
        }
    }

    /// One full reconciliation round against a peer: build both want
    /// requests, fetch with a timeout, ingest defensively.
    ///
    /// A timed-out round rolls nothing back; whatever earlier transactions
    /// committed stays committed.
    pub async fn run_round(&self, client: &dyn SyncClient) -> Result<RoundReport> {
        let want_signatures = self.build_want_signatures()?;
        let signatures = if want_signatures.wants.is_empty() {
            IngestReport::default()
        } else {
            let response = tokio::time::timeout(
                self.config.request_timeout,
                client.want_signatures(want_signatures.clone()),
            )
            .await
            .map_err(|_| SyncError::Timeout)??;
            self.ingest_signatures(&want_signatures, response).await
        };

        let want_proofs = self.build_want_aggregation_proofs().await?;
        let proofs = if want_proofs.request_hashes.is_empty() {
            IngestReport::default()
        } else {
            let response = tokio::time::timeout(
                self.config.request_timeout,
                client.want_aggregation_proofs(want_proofs.clone()),
            )
            .await
            .map_err(|_| SyncError::Timeout)??;
            self.ingest_proofs(&want_proofs, response).await
        };

        let report = RoundReport { signatures, proofs };
        {
            let mut stats = self.stats.write().await;
            stats.rounds_completed += 1;
            stats.signatures_processed += report.signatures.processed;
            stats.proofs_processed += report.proofs.processed;
        }
        info!(
            signatures = report.signatures.processed,
            proofs = report.proofs.processed,
            anomalies = report.signatures.unrequested + report.proofs.unrequested,
            "sync round complete"
        );
        Ok(report)
    }

    pub async fn stats(&self) -> SyncStats {
        self.stats.read().await.clone()
    }
}
