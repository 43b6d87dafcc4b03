/// Signature aggregation and proof verification
///
/// The verification scheme set is closed and known at compile time, so
/// dispatch is a plain enum rather than virtual: one variant runs the BLS
/// pairing protocol locally, the other hands opaque bytes to an external
/// proof system. A process holds exactly one scheme, selected from the
/// epoch's network configuration.

pub mod bls;

use crate::crypto::bls::BLSError;
use crate::crypto::Hash;
use crate::types::{
    AggregationProof, KeyTag, SignatureExtended, TypesError, ValidatorSet, VerificationType,
};
use std::sync::Arc;
use thiserror::Error;

pub use bls::BlsAggregator;

#[derive(Error, Debug)]
pub enum AggregationError {
    #[error("No signatures to aggregate")]
    NoSignatures,
    #[error("Signature message hash does not match the request")]
    MessageHashMismatch,
    #[error("Invalid validator set: {0}")]
    InvalidValidatorSet(#[from] TypesError),
    #[error("Signature from a key not registered in the validator set")]
    UnknownSigner,
    #[error("Duplicate signature from validator at position {0}")]
    DuplicateSigner(usize),
    #[error("Malformed registered public key")]
    InvalidKey,
    #[error("Key tag {0} is not aggregatable by this scheme")]
    UnsupportedKeyTag(KeyTag),
    #[error("BLS error: {0}")]
    Bls(#[from] BLSError),
    #[error("External proof system: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, AggregationError>;

/// Commitment handed to the external settlement layer; not interpreted here
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtraDataEntry {
    pub key: Hash,
    pub value: Vec<u8>,
}

/// External proof system backend (opaque bytes in, boolean out)
pub trait ExternalProver: Send + Sync {
    fn aggregate(
        &self,
        set: &ValidatorSet,
        key_tag: KeyTag,
        message_hash: &Hash,
        signatures: &[SignatureExtended],
    ) -> Result<Vec<u8>>;

    fn verify(&self, set: &ValidatorSet, key_tag: KeyTag, proof: &[u8]) -> Result<bool>;

    fn extra_data(&self, _set: &ValidatorSet, _key_tags: &[KeyTag]) -> Result<Vec<ExtraDataEntry>> {
        Ok(Vec::new())
    }
}

/// Delegates the whole protocol to an external proof system
#[derive(Clone)]
pub struct ExternalAggregator {
    prover: Arc<dyn ExternalProver>,
}

impl ExternalAggregator {
    pub fn new(prover: Arc<dyn ExternalProver>) -> Self {
        Self { prover }
    }
}

/// Aggregation engine, polymorphic over the verification scheme
#[derive(Clone)]
pub enum AggregationScheme {
    Bls(BlsAggregator),
    External(ExternalAggregator),
}

impl AggregationScheme {
    pub fn bls() -> Self {
        Self::Bls(BlsAggregator)
    }

    pub fn external(prover: Arc<dyn ExternalProver>) -> Self {
        Self::External(ExternalAggregator::new(prover))
    }

    /// Scheme selected by an epoch's network configuration. The external
    /// variant needs a prover backend; without one it is unavailable.
    pub fn for_config(
        config: &crate::types::NetworkConfig,
        prover: Option<Arc<dyn ExternalProver>>,
    ) -> Option<Self> {
        match config.verification_type {
            VerificationType::Bls => Some(Self::bls()),
            VerificationType::External => prover.map(Self::external),
        }
    }

    pub fn verification_type(&self) -> VerificationType {
        match self {
            Self::Bls(_) => VerificationType::Bls,
            Self::External(_) => VerificationType::External,
        }
    }

    /// Combine raw signatures into a compact quorum proof
    pub fn aggregate(
        &self,
        set: &ValidatorSet,
        key_tag: KeyTag,
        message_hash: &Hash,
        signatures: &[SignatureExtended],
    ) -> Result<AggregationProof> {
        match self {
            Self::Bls(inner) => inner.aggregate(set, key_tag, message_hash, signatures),
            Self::External(inner) => {
                let proof = inner
                    .prover
                    .aggregate(set, key_tag, message_hash, signatures)?;
                Ok(AggregationProof {
                    verification_type: VerificationType::External,
                    message_hash: *message_hash,
                    proof,
                })
            }
        }
    }

    /// Check a proof against the current validator set.
    ///
    /// The proof is untrusted input: malformed or insufficient proofs come
    /// back as `Ok(false)`, never as an error.
    pub fn verify(&self, set: &ValidatorSet, key_tag: KeyTag, proof: &AggregationProof) -> Result<bool> {
        if proof.verification_type != self.verification_type() {
            return Ok(false);
        }
        match self {
            Self::Bls(inner) => inner.verify(set, key_tag, proof),
            Self::External(inner) => inner.prover.verify(set, key_tag, &proof.proof),
        }
    }

    /// Per-key-tag validator-set commitments for the settlement layer
    pub fn generate_extra_data(
        &self,
        set: &ValidatorSet,
        key_tags: &[KeyTag],
    ) -> Result<Vec<ExtraDataEntry>> {
        match self {
            Self::Bls(inner) => inner.generate_extra_data(set, key_tags),
            Self::External(inner) => inner.prover.extra_data(set, key_tags),
        }
    }
}
