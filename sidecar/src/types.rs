/// Core data model for the sidecar
///
/// Validator sets are immutable per-epoch snapshots of the external ledger's
/// operator registry. Signature requests are identified by a deterministic
/// hash of their fields, so two requests with identical fields are the same
/// request everywhere in the network.

use crate::crypto::{self, hash_data, hash_domain, Hash};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub const ADDRESS_SIZE: usize = 20;

/// Request identifier: deterministic hash of a `SignatureRequest`
pub type RequestId = Hash;

#[derive(Error, Debug)]
pub enum TypesError {
    #[error("Invalid address size")]
    InvalidAddressSize,
    #[error("Unknown key tag {0}")]
    UnknownKeyTag(u8),
    #[error("Validators not sorted ascending by operator")]
    UnsortedValidators,
}

/// 20-byte on-chain identity (operators and vaults)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address([u8; ADDRESS_SIZE]);

/// Operator identity within a validator set
pub type OperatorId = Address;

impl Address {
    pub fn new(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, TypesError> {
        if slice.len() != ADDRESS_SIZE {
            return Err(TypesError::InvalidAddressSize);
        }
        let mut bytes = [0u8; ADDRESS_SIZE];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", hex::encode(self.0))
    }
}

/// Key slot a validator may register under.
///
/// A tag identifies both the cryptographic scheme and the slot; the same
/// operator can hold one compact public key per tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeyTag {
    /// BLS12-381 key; supports compact multi-signature aggregation
    Bls,
    /// secp256k1 ECDSA key; no aggregation, every raw signature is kept
    Ecdsa,
    /// Key committed to an external proof system; aggregation is delegated
    Zk,
}

impl KeyTag {
    /// Whether signatures under this tag can be combined into a compact proof
    pub fn supports_aggregation(&self) -> bool {
        matches!(self, KeyTag::Bls | KeyTag::Zk)
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            KeyTag::Bls => 0,
            KeyTag::Ecdsa => 1,
            KeyTag::Zk => 2,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self, TypesError> {
        match value {
            0 => Ok(KeyTag::Bls),
            1 => Ok(KeyTag::Ecdsa),
            2 => Ok(KeyTag::Zk),
            other => Err(TypesError::UnknownKeyTag(other)),
        }
    }
}

impl fmt::Display for KeyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyTag::Bls => write!(f, "bls"),
            KeyTag::Ecdsa => write!(f, "ecdsa"),
            KeyTag::Zk => write!(f, "zk"),
        }
    }
}

/// Verification scheme an aggregation proof was produced under
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationType {
    /// Pairing-checked BLS multi-signature
    Bls,
    /// Opaque proof checked by an external proof system
    External,
}

/// Per-vault share of an operator's voting power
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultStake {
    pub vault: Address,
    pub voting_power: u128,
}

/// A single validator within an epoch's set
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub operator: OperatorId,
    pub voting_power: u128,
    pub is_active: bool,
    /// Compact public key per registered key tag
    pub keys: BTreeMap<KeyTag, Vec<u8>>,
    /// Vault breakdown summing to `voting_power`
    pub vaults: Vec<VaultStake>,
}

impl Validator {
    pub fn key(&self, tag: KeyTag) -> Option<&[u8]> {
        self.keys.get(&tag).map(|k| k.as_slice())
    }
}

/// Lifecycle of a persisted validator set
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetStatus {
    Pending,
    Derived,
    Committed,
}

/// Immutable per-epoch snapshot of the validator registry.
///
/// Validators are ordered ascending by operator identity; verifiers and
/// aggregators rely on this order for canonical encodings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSet {
    pub epoch: u64,
    pub validators: Vec<Validator>,
    /// Absolute voting power required for quorum (not a percentage)
    pub quorum_threshold: u128,
    /// Key tag validators must sign the epoch header with
    pub required_key_tag: KeyTag,
    pub previous_header_hash: Hash,
    pub status: SetStatus,
}

impl ValidatorSet {
    /// Check the canonical-ordering invariant: strictly ascending by operator
    pub fn ensure_sorted(&self) -> Result<(), TypesError> {
        let sorted = self
            .validators
            .windows(2)
            .all(|pair| pair[0].operator < pair[1].operator);
        if sorted {
            Ok(())
        } else {
            Err(TypesError::UnsortedValidators)
        }
    }

    /// Active validators in canonical order; positional indices used by the
    /// quorum tracker and gossip bitmaps refer to positions in this sequence
    pub fn active_validators(&self) -> impl Iterator<Item = &Validator> {
        self.validators.iter().filter(|v| v.is_active)
    }

    pub fn active_count(&self) -> u32 {
        self.active_validators().count() as u32
    }

    pub fn total_active_power(&self) -> u128 {
        self.active_validators().map(|v| v.voting_power).sum()
    }

    /// Active validator at a positional index
    pub fn active_validator(&self, index: u32) -> Option<&Validator> {
        self.active_validators().nth(index as usize)
    }

    /// Positional index of an active operator
    pub fn active_index_of(&self, operator: &OperatorId) -> Option<u32> {
        self.active_validators()
            .position(|v| &v.operator == operator)
            .map(|p| p as u32)
    }

    /// Message validators sign to commit this epoch's header
    pub fn header_message(&self) -> Vec<u8> {
        let mut parts: Vec<Vec<u8>> = Vec::with_capacity(self.validators.len() + 2);
        parts.push(self.epoch.to_be_bytes().to_vec());
        parts.push(self.previous_header_hash.to_vec());
        for v in self.active_validators() {
            let mut entry = Vec::with_capacity(ADDRESS_SIZE + 16);
            entry.extend_from_slice(v.operator.as_bytes());
            entry.extend_from_slice(&v.voting_power.to_be_bytes());
            parts.push(entry);
        }
        let part_refs: Vec<&[u8]> = parts.iter().map(|p| p.as_slice()).collect();
        hash_domain(b"sidecar/epoch-header", &part_refs).to_vec()
    }

    pub fn header_hash(&self) -> Hash {
        hash_data(&self.header_message())
    }
}

/// Something that needs a quorum signature.
///
/// Identity is the deterministic hash of the fields; never mutated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRequest {
    pub key_tag: KeyTag,
    pub required_epoch: u64,
    pub message: Vec<u8>,
}

impl SignatureRequest {
    pub fn new(key_tag: KeyTag, required_epoch: u64, message: Vec<u8>) -> Self {
        Self {
            key_tag,
            required_epoch,
            message,
        }
    }

    /// Deterministic request identifier
    pub fn request_id(&self) -> RequestId {
        hash_domain(
            b"sidecar/signature-request",
            &[
                &[self.key_tag.as_u8()],
                &self.required_epoch.to_be_bytes(),
                &self.message,
            ],
        )
    }

    /// Hash of the message payload; this is what validators actually sign
    pub fn message_hash(&self) -> Hash {
        hash_data(&self.message)
    }
}

/// One validator's signature over a request, scheme-dependent encoding
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureExtended {
    pub message_hash: Hash,
    pub signature: Vec<u8>,
    pub public_key: Vec<u8>,
}

impl SignatureExtended {
    /// Check the raw signature against its embedded public key.
    ///
    /// Signatures under the external-proof tag are opaque to the sidecar and
    /// pass through; the proof system rejects garbage at aggregation time.
    pub fn verify(&self, key_tag: KeyTag) -> bool {
        match key_tag {
            KeyTag::Bls => {
                let (Ok(sig), Ok(pk)) = (
                    crypto::BLSSignature::from_bytes(&self.signature),
                    crypto::BLSPublicKey::from_bytes(&self.public_key),
                ) else {
                    return false;
                };
                sig.verify(self.message_hash.as_bytes(), &pk)
            }
            KeyTag::Ecdsa => {
                let (Ok(sig), Ok(pk)) = (
                    crypto::ECDSASignature::from_bytes(&self.signature),
                    crypto::ECDSAPublicKey::from_bytes(&self.public_key),
                ) else {
                    return false;
                };
                pk.verify(self.message_hash.as_bytes(), &sig)
            }
            KeyTag::Zk => true,
        }
    }
}

/// Compact proof that a quorum of voting power signed a message.
///
/// The proof bytes are scheme-specific; only the tag is interpreted here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationProof {
    pub verification_type: VerificationType,
    pub message_hash: Hash,
    pub proof: Vec<u8>,
}

/// Per-epoch network configuration snapshot
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub epoch: u64,
    pub verification_type: VerificationType,
    pub max_validators: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{BLSSecretKey, ECDSASecretKey};

    fn addr(byte: u8) -> Address {
        Address::new([byte; ADDRESS_SIZE])
    }

    fn validator(byte: u8, power: u128, active: bool) -> Validator {
        Validator {
            operator: addr(byte),
            voting_power: power,
            is_active: active,
            keys: BTreeMap::new(),
            vaults: vec![VaultStake {
                vault: addr(byte.wrapping_add(100)),
                voting_power: power,
            }],
        }
    }

    fn set_of(validators: Vec<Validator>) -> ValidatorSet {
        ValidatorSet {
            epoch: 3,
            validators,
            quorum_threshold: 500,
            required_key_tag: KeyTag::Bls,
            previous_header_hash: Hash::zero(),
            status: SetStatus::Committed,
        }
    }

    #[test]
    fn test_request_id_deterministic() {
        let a = SignatureRequest::new(KeyTag::Bls, 7, b"header".to_vec());
        let b = SignatureRequest::new(KeyTag::Bls, 7, b"header".to_vec());
        assert_eq!(a.request_id(), b.request_id());
    }

    #[test]
    fn test_request_id_depends_on_all_fields() {
        let base = SignatureRequest::new(KeyTag::Bls, 7, b"header".to_vec());
        let other_tag = SignatureRequest::new(KeyTag::Ecdsa, 7, b"header".to_vec());
        let other_epoch = SignatureRequest::new(KeyTag::Bls, 8, b"header".to_vec());
        let other_msg = SignatureRequest::new(KeyTag::Bls, 7, b"header2".to_vec());

        assert_ne!(base.request_id(), other_tag.request_id());
        assert_ne!(base.request_id(), other_epoch.request_id());
        assert_ne!(base.request_id(), other_msg.request_id());
    }

    #[test]
    fn test_ensure_sorted() {
        let ok = set_of(vec![validator(1, 100, true), validator(2, 200, true)]);
        assert!(ok.ensure_sorted().is_ok());

        let unsorted = set_of(vec![validator(2, 200, true), validator(1, 100, true)]);
        assert!(unsorted.ensure_sorted().is_err());

        let duplicate = set_of(vec![validator(1, 100, true), validator(1, 200, true)]);
        assert!(duplicate.ensure_sorted().is_err());
    }

    #[test]
    fn test_active_positional_indices() {
        // Validator 2 is inactive, so validator 3 takes positional index 1
        let set = set_of(vec![
            validator(1, 100, true),
            validator(2, 200, false),
            validator(3, 300, true),
        ]);

        assert_eq!(set.active_count(), 2);
        assert_eq!(set.total_active_power(), 400);
        assert_eq!(set.active_index_of(&addr(1)), Some(0));
        assert_eq!(set.active_index_of(&addr(2)), None);
        assert_eq!(set.active_index_of(&addr(3)), Some(1));
        assert_eq!(set.active_validator(1).unwrap().operator, addr(3));
        assert!(set.active_validator(2).is_none());
    }

    #[test]
    fn test_header_hash_changes_with_epoch() {
        let a = set_of(vec![validator(1, 100, true)]);
        let mut b = a.clone();
        b.epoch = 4;
        assert_ne!(a.header_hash(), b.header_hash());
    }

    #[test]
    fn test_key_tag_roundtrip() {
        for tag in [KeyTag::Bls, KeyTag::Ecdsa, KeyTag::Zk] {
            assert_eq!(KeyTag::from_u8(tag.as_u8()).unwrap(), tag);
        }
        assert!(KeyTag::from_u8(9).is_err());
    }

    #[test]
    fn test_aggregation_capability() {
        assert!(KeyTag::Bls.supports_aggregation());
        assert!(KeyTag::Zk.supports_aggregation());
        assert!(!KeyTag::Ecdsa.supports_aggregation());
    }

    #[test]
    fn test_signature_extended_verify_bls() {
        let sk = BLSSecretKey::generate();
        let request = SignatureRequest::new(KeyTag::Bls, 1, b"payload".to_vec());
        let message_hash = request.message_hash();

        let good = SignatureExtended {
            message_hash,
            signature: sk.sign(message_hash.as_bytes()).to_bytes(),
            public_key: sk.public_key().to_bytes(),
        };
        assert!(good.verify(KeyTag::Bls));

        let bad = SignatureExtended {
            signature: vec![0u8; 96],
            ..good.clone()
        };
        assert!(!bad.verify(KeyTag::Bls));
    }

    #[test]
    fn test_signature_extended_verify_ecdsa() {
        let sk = ECDSASecretKey::generate();
        let request = SignatureRequest::new(KeyTag::Ecdsa, 1, b"payload".to_vec());
        let message_hash = request.message_hash();

        let good = SignatureExtended {
            message_hash,
            signature: sk.sign(message_hash.as_bytes()).to_bytes(),
            public_key: sk.public_key().to_bytes(),
        };
        assert!(good.verify(KeyTag::Ecdsa));

        let other = ECDSASecretKey::generate();
        let wrong_key = SignatureExtended {
            public_key: other.public_key().to_bytes(),
            ..good.clone()
        };
        assert!(!wrong_key.verify(KeyTag::Ecdsa));
    }
}
