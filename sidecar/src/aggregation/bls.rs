/// BLS multi-signature aggregation and verification
///
/// Proof layout (all sections fixed-width, big-endian):
///
///   aggregated signature   96 bytes  (compressed G2)
///   aggregated public key  48 bytes  (compressed G1)
///   validator-data block    4 + 64*n bytes
///       count              u32
///       entries            (compressed key 48 || voting power u128) * n,
///                          sorted ascending by compressed key
///   non-signer indices     u32 * k, strictly ascending positions into the
///                          validator-data block
///
/// A verifier recomputes the validator-data block from its own copy of the
/// epoch's validator set, subtracts the non-signers' voting power and keys,
/// and runs one pairing check. The effective aggregate key is always rebuilt
/// from registered validator keys and compared byte-for-byte against the key
/// embedded in the proof, so a proof cannot smuggle in a key outside the set
/// (rogue-key defense).

use crate::crypto::{
    aggregate_public_keys, aggregate_signatures, hash_data, hash_domain, BLSPublicKey,
    BLSSignature, Hash, BLS_PUBLIC_KEY_SIZE, BLS_SIGNATURE_SIZE,
};
use crate::types::{
    AggregationProof, KeyTag, SignatureExtended, ValidatorSet, VerificationType,
};
use std::collections::{HashMap, HashSet};

use super::{AggregationError, ExtraDataEntry, Result};

const ENTRY_SIZE: usize = BLS_PUBLIC_KEY_SIZE + 16;
const HEADER_SIZE: usize = BLS_SIGNATURE_SIZE + BLS_PUBLIC_KEY_SIZE;
const NON_SIGNER_INDEX_SIZE: usize = 4;

/// One row of the canonical validator-data block
struct CanonicalEntry {
    key: Vec<u8>,
    voting_power: u128,
    /// Index into `ValidatorSet::validators`
    validator_index: usize,
}

/// Active validators holding `key_tag`, sorted ascending by compressed key
fn canonical_entries(set: &ValidatorSet, key_tag: KeyTag) -> Result<Vec<CanonicalEntry>> {
    let mut entries: Vec<CanonicalEntry> = Vec::new();
    for (validator_index, validator) in set.validators.iter().enumerate() {
        if !validator.is_active {
            continue;
        }
        let Some(key) = validator.key(key_tag) else {
            continue;
        };
        if key.len() != BLS_PUBLIC_KEY_SIZE {
            return Err(AggregationError::InvalidKey);
        }
        entries.push(CanonicalEntry {
            key: key.to_vec(),
            voting_power: validator.voting_power,
            validator_index,
        });
    }
    entries.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(entries)
}

fn encode_block(entries: &[CanonicalEntry]) -> Vec<u8> {
    let mut block = Vec::with_capacity(4 + entries.len() * ENTRY_SIZE);
    block.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    for entry in entries {
        block.extend_from_slice(&entry.key);
        block.extend_from_slice(&entry.voting_power.to_be_bytes());
    }
    block
}

/// The local BLS aggregation scheme
#[derive(Clone, Copy)]
pub struct BlsAggregator;

impl BlsAggregator {
    /// Combine per-validator signatures into one compact proof.
    ///
    /// Aggregation does not require quorum; the proof simply records who
    /// signed, and verification enforces the threshold.
    pub fn aggregate(
        &self,
        set: &ValidatorSet,
        key_tag: KeyTag,
        message_hash: &Hash,
        signatures: &[SignatureExtended],
    ) -> Result<AggregationProof> {
        if key_tag != KeyTag::Bls {
            return Err(AggregationError::UnsupportedKeyTag(key_tag));
        }
        if signatures.is_empty() {
            return Err(AggregationError::NoSignatures);
        }
        for signature in signatures {
            if &signature.message_hash != message_hash {
                return Err(AggregationError::MessageHashMismatch);
            }
        }
        // Canonical encoding precondition
        set.ensure_sorted()?;

        // Compact key -> validator index, over every holder of the tag;
        // the active flag is checked at use so an inactive validator's
        // signature is skipped rather than rejected.
        let mut by_key: HashMap<&[u8], usize> = HashMap::new();
        for (index, validator) in set.validators.iter().enumerate() {
            if let Some(key) = validator.key(key_tag) {
                by_key.insert(key, index);
            }
        }

        let mut signed = vec![false; set.validators.len()];
        let mut sig_points: Vec<BLSSignature> = Vec::new();
        let mut key_points: Vec<BLSPublicKey> = Vec::new();

        for signature in signatures {
            let validator_index = *by_key
                .get(signature.public_key.as_slice())
                .ok_or(AggregationError::UnknownSigner)?;
            if !set.validators[validator_index].is_active {
                continue;
            }
            if signed[validator_index] {
                return Err(AggregationError::DuplicateSigner(validator_index));
            }
            signed[validator_index] = true;

            sig_points.push(BLSSignature::from_bytes(&signature.signature)?);
            key_points.push(BLSPublicKey::from_bytes(&signature.public_key)?);
        }

        if sig_points.is_empty() {
            return Err(AggregationError::NoSignatures);
        }

        let sig_refs: Vec<&BLSSignature> = sig_points.iter().collect();
        let key_refs: Vec<&BLSPublicKey> = key_points.iter().collect();
        let aggregated_signature = aggregate_signatures(&sig_refs)?;
        let aggregated_key = aggregate_public_keys(&key_refs)?;

        let entries = canonical_entries(set, key_tag)?;
        let non_signers: Vec<u32> = entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| !signed[entry.validator_index])
            .map(|(position, _)| position as u32)
            .collect();

        let block = encode_block(&entries);
        let mut payload =
            Vec::with_capacity(HEADER_SIZE + block.len() + non_signers.len() * NON_SIGNER_INDEX_SIZE);
        payload.extend_from_slice(&aggregated_signature.to_bytes());
        payload.extend_from_slice(&aggregated_key.to_bytes());
        payload.extend_from_slice(&block);
        for position in &non_signers {
            payload.extend_from_slice(&position.to_be_bytes());
        }

        Ok(AggregationProof {
            verification_type: VerificationType::Bls,
            message_hash: *message_hash,
            proof: payload,
        })
    }

    /// Check an untrusted proof against the current validator set.
    ///
    /// Malformed encodings, stale validator data, short voting power and a
    /// failed pairing all come back as `Ok(false)`; errors are reserved for
    /// broken local state (a malformed key registered in our own set).
    pub fn verify(
        &self,
        set: &ValidatorSet,
        key_tag: KeyTag,
        proof: &AggregationProof,
    ) -> Result<bool> {
        if key_tag != KeyTag::Bls {
            return Err(AggregationError::UnsupportedKeyTag(key_tag));
        }
        let payload = &proof.proof;
        if payload.len() < HEADER_SIZE + 4 {
            return Ok(false);
        }

        let mut count_bytes = [0u8; 4];
        count_bytes.copy_from_slice(&payload[HEADER_SIZE..HEADER_SIZE + 4]);
        let count = u32::from_be_bytes(count_bytes) as usize;

        let Some(block_len) = count
            .checked_mul(ENTRY_SIZE)
            .and_then(|entries_len| entries_len.checked_add(4))
        else {
            return Ok(false);
        };
        let non_signer_offset = HEADER_SIZE + block_len;
        if payload.len() < non_signer_offset
            || (payload.len() - non_signer_offset) % NON_SIGNER_INDEX_SIZE != 0
        {
            return Ok(false);
        }

        // The embedded validator data must match what this node derives from
        // the current set; a set change between aggregation and verification
        // invalidates the proof.
        let entries = canonical_entries(set, key_tag)?;
        let block = encode_block(&entries);
        let embedded = &payload[HEADER_SIZE..non_signer_offset];
        if hash_data(&block) != hash_data(embedded) {
            return Ok(false);
        }

        // Non-signer positions: strictly ascending, in range
        let mut non_signers: Vec<usize> = Vec::new();
        for chunk in payload[non_signer_offset..].chunks_exact(NON_SIGNER_INDEX_SIZE) {
            let mut index_bytes = [0u8; 4];
            index_bytes.copy_from_slice(chunk);
            let position = u32::from_be_bytes(index_bytes) as usize;
            if position >= count {
                return Ok(false);
            }
            if let Some(&last) = non_signers.last() {
                if position <= last {
                    return Ok(false);
                }
            }
            non_signers.push(position);
        }

        let non_signer_set: HashSet<usize> = non_signers.iter().copied().collect();
        let total_power: u128 = entries.iter().map(|e| e.voting_power).sum();
        let absent_power: u128 = non_signers
            .iter()
            .map(|position| entries[*position].voting_power)
            .sum();
        let signer_power = total_power - absent_power;
        if signer_power < set.quorum_threshold {
            return Ok(false);
        }

        // Effective aggregate key: everyone in the canonical block minus the
        // non-signers, rebuilt from registered keys only.
        let mut signer_keys: Vec<BLSPublicKey> = Vec::new();
        for (position, entry) in entries.iter().enumerate() {
            if non_signer_set.contains(&position) {
                continue;
            }
            signer_keys.push(
                BLSPublicKey::from_bytes(&entry.key).map_err(|_| AggregationError::InvalidKey)?,
            );
        }
        if signer_keys.is_empty() {
            return Ok(false);
        }
        let key_refs: Vec<&BLSPublicKey> = signer_keys.iter().collect();
        let effective_key = aggregate_public_keys(&key_refs)?;
        if effective_key.to_bytes() != payload[BLS_SIGNATURE_SIZE..HEADER_SIZE] {
            return Ok(false);
        }

        let Ok(aggregated_signature) = BLSSignature::from_bytes(&payload[..BLS_SIGNATURE_SIZE])
        else {
            return Ok(false);
        };

        Ok(aggregated_signature.verify(proof.message_hash.as_bytes(), &effective_key))
    }

    /// Per-key-tag commitments consumed by the settlement layer: the hash of
    /// the canonical validator-data block and, for BLS keys, the compressed
    /// aggregate public key over the whole active set.
    pub fn generate_extra_data(
        &self,
        set: &ValidatorSet,
        key_tags: &[KeyTag],
    ) -> Result<Vec<ExtraDataEntry>> {
        let mut out = Vec::new();
        for &tag in key_tags {
            if tag != KeyTag::Bls {
                continue;
            }
            let entries = canonical_entries(set, tag)?;
            if entries.is_empty() {
                continue;
            }
            let block = encode_block(&entries);
            out.push(ExtraDataEntry {
                key: hash_domain(
                    b"sidecar/extra-data/validator-set-hash",
                    &[&set.epoch.to_be_bytes(), &[tag.as_u8()]],
                ),
                value: hash_data(&block).to_vec(),
            });

            let keys: Vec<BLSPublicKey> = entries
                .iter()
                .map(|entry| {
                    BLSPublicKey::from_bytes(&entry.key).map_err(|_| AggregationError::InvalidKey)
                })
                .collect::<Result<_>>()?;
            let key_refs: Vec<&BLSPublicKey> = keys.iter().collect();
            out.push(ExtraDataEntry {
                key: hash_domain(
                    b"sidecar/extra-data/aggregate-key",
                    &[&set.epoch.to_be_bytes(), &[tag.as_u8()]],
                ),
                value: aggregate_public_keys(&key_refs)?.to_bytes(),
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::BLSSecretKey;
    use crate::types::{Address, SetStatus, SignatureRequest, Validator, VaultStake};
    use std::collections::BTreeMap;

    fn build_set(powers: &[u128], threshold: u128) -> (ValidatorSet, Vec<BLSSecretKey>) {
        let mut validators = Vec::new();
        let mut secrets = Vec::new();
        for (i, power) in powers.iter().enumerate() {
            let secret = BLSSecretKey::generate();
            let operator = Address::new([(i + 1) as u8; 20]);
            let mut keys = BTreeMap::new();
            keys.insert(KeyTag::Bls, secret.public_key().to_bytes());
            validators.push(Validator {
                operator,
                voting_power: *power,
                is_active: true,
                keys,
                vaults: vec![VaultStake {
                    vault: operator,
                    voting_power: *power,
                }],
            });
            secrets.push(secret);
        }
        let set = ValidatorSet {
            epoch: 5,
            validators,
            quorum_threshold: threshold,
            required_key_tag: KeyTag::Bls,
            previous_header_hash: Hash::zero(),
            status: SetStatus::Committed,
        };
        (set, secrets)
    }

    fn request() -> SignatureRequest {
        SignatureRequest::new(KeyTag::Bls, 5, b"epoch header".to_vec())
    }

    fn sign(secret: &BLSSecretKey, message_hash: &Hash) -> SignatureExtended {
        SignatureExtended {
            message_hash: *message_hash,
            signature: secret.sign(message_hash.as_bytes()).to_bytes(),
            public_key: secret.public_key().to_bytes(),
        }
    }

    fn signatures_for(
        secrets: &[BLSSecretKey],
        indices: &[usize],
        message_hash: &Hash,
    ) -> Vec<SignatureExtended> {
        indices.iter().map(|i| sign(&secrets[*i], message_hash)).collect()
    }

    #[test]
    fn test_aggregate_then_verify() {
        let (set, secrets) = build_set(&[100, 200, 300, 150], 500);
        let message_hash = request().message_hash();
        let aggregator = BlsAggregator;

        // 200 + 300 = 500 meets quorum exactly
        let sigs = signatures_for(&secrets, &[1, 2], &message_hash);
        let proof = aggregator
            .aggregate(&set, KeyTag::Bls, &message_hash, &sigs)
            .unwrap();

        assert!(aggregator.verify(&set, KeyTag::Bls, &proof).unwrap());
    }

    #[test]
    fn test_below_quorum_is_not_verified() {
        let (set, secrets) = build_set(&[100, 200, 300, 150], 500);
        let message_hash = request().message_hash();
        let aggregator = BlsAggregator;

        // 100 + 200 = 300 < 500: aggregation succeeds, verification says no
        let sigs = signatures_for(&secrets, &[0, 1], &message_hash);
        let proof = aggregator
            .aggregate(&set, KeyTag::Bls, &message_hash, &sigs)
            .unwrap();

        assert!(!aggregator.verify(&set, KeyTag::Bls, &proof).unwrap());

        // A different subset above the threshold still verifies
        let sigs = signatures_for(&secrets, &[0, 2, 3], &message_hash);
        let proof = aggregator
            .aggregate(&set, KeyTag::Bls, &message_hash, &sigs)
            .unwrap();
        assert!(aggregator.verify(&set, KeyTag::Bls, &proof).unwrap());
    }

    #[test]
    fn test_stale_validator_data_is_not_verified() {
        let (set, secrets) = build_set(&[100, 200, 300, 150], 500);
        let message_hash = request().message_hash();
        let aggregator = BlsAggregator;

        let sigs = signatures_for(&secrets, &[1, 2], &message_hash);
        let proof = aggregator
            .aggregate(&set, KeyTag::Bls, &message_hash, &sigs)
            .unwrap();

        // The set changed between aggregation and verification
        let mut changed = set.clone();
        changed.validators[0].voting_power += 1;
        assert!(!aggregator.verify(&changed, KeyTag::Bls, &proof).unwrap());
    }

    #[test]
    fn test_tampered_signature_is_not_verified() {
        let (set, secrets) = build_set(&[100, 200, 300, 150], 500);
        let message_hash = request().message_hash();
        let aggregator = BlsAggregator;

        let sigs = signatures_for(&secrets, &[1, 2, 3], &message_hash);
        let mut proof = aggregator
            .aggregate(&set, KeyTag::Bls, &message_hash, &sigs)
            .unwrap();

        // Swap in a signature over a different message
        let other = secrets[1].sign(b"different message").to_bytes();
        proof.proof[..BLS_SIGNATURE_SIZE].copy_from_slice(&other);

        assert!(!aggregator.verify(&set, KeyTag::Bls, &proof).unwrap());
    }

    #[test]
    fn test_malformed_payloads_are_not_verified() {
        let (set, secrets) = build_set(&[100, 200, 300, 150], 500);
        let message_hash = request().message_hash();
        let aggregator = BlsAggregator;

        let sigs = signatures_for(&secrets, &[1, 2], &message_hash);
        let proof = aggregator
            .aggregate(&set, KeyTag::Bls, &message_hash, &sigs)
            .unwrap();

        // Truncated
        let truncated = AggregationProof {
            proof: proof.proof[..HEADER_SIZE].to_vec(),
            ..proof.clone()
        };
        assert!(!aggregator.verify(&set, KeyTag::Bls, &truncated).unwrap());

        // Trailing garbage breaking the index-section width
        let mut ragged = proof.clone();
        ragged.proof.extend_from_slice(&[0u8; 3]);
        assert!(!aggregator.verify(&set, KeyTag::Bls, &ragged).unwrap());

        // Empty
        let empty = AggregationProof {
            proof: Vec::new(),
            ..proof.clone()
        };
        assert!(!aggregator.verify(&set, KeyTag::Bls, &empty).unwrap());
    }

    #[test]
    fn test_non_signer_indices_must_ascend() {
        let (set, secrets) = build_set(&[100, 200, 300, 150], 100);
        let message_hash = request().message_hash();
        let aggregator = BlsAggregator;

        // Two non-signers so the index section has two entries
        let sigs = signatures_for(&secrets, &[1, 2], &message_hash);
        let proof = aggregator
            .aggregate(&set, KeyTag::Bls, &message_hash, &sigs)
            .unwrap();
        assert!(aggregator.verify(&set, KeyTag::Bls, &proof).unwrap());

        let index_offset = proof.proof.len() - 2 * NON_SIGNER_INDEX_SIZE;
        let mut swapped = proof.clone();
        let (a, b) = (index_offset, index_offset + NON_SIGNER_INDEX_SIZE);
        let first: Vec<u8> = swapped.proof[a..b].to_vec();
        let second: Vec<u8> = swapped.proof[b..].to_vec();
        swapped.proof[a..b].copy_from_slice(&second);
        swapped.proof[b..].copy_from_slice(&first);

        assert!(!aggregator.verify(&set, KeyTag::Bls, &swapped).unwrap());

        // Out-of-range index
        let mut out_of_range = proof.clone();
        let len = out_of_range.proof.len();
        out_of_range.proof[len - NON_SIGNER_INDEX_SIZE..]
            .copy_from_slice(&99u32.to_be_bytes());
        assert!(!aggregator.verify(&set, KeyTag::Bls, &out_of_range).unwrap());
    }

    #[test]
    fn test_duplicate_signer_rejected() {
        let (set, secrets) = build_set(&[100, 200, 300], 100);
        let message_hash = request().message_hash();
        let aggregator = BlsAggregator;

        let sigs = signatures_for(&secrets, &[1, 1], &message_hash);
        let err = aggregator
            .aggregate(&set, KeyTag::Bls, &message_hash, &sigs)
            .unwrap_err();
        assert!(matches!(err, AggregationError::DuplicateSigner(1)));
    }

    #[test]
    fn test_unknown_signer_rejected() {
        let (set, _) = build_set(&[100, 200], 100);
        let message_hash = request().message_hash();
        let aggregator = BlsAggregator;

        let stranger = BLSSecretKey::generate();
        let sigs = vec![sign(&stranger, &message_hash)];
        let err = aggregator
            .aggregate(&set, KeyTag::Bls, &message_hash, &sigs)
            .unwrap_err();
        assert!(matches!(err, AggregationError::UnknownSigner));
    }

    #[test]
    fn test_message_hash_mismatch_rejected() {
        let (set, secrets) = build_set(&[100, 200], 100);
        let message_hash = request().message_hash();
        let aggregator = BlsAggregator;

        let other_hash = hash_data(b"other");
        let sigs = vec![sign(&secrets[0], &other_hash)];
        let err = aggregator
            .aggregate(&set, KeyTag::Bls, &message_hash, &sigs)
            .unwrap_err();
        assert!(matches!(err, AggregationError::MessageHashMismatch));
    }

    #[test]
    fn test_unsorted_set_rejected() {
        let (mut set, secrets) = build_set(&[100, 200], 100);
        set.validators.reverse();
        let message_hash = request().message_hash();
        let aggregator = BlsAggregator;

        let sigs = signatures_for(&secrets, &[0], &message_hash);
        let err = aggregator
            .aggregate(&set, KeyTag::Bls, &message_hash, &sigs)
            .unwrap_err();
        assert!(matches!(err, AggregationError::InvalidValidatorSet(_)));
    }

    #[test]
    fn test_inactive_signatures_skipped() {
        let (mut set, secrets) = build_set(&[100, 200, 300], 300);
        set.validators[0].is_active = false;
        let message_hash = request().message_hash();
        let aggregator = BlsAggregator;

        // The inactive validator signs too, but contributes nothing
        let sigs = signatures_for(&secrets, &[0, 1, 2], &message_hash);
        let proof = aggregator
            .aggregate(&set, KeyTag::Bls, &message_hash, &sigs)
            .unwrap();

        // 200 + 300 = 500 >= 300, counted over active validators only
        assert!(aggregator.verify(&set, KeyTag::Bls, &proof).unwrap());
    }

    #[test]
    fn test_non_bls_tag_unsupported() {
        let (set, _) = build_set(&[100], 100);
        let message_hash = request().message_hash();
        let aggregator = BlsAggregator;

        let err = aggregator
            .aggregate(&set, KeyTag::Ecdsa, &message_hash, &[])
            .unwrap_err();
        assert!(matches!(err, AggregationError::UnsupportedKeyTag(KeyTag::Ecdsa)));
    }

    #[test]
    fn test_extra_data_entries() {
        let (set, _) = build_set(&[100, 200], 100);
        let aggregator = BlsAggregator;

        let entries = aggregator
            .generate_extra_data(&set, &[KeyTag::Bls, KeyTag::Ecdsa])
            .unwrap();

        // Validator-data hash + aggregate key, for the BLS tag only
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].value.len(), 32);
        assert_eq!(entries[1].value.len(), BLS_PUBLIC_KEY_SIZE);

        // Deterministic
        let again = aggregator
            .generate_extra_data(&set, &[KeyTag::Bls])
            .unwrap();
        assert_eq!(entries, again);
    }
}
