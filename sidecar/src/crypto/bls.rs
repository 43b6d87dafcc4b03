/// BLS signatures over BLS12-381 (min_pk: public keys in G1, signatures in G2)
///
/// Provides:
/// - Compact 48-byte compressed public keys (x-coordinate plus parity flag)
/// - 96-byte compressed signatures
/// - Homomorphic aggregation of both signatures and public keys

use blst::min_pk::{
    AggregatePublicKey, AggregateSignature, PublicKey as BlstPublicKey,
    SecretKey as BlstSecretKey, Signature as BlstSignature,
};
use thiserror::Error;

pub const BLS_SIGNATURE_SIZE: usize = 96;
pub const BLS_PUBLIC_KEY_SIZE: usize = 48;
pub const BLS_SECRET_KEY_SIZE: usize = 32;

/// Ciphersuite domain separation tag for hashing messages to G2
pub const BLS_DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_NUL_";

#[derive(Error, Debug)]
pub enum BLSError {
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Invalid key")]
    InvalidKey,
    #[error("Nothing to aggregate")]
    EmptyAggregation,
}

/// BLS secret key wrapper
#[derive(Clone)]
pub struct BLSSecretKey {
    inner: BlstSecretKey,
}

impl BLSSecretKey {
    /// Generate a new random secret key
    pub fn generate() -> Self {
        let mut ikm = [0u8; 32];
        rand::Rng::fill(&mut rand::thread_rng(), &mut ikm);

        Self {
            // key_gen only fails on short ikm
            inner: BlstSecretKey::key_gen(&ikm, &[]).unwrap(),
        }
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BLSError> {
        let inner = BlstSecretKey::from_bytes(bytes).map_err(|_| BLSError::InvalidKey)?;
        Ok(Self { inner })
    }

    /// Serialize to bytes (32 bytes)
    pub fn to_bytes(&self) -> Vec<u8> {
        self.inner.to_bytes().to_vec()
    }

    /// Get the corresponding public key
    pub fn public_key(&self) -> BLSPublicKey {
        BLSPublicKey {
            inner: self.inner.sk_to_pk(),
        }
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> BLSSignature {
        BLSSignature {
            inner: self.inner.sign(message, BLS_DST, &[]),
        }
    }
}

/// BLS public key wrapper (compressed form is 48 bytes)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BLSPublicKey {
    inner: BlstPublicKey,
}

impl BLSPublicKey {
    /// Decompress from the canonical 48-byte encoding
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BLSError> {
        let inner = BlstPublicKey::from_bytes(bytes).map_err(|_| BLSError::InvalidKey)?;
        // Reject points outside the prime-order subgroup
        inner.validate().map_err(|_| BLSError::InvalidKey)?;
        Ok(Self { inner })
    }

    /// Compress to the canonical 48-byte encoding
    pub fn to_bytes(&self) -> Vec<u8> {
        self.inner.compress().to_vec()
    }
}

/// BLS signature wrapper (compressed form is 96 bytes)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BLSSignature {
    inner: BlstSignature,
}

impl BLSSignature {
    /// Decompress from the canonical 96-byte encoding
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BLSError> {
        let inner = BlstSignature::from_bytes(bytes).map_err(|_| BLSError::InvalidSignature)?;
        Ok(Self { inner })
    }

    /// Compress to the canonical 96-byte encoding
    pub fn to_bytes(&self) -> Vec<u8> {
        self.inner.compress().to_vec()
    }

    /// Verify this signature over `message` under `public_key` (one pairing check)
    pub fn verify(&self, message: &[u8], public_key: &BLSPublicKey) -> bool {
        let result = self
            .inner
            .verify(true, message, BLS_DST, &[], &public_key.inner, true);
        result == blst::BLST_ERROR::BLST_SUCCESS
    }
}

/// Aggregate signatures by elliptic-curve point addition
pub fn aggregate_signatures(signatures: &[&BLSSignature]) -> Result<BLSSignature, BLSError> {
    if signatures.is_empty() {
        return Err(BLSError::EmptyAggregation);
    }
    let sigs: Vec<&BlstSignature> = signatures.iter().map(|s| &s.inner).collect();
    let combined = AggregateSignature::aggregate(&sigs, false)
        .map_err(|_| BLSError::InvalidSignature)?
        .to_signature();
    Ok(BLSSignature { inner: combined })
}

/// Aggregate public keys by elliptic-curve point addition
pub fn aggregate_public_keys(keys: &[&BLSPublicKey]) -> Result<BLSPublicKey, BLSError> {
    if keys.is_empty() {
        return Err(BLSError::EmptyAggregation);
    }
    let pks: Vec<&BlstPublicKey> = keys.iter().map(|k| &k.inner).collect();
    let combined = AggregatePublicKey::aggregate(&pks, false)
        .map_err(|_| BLSError::InvalidKey)?
        .to_public_key();
    Ok(BLSPublicKey { inner: combined })
}
