/// ECDSA signatures for the non-aggregation key tag
///
/// Uses secp256k1 (Bitcoin/Ethereum compatible). ECDSA signatures cannot be
/// combined homomorphically, so requests signed under this tag collect every
/// validator's raw signature instead of a compact proof.

use k256::ecdsa::{
    signature::{Signer, Verifier},
    Signature as K256Signature, SigningKey, VerifyingKey,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ECDSAError {
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Invalid key")]
    InvalidKey,
}

/// ECDSA secret key (secp256k1)
#[derive(Clone)]
pub struct ECDSASecretKey {
    inner: SigningKey,
}

impl ECDSASecretKey {
    /// Generate a new random secret key
    pub fn generate() -> Self {
        let inner = SigningKey::random(&mut rand::thread_rng());
        Self { inner }
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ECDSAError> {
        let inner = SigningKey::from_slice(bytes).map_err(|_| ECDSAError::InvalidKey)?;
        Ok(Self { inner })
    }

    /// Get the corresponding public key
    pub fn public_key(&self) -> ECDSAPublicKey {
        ECDSAPublicKey {
            inner: *self.inner.verifying_key(),
        }
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        self.inner.to_bytes().to_vec()
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> ECDSASignature {
        let signature: K256Signature = self.inner.sign(message);
        ECDSASignature { inner: signature }
    }
}

/// ECDSA public key (secp256k1, SEC1 compressed encoding)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ECDSAPublicKey {
    inner: VerifyingKey,
}

impl ECDSAPublicKey {
    /// Create from SEC1-encoded bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ECDSAError> {
        let inner = VerifyingKey::from_sec1_bytes(bytes).map_err(|_| ECDSAError::InvalidKey)?;
        Ok(Self { inner })
    }

    /// Serialize to SEC1 compressed bytes (33 bytes)
    pub fn to_bytes(&self) -> Vec<u8> {
        self.inner.to_sec1_bytes().to_vec()
    }

    /// Verify a signature over `message`
    pub fn verify(&self, message: &[u8], signature: &ECDSASignature) -> bool {
        self.inner.verify(message, &signature.inner).is_ok()
    }
}

/// ECDSA signature (fixed 64-byte encoding)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ECDSASignature {
    inner: K256Signature,
}

impl ECDSASignature {
    /// Create from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ECDSAError> {
        let inner = K256Signature::from_slice(bytes).map_err(|_| ECDSAError::InvalidSignature)?;
        Ok(Self { inner })
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        self.inner.to_bytes().to_vec()
    }
}
