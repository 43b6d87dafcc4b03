/// Local signing keys
///
/// A node holds one secret key per key tag it participates in, plus its
/// operator identity. Key material loads from a JSON keystore on disk;
/// `generate` produces a fresh signer for tests and bootstrap tooling.

use crate::crypto::{BLSSecretKey, ECDSASecretKey};
use crate::types::{Address, KeyTag, OperatorId, SignatureExtended, SignatureRequest};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignerError {
    #[error("No local key for tag {0}")]
    UnsupportedKeyTag(KeyTag),

    #[error("Keystore I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Keystore format error: {0}")]
    Format(#[from] serde_json::Error),

    #[error("Keystore field {0} is not valid hex")]
    InvalidHex(&'static str),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),
}

pub type Result<T> = std::result::Result<T, SignerError>;

/// On-disk keystore layout (all fields hex-encoded)
#[derive(Serialize, Deserialize)]
struct KeystoreFile {
    operator: String,
    bls_secret: String,
    ecdsa_secret: String,
}

/// The node's signing identity
pub struct LocalSigner {
    operator: OperatorId,
    bls: BLSSecretKey,
    ecdsa: ECDSASecretKey,
}

impl LocalSigner {
    /// Fresh random keys for the given operator
    pub fn generate(operator: OperatorId) -> Self {
        Self {
            operator,
            bls: BLSSecretKey::generate(),
            ecdsa: ECDSASecretKey::generate(),
        }
    }

    /// Load keys from a JSON keystore file
    pub fn from_keystore(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let file: KeystoreFile = serde_json::from_str(&raw)?;

        let operator_bytes =
            hex::decode(&file.operator).map_err(|_| SignerError::InvalidHex("operator"))?;
        let operator = Address::from_slice(&operator_bytes)
            .map_err(|e| SignerError::InvalidKey(e.to_string()))?;

        let bls_bytes =
            hex::decode(&file.bls_secret).map_err(|_| SignerError::InvalidHex("bls_secret"))?;
        let bls = BLSSecretKey::from_bytes(&bls_bytes)
            .map_err(|e| SignerError::InvalidKey(e.to_string()))?;

        let ecdsa_bytes =
            hex::decode(&file.ecdsa_secret).map_err(|_| SignerError::InvalidHex("ecdsa_secret"))?;
        let ecdsa = ECDSASecretKey::from_bytes(&ecdsa_bytes)
            .map_err(|e| SignerError::InvalidKey(e.to_string()))?;

        Ok(Self { operator, bls, ecdsa })
    }

    /// Write keys to a JSON keystore file
    pub fn save_keystore(&self, path: &Path) -> Result<()> {
        let file = KeystoreFile {
            operator: hex::encode(self.operator.as_bytes()),
            bls_secret: hex::encode(self.bls.to_bytes()),
            ecdsa_secret: hex::encode(self.ecdsa.to_bytes()),
        };
        std::fs::write(path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    pub fn operator(&self) -> &OperatorId {
        &self.operator
    }

    /// Compact public key registered for a tag, as it appears in the
    /// validator set
    pub fn public_key(&self, key_tag: KeyTag) -> Result<Vec<u8>> {
        match key_tag {
            KeyTag::Bls => Ok(self.bls.public_key().to_bytes()),
            KeyTag::Ecdsa => Ok(self.ecdsa.public_key().to_bytes()),
            KeyTag::Zk => Err(SignerError::UnsupportedKeyTag(key_tag)),
        }
    }

    /// Sign the request's message hash with the key for its tag
    pub fn sign_request(&self, request: &SignatureRequest) -> Result<SignatureExtended> {
        let message_hash = request.message_hash();
        match request.key_tag {
            KeyTag::Bls => Ok(SignatureExtended {
                message_hash,
                signature: self.bls.sign(message_hash.as_bytes()).to_bytes(),
                public_key: self.bls.public_key().to_bytes(),
            }),
            KeyTag::Ecdsa => Ok(SignatureExtended {
                message_hash,
                signature: self.ecdsa.sign(message_hash.as_bytes()).to_bytes(),
                public_key: self.ecdsa.public_key().to_bytes(),
            }),
            KeyTag::Zk => Err(SignerError::UnsupportedKeyTag(KeyTag::Zk)),
        }
    }
}
