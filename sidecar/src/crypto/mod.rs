/// Cryptography module for the sidecar
///
/// Implements:
/// - BLS signatures on BLS12-381 (aggregation-capable key tag)
/// - ECDSA signatures on secp256k1 (non-aggregation key tag)
/// - Hash functions (SHA-256 / BLAKE3) and domain-separated hashing

pub mod bls;
pub mod ecdsa;
pub mod hash;

pub use bls::{
    aggregate_public_keys, aggregate_signatures, BLSPublicKey, BLSSecretKey, BLSSignature,
    BLS_PUBLIC_KEY_SIZE, BLS_SIGNATURE_SIZE,
};
pub use ecdsa::{ECDSAPublicKey, ECDSASecretKey, ECDSASignature};
pub use hash::{hash_data, hash_data_with, hash_domain, Hash, HashFunction, HASH_SIZE};
