/// Quorum attestation sidecar engine
///
/// A validator-set sidecar that turns per-validator signatures over external
/// ledger snapshots into compact, chain-verifiable quorum proofs:
/// - BLS multi-signature aggregation with an on-chain-compatible proof layout
/// - Transactional quorum bookkeeping with exactly-once decisions
/// - Bounded gossip reconciliation for nodes that missed messages

pub mod aggregation;
pub mod crypto;
pub mod network;
pub mod orchestrator;
pub mod provider;
pub mod quorum;
pub mod signer;
pub mod storage;
pub mod sync;
pub mod types;

pub use aggregation::AggregationScheme;
pub use crypto::Hash;
pub use orchestrator::SignatureManager;
pub use provider::ValidatorSetProvider;
pub use quorum::QuorumTracker;
pub use signer::LocalSigner;
pub use storage::{LockTable, Store};
pub use sync::GossipSync;
pub use types::{
    AggregationProof, KeyTag, SignatureExtended, SignatureRequest, ValidatorSet, VerificationType,
};
