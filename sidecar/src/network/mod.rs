/// Network surface of the sidecar
///
/// Message shapes and gossipsub behaviour construction. Everything that
/// actually drives a swarm (dialing, handshakes, event loops) belongs to the
/// daemon around the engine.

pub mod gossip;
pub mod types;

use thiserror::Error;

pub use gossip::{create_behaviour, Behaviour, TOPIC_AGGREGATIONS, TOPIC_SIGNATURES, TOPIC_SYNC};
pub use types::{
    AggregatedSignatureMessage, GossipMessage, SignatureMessage, WantAggregationProofsRequest,
    WantAggregationProofsResponse, WantSignaturesRequest, WantSignaturesResponse,
};

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Gossipsub error: {0}")]
    GossipsubError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type NetworkResult<T> = std::result::Result<T, NetworkError>;
