// Gossipsub wiring for the sidecar topics.
//
// The swarm and connection lifecycle are owned by the daemon; this module
// builds the behaviour (gossipsub + identify) and encodes/decodes the
// payloads published on each topic.

use super::types::GossipMessage;
use super::{NetworkError, NetworkResult};
use libp2p::{
    gossipsub::{
        Behaviour as GossipsubBehaviour, ConfigBuilder as GossipsubConfigBuilder, IdentTopic,
        Message, MessageAuthenticity, MessageId,
    },
    identify::{Behaviour as IdentifyBehaviour, Config as IdentifyConfig},
};
use tracing::info;

/// Gossip topic names
pub const TOPIC_SIGNATURES: &str = "sidecar/signatures/1.0.0";
pub const TOPIC_AGGREGATIONS: &str = "sidecar/aggregations/1.0.0";
pub const TOPIC_SYNC: &str = "sidecar/sync/1.0.0";

/// Network behaviour combining gossipsub and identify protocols
#[derive(libp2p::swarm::NetworkBehaviour)]
pub struct Behaviour {
    /// Gossipsub for message broadcasting
    pub gossipsub: GossipsubBehaviour,

    /// Identify protocol for peer information
    pub identify: IdentifyBehaviour,
}

/// Content-addressed message id, so identical payloads dedupe regardless of
/// publisher
pub fn message_id(message: &Message) -> MessageId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&message.data);
    MessageId::from(hasher.finalize().as_bytes().to_vec())
}

/// Create the network behaviour with the node's identity keypair
pub fn create_behaviour(local_key: &libp2p::identity::Keypair) -> NetworkResult<Behaviour> {
    let gossipsub_config = GossipsubConfigBuilder::default()
        .message_id_fn(message_id)
        .build()
        .map_err(|e| NetworkError::GossipsubError(format!("Failed to build config: {}", e)))?;

    let mut gossipsub = GossipsubBehaviour::new(
        MessageAuthenticity::Signed(local_key.clone()),
        gossipsub_config,
    )
    .map_err(|e| NetworkError::GossipsubError(format!("Failed to create gossipsub: {}", e)))?;

    for topic in [TOPIC_SIGNATURES, TOPIC_AGGREGATIONS, TOPIC_SYNC] {
        gossipsub
            .subscribe(&IdentTopic::new(topic))
            .map_err(|e| NetworkError::GossipsubError(format!("Failed to subscribe: {}", e)))?;
    }

    info!("Subscribed to gossipsub topics: signatures, aggregations, sync");

    let identify = IdentifyBehaviour::new(IdentifyConfig::new(
        "sidecar/1.0.0".to_string(),
        local_key.public(),
    ));

    Ok(Behaviour {
        gossipsub,
        identify,
    })
}

/// Topic a message belongs on
pub fn topic_for(message: &GossipMessage) -> IdentTopic {
    match message {
        GossipMessage::Signature(_) => IdentTopic::new(TOPIC_SIGNATURES),
        GossipMessage::Aggregation(_) => IdentTopic::new(TOPIC_AGGREGATIONS),
        _ => IdentTopic::new(TOPIC_SYNC),
    }
}

/// Encode a message for publishing
pub fn encode(message: &GossipMessage) -> NetworkResult<Vec<u8>> {
    message
        .to_bytes()
        .map_err(|e| NetworkError::SerializationError(e.to_string()))
}

/// Decode a received payload
pub fn decode(bytes: &[u8]) -> NetworkResult<GossipMessage> {
    GossipMessage::from_bytes(bytes)
        .map_err(|e| NetworkError::SerializationError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash_data;
    use crate::network::types::WantAggregationProofsRequest;

    #[test]
    fn test_create_behaviour() {
        let keypair = libp2p::identity::Keypair::generate_ed25519();
        assert!(create_behaviour(&keypair).is_ok());
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let msg = GossipMessage::WantProofs(WantAggregationProofsRequest {
            request_hashes: vec![hash_data(b"a"), hash_data(b"b")],
        });

        let bytes = encode(&msg).unwrap();
        assert_eq!(decode(&bytes).unwrap(), msg);
        assert_eq!(topic_for(&msg).to_string(), TOPIC_SYNC);
    }

    #[test]
    fn test_identical_payloads_share_message_id() {
        use libp2p::gossipsub::{Message, TopicHash};

        let make = |data: Vec<u8>| Message {
            source: None,
            data,
            sequence_number: None,
            topic: TopicHash::from_raw(TOPIC_SIGNATURES),
        };

        let a = message_id(&make(vec![1, 2, 3]));
        let b = message_id(&make(vec![1, 2, 3]));
        let c = message_id(&make(vec![9, 9, 9]));

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
