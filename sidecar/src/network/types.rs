// Gossip message shapes exchanged at the P2P boundary.
//
// The transport (gossipsub wiring, handshakes, peer scoring) lives outside
// the engine; these are the payloads it carries, bincode-encoded.

use crate::types::{AggregationProof, KeyTag, RequestId, SignatureExtended};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One validator's signature, broadcast as it is produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureMessage {
    pub request_hash: RequestId,
    pub key_tag: KeyTag,
    pub epoch: u64,
    pub signature: SignatureExtended,
}

/// A finished aggregation proof, broadcast once quorum is reached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedSignatureMessage {
    pub request_hash: RequestId,
    pub key_tag: KeyTag,
    pub epoch: u64,
    pub proof: AggregationProof,
}

/// "Send me these validators' signatures": per request, a bitmap of the
/// positional indices this node is missing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WantSignaturesRequest {
    pub wants: BTreeMap<RequestId, Vec<u8>>,
}

/// Reply: per request, the (index, signature) pairs the peer had on hand
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WantSignaturesResponse {
    pub signatures: BTreeMap<RequestId, Vec<(u32, SignatureExtended)>>,
}

impl WantSignaturesResponse {
    pub fn total_signatures(&self) -> usize {
        self.signatures.values().map(|items| items.len()).sum()
    }
}

/// "Send me proofs for these requests"
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WantAggregationProofsRequest {
    pub request_hashes: Vec<RequestId>,
}

/// Reply: whichever requested proofs exist on the peer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WantAggregationProofsResponse {
    pub proofs: BTreeMap<RequestId, AggregationProof>,
}

/// Envelope for everything the sidecar gossips
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GossipMessage {
    Signature(SignatureMessage),
    Aggregation(AggregatedSignatureMessage),
    WantSignatures(WantSignaturesRequest),
    WantSignaturesReply(WantSignaturesResponse),
    WantProofs(WantAggregationProofsRequest),
    WantProofsReply(WantAggregationProofsResponse),
}

impl GossipMessage {
    /// Serialize message to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize message from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }

    /// Get message type as string (for logging)
    pub fn message_type(&self) -> &str {
        match self {
            GossipMessage::Signature { .. } => "Signature",
            GossipMessage::Aggregation { .. } => "Aggregation",
            GossipMessage::WantSignatures { .. } => "WantSignatures",
            GossipMessage::WantSignaturesReply { .. } => "WantSignaturesReply",
            GossipMessage::WantProofs { .. } => "WantProofs",
            GossipMessage::WantProofsReply { .. } => "WantProofsReply",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash_data;
    use crate::types::VerificationType;

    fn signature() -> SignatureExtended {
        SignatureExtended {
            message_hash: hash_data(b"msg"),
            signature: vec![1; 96],
            public_key: vec![2; 48],
        }
    }

    #[test]
    fn test_signature_message_roundtrip() {
        let msg = GossipMessage::Signature(SignatureMessage {
            request_hash: hash_data(b"request"),
            key_tag: KeyTag::Bls,
            epoch: 9,
            signature: signature(),
        });

        let bytes = msg.to_bytes().unwrap();
        let decoded = GossipMessage::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.message_type(), "Signature");
    }

    #[test]
    fn test_aggregation_message_roundtrip() {
        let msg = GossipMessage::Aggregation(AggregatedSignatureMessage {
            request_hash: hash_data(b"request"),
            key_tag: KeyTag::Bls,
            epoch: 9,
            proof: AggregationProof {
                verification_type: VerificationType::Bls,
                message_hash: hash_data(b"msg"),
                proof: vec![7; 200],
            },
        });

        let bytes = msg.to_bytes().unwrap();
        assert_eq!(GossipMessage::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_want_messages_roundtrip() {
        let mut wants = WantSignaturesRequest::default();
        wants.wants.insert(hash_data(b"a"), vec![0b0000_0101]);

        let bytes = GossipMessage::WantSignatures(wants.clone())
            .to_bytes()
            .unwrap();
        match GossipMessage::from_bytes(&bytes).unwrap() {
            GossipMessage::WantSignatures(decoded) => assert_eq!(decoded, wants),
            other => panic!("wrong variant: {}", other.message_type()),
        }
    }

    #[test]
    fn test_garbage_bytes_rejected() {
        assert!(GossipMessage::from_bytes(&[0xff; 16]).is_err());
    }

    #[test]
    fn test_response_counts_span_requests() {
        let mut response = WantSignaturesResponse::default();
        response
            .signatures
            .insert(hash_data(b"a"), vec![(0, signature()), (1, signature())]);
        response.signatures.insert(hash_data(b"b"), vec![(2, signature())]);

        assert_eq!(response.total_signatures(), 3);
    }
}
