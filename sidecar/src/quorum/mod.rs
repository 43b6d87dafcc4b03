/// Per-request quorum bookkeeping
///
/// Tracks which validators have signed a request (by positional index into
/// the epoch's active validator list) and the voting power contributed so
/// far. Bit i set means the power of validator i was added exactly once; the
/// running sum always equals the total of contributed per-validator powers.
///
/// Trackers carry no locking of their own; all mutation happens under the
/// per-request advisory lock inside a storage transaction.

use crate::crypto::Hash;
use crate::types::RequestId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum QuorumError {
    #[error("Validator {index} already recorded for request {request}")]
    AlreadyExists { request: Hash, index: u32 },
    #[error("Validator index {index} out of range (total {total})")]
    IndexOutOfRange { index: u32, total: u32 },
}

/// Test a bit in a packed little-endian bitmap
pub fn bit(bitmap: &[u8], index: u32) -> bool {
    let byte = (index / 8) as usize;
    byte < bitmap.len() && bitmap[byte] & (1 << (index % 8)) != 0
}

/// Set a bit in a packed bitmap, growing it as needed
pub fn set_bit(bitmap: &mut Vec<u8>, index: u32) {
    let byte = (index / 8) as usize;
    if byte >= bitmap.len() {
        bitmap.resize(byte + 1, 0);
    }
    bitmap[byte] |= 1 << (index % 8);
}

/// Number of bytes needed to hold `total` bits
pub fn bitmap_len(total: u32) -> usize {
    total.div_ceil(8) as usize
}

/// Indices of all set bits below `total`
pub fn bitmap_indices(bitmap: &[u8], total: u32) -> Vec<u32> {
    (0..total).filter(|i| bit(bitmap, *i)).collect()
}

/// Quorum state for one signature request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumTracker {
    request_id: RequestId,
    epoch: u64,
    /// Packed bitmap over positional validator indices
    bitmap: Vec<u8>,
    /// Running sum of contributed voting power
    voting_power: u128,
    /// Active validator count at snapshot time
    total_validators: u32,
}

impl QuorumTracker {
    /// Zero-initialized tracker sized for `total_validators` bit positions
    pub fn new(request_id: RequestId, epoch: u64, total_validators: u32) -> Self {
        Self {
            request_id,
            epoch,
            bitmap: vec![0u8; bitmap_len(total_validators)],
            voting_power: 0,
            total_validators,
        }
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn voting_power(&self) -> u128 {
        self.voting_power
    }

    pub fn total_validators(&self) -> u32 {
        self.total_validators
    }

    /// Record a validator's signature and add its voting power.
    ///
    /// Fails with `AlreadyExists` on a repeated index, leaving the sum
    /// unchanged; that is the duplicate-protection callers propagate.
    pub fn set_validator_present(&mut self, index: u32, voting_power: u128) -> Result<(), QuorumError> {
        if index >= self.total_validators {
            return Err(QuorumError::IndexOutOfRange {
                index,
                total: self.total_validators,
            });
        }
        if bit(&self.bitmap, index) {
            return Err(QuorumError::AlreadyExists {
                request: self.request_id,
                index,
            });
        }
        set_bit(&mut self.bitmap, index);
        self.voting_power += voting_power;
        Ok(())
    }

    pub fn contains(&self, index: u32) -> bool {
        bit(&self.bitmap, index)
    }

    /// Quorum holds once accumulated power reaches the threshold; equality counts
    pub fn threshold_reached(&self, quorum_threshold: u128) -> bool {
        self.voting_power >= quorum_threshold
    }

    /// Complement bitmap of validators that have not signed yet; drives
    /// gossip want-requests
    pub fn missing_validators(&self) -> Vec<u8> {
        let mut missing = vec![0u8; bitmap_len(self.total_validators)];
        for index in 0..self.total_validators {
            if !bit(&self.bitmap, index) {
                set_bit(&mut missing, index);
            }
        }
        missing
    }

    pub fn signer_indices(&self) -> Vec<u32> {
        bitmap_indices(&self.bitmap, self.total_validators)
    }

    pub fn missing_indices(&self) -> Vec<u32> {
        (0..self.total_validators)
            .filter(|i| !bit(&self.bitmap, *i))
            .collect()
    }

    pub fn signer_count(&self) -> u32 {
        self.signer_indices().len() as u32
    }

    /// Every active validator has signed (completion condition for
    /// non-aggregation key tags)
    pub fn all_present(&self) -> bool {
        self.signer_count() == self.total_validators
    }
}
