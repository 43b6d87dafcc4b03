/// Transactional storage for quorum state
///
/// Built on RocksDB optimistic transactions with one column family per
/// record type. `update` runs a closure inside a transaction and commits,
/// retrying a bounded number of times on optimistic conflicts; `view` runs a
/// read-only closure. All typed accessors hang off the transaction handle,
/// so a helper called from inside an open transaction naturally reuses it,
/// and records that describe one logical event are always written atomically.

use crate::quorum::QuorumTracker;
use crate::types::{
    AggregationProof, KeyTag, NetworkConfig, RequestId, SignatureExtended, SignatureRequest,
    ValidatorSet,
};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, ErrorKind, IteratorMode,
    OptimisticTransactionDB, Options, Transaction,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

pub mod locks;
pub mod pruning;

pub use locks::{LockKey, LockTable};
pub use pruning::{Pruner, PruningConfig, RetentionPolicy};

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rocksdb::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Entity not found: {0}")]
    NotFound(&'static str),

    #[error("Entity already exists: {0}")]
    AlreadyExists(&'static str),

    #[error("Transaction conflict persisted after {0} attempts")]
    Conflict(u32),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Column family names
const CF_SIGNATURES: &str = "signatures";
const CF_SIGNATURE_MAPS: &str = "signature_maps";
const CF_AGGREGATION_PROOFS: &str = "aggregation_proofs";
const CF_SIGNATURE_REQUESTS: &str = "signature_requests";
const CF_PENDING_SIGNATURES: &str = "signature_request_pending";
const CF_PENDING_PROOFS: &str = "aggregation_proof_pending";
const CF_REQUEST_EPOCHS: &str = "request_epochs";
const CF_VALIDATOR_SETS: &str = "validator_sets";
const CF_NETWORK_CONFIGS: &str = "network_configs";
const CF_METADATA: &str = "metadata";

const ALL_CFS: &[&str] = &[
    CF_SIGNATURES,
    CF_SIGNATURE_MAPS,
    CF_AGGREGATION_PROOFS,
    CF_SIGNATURE_REQUESTS,
    CF_PENDING_SIGNATURES,
    CF_PENDING_PROOFS,
    CF_REQUEST_EPOCHS,
    CF_VALIDATOR_SETS,
    CF_NETWORK_CONFIGS,
    CF_METADATA,
];

/// Metadata keys
const KEY_LATEST_EPOCH: &[u8] = b"latest_epoch";
const KEY_PRUNED_FLOOR: &[u8] = b"pruned_epoch_floor";

/// Commit retry budget for optimistic conflicts
const MAX_TX_RETRIES: u32 = 8;

fn is_conflict(error: &rocksdb::Error) -> bool {
    matches!(error.kind(), ErrorKind::Busy | ErrorKind::TryAgain)
}

/// Signature key: request hash followed by the big-endian validator index,
/// so per-request signatures iterate in numeric order
fn signature_key(request: &RequestId, index: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(36);
    key.extend_from_slice(request.as_bytes());
    key.extend_from_slice(&index.to_be_bytes());
    key
}

/// Epoch-scoped key: big-endian epoch followed by the request hash, so
/// range scans walk epochs in ascending order
fn epoch_key(epoch: u64, request: &RequestId) -> Vec<u8> {
    let mut key = Vec::with_capacity(40);
    key.extend_from_slice(&epoch.to_be_bytes());
    key.extend_from_slice(request.as_bytes());
    key
}

fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Main storage handle
pub struct Store {
    db: OptimisticTransactionDB,
    _temp: Option<tempfile::TempDir>,
}

impl Store {
    /// Open (or create) a store at the given path
    pub fn open(path: &Path) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = OptimisticTransactionDB::open_cf_descriptors(&opts, path, cfs)?;

        Ok(Self { db, _temp: None })
    }

    /// Open a throwaway store for testing; the backing directory lives as
    /// long as the store
    pub fn open_temp() -> Result<Self> {
        let temp = tempfile::tempdir().map_err(|e| StorageError::InvalidData(e.to_string()))?;
        let mut store = Self::open(temp.path())?;
        store._temp = Some(temp);
        Ok(store)
    }

    /// Run `f` inside a read-write transaction and commit it atomically.
    ///
    /// On an optimistic commit conflict the closure is re-run against a
    /// fresh transaction, up to `MAX_TX_RETRIES` times; after that the
    /// conflict surfaces as `StorageError::Conflict`.
    pub fn update<T, E>(&self, f: impl Fn(&StoreTx<'_>) -> std::result::Result<T, E>) -> std::result::Result<T, E>
    where
        E: From<StorageError>,
    {
        for attempt in 1..=MAX_TX_RETRIES {
            let tx = StoreTx {
                tx: self.db.transaction(),
                db: &self.db,
            };
            let value = f(&tx)?;
            match tx.tx.commit() {
                Ok(()) => return Ok(value),
                Err(e) if is_conflict(&e) => {
                    if attempt == MAX_TX_RETRIES {
                        return Err(StorageError::Conflict(MAX_TX_RETRIES).into());
                    }
                    tracing::debug!(attempt, "optimistic commit conflict, retrying");
                }
                Err(e) => return Err(StorageError::Database(e).into()),
            }
        }
        Err(StorageError::Conflict(MAX_TX_RETRIES).into())
    }

    /// Run `f` against a read-only snapshot
    pub fn view<T, E>(&self, f: impl FnOnce(&StoreTx<'_>) -> std::result::Result<T, E>) -> std::result::Result<T, E>
    where
        E: From<StorageError>,
    {
        let tx = StoreTx {
            tx: self.db.transaction(),
            db: &self.db,
        };
        f(&tx)
        // dropped without commit: nothing written
    }
}

/// An open transaction with typed accessors.
///
/// Helpers taking `&StoreTx` compose: a function invoked from inside an
/// already-open transaction reuses it instead of opening a nested one.
pub struct StoreTx<'a> {
    tx: Transaction<'a, OptimisticTransactionDB>,
    db: &'a OptimisticTransactionDB,
}

impl<'a> StoreTx<'a> {
    fn cf(&self, name: &'static str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::InvalidData(format!("Column family not found: {}", name)))
    }

    /// Collect keys in `cf_name` starting with `prefix`, up to `limit`
    fn scan_prefix(
        &self,
        cf_name: &'static str,
        prefix: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let cf = self.cf(cf_name)?;
        let mut out = Vec::new();
        for item in self
            .tx
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward))
        {
            let (key, value) = item?;
            if !key.starts_with(prefix) || out.len() >= limit {
                break;
            }
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }

    // --- quorum trackers ---------------------------------------------------

    /// Load the quorum tracker for a request. Reads through the conflict
    /// detector, since trackers are always read-modify-written.
    pub fn signature_map(&self, request: &RequestId) -> Result<Option<QuorumTracker>> {
        let cf = self.cf(CF_SIGNATURE_MAPS)?;
        match self.tx.get_for_update_cf(cf, request.as_bytes(), true)? {
            Some(bytes) => Ok(Some(deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_signature_map(&self, tracker: &QuorumTracker) -> Result<()> {
        let cf = self.cf(CF_SIGNATURE_MAPS)?;
        self.tx
            .put_cf(cf, tracker.request_id().as_bytes(), serialize(tracker)?)?;
        Ok(())
    }

    pub fn delete_signature_map(&self, request: &RequestId) -> Result<()> {
        let cf = self.cf(CF_SIGNATURE_MAPS)?;
        self.tx.delete_cf(cf, request.as_bytes())?;
        Ok(())
    }

    // --- raw signatures ----------------------------------------------------

    pub fn signature(&self, request: &RequestId, index: u32) -> Result<Option<SignatureExtended>> {
        let cf = self.cf(CF_SIGNATURES)?;
        match self.tx.get_cf(cf, signature_key(request, index))? {
            Some(bytes) => Ok(Some(deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_signature(
        &self,
        request: &RequestId,
        index: u32,
        signature: &SignatureExtended,
    ) -> Result<()> {
        let cf = self.cf(CF_SIGNATURES)?;
        self.tx
            .put_cf(cf, signature_key(request, index), serialize(signature)?)?;
        Ok(())
    }

    /// All stored signatures for a request, in validator-index order
    pub fn signatures_for_request(
        &self,
        request: &RequestId,
    ) -> Result<Vec<(u32, SignatureExtended)>> {
        let mut out = Vec::new();
        for (key, value) in self.scan_prefix(CF_SIGNATURES, request.as_bytes(), usize::MAX)? {
            let mut index_bytes = [0u8; 4];
            index_bytes.copy_from_slice(&key[32..36]);
            out.push((u32::from_be_bytes(index_bytes), deserialize(&value)?));
        }
        Ok(out)
    }

    /// Delete every signature stored for a request; returns how many
    pub fn delete_signatures(&self, request: &RequestId) -> Result<u64> {
        let cf = self.cf(CF_SIGNATURES)?;
        let mut deleted = 0;
        for (key, _) in self.scan_prefix(CF_SIGNATURES, request.as_bytes(), usize::MAX)? {
            self.tx.delete_cf(cf, key)?;
            deleted += 1;
        }
        Ok(deleted)
    }

    // --- aggregation proofs ------------------------------------------------

    pub fn aggregation_proof(&self, request: &RequestId) -> Result<Option<AggregationProof>> {
        let cf = self.cf(CF_AGGREGATION_PROOFS)?;
        match self.tx.get_cf(cf, request.as_bytes())? {
            Some(bytes) => Ok(Some(deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Persist a proof exactly once; a second save fails instead of
    /// overwriting
    pub fn put_aggregation_proof(
        &self,
        request: &RequestId,
        proof: &AggregationProof,
    ) -> Result<()> {
        let cf = self.cf(CF_AGGREGATION_PROOFS)?;
        if self
            .tx
            .get_for_update_cf(cf, request.as_bytes(), true)?
            .is_some()
        {
            return Err(StorageError::AlreadyExists("aggregation proof"));
        }
        self.tx.put_cf(cf, request.as_bytes(), serialize(proof)?)?;
        Ok(())
    }

    pub fn delete_aggregation_proof(&self, request: &RequestId) -> Result<()> {
        let cf = self.cf(CF_AGGREGATION_PROOFS)?;
        self.tx.delete_cf(cf, request.as_bytes())?;
        Ok(())
    }

    // --- signature requests ------------------------------------------------

    pub fn signature_request(&self, request: &RequestId) -> Result<Option<SignatureRequest>> {
        let cf = self.cf(CF_SIGNATURE_REQUESTS)?;
        match self.tx.get_cf(cf, request.as_bytes())? {
            Some(bytes) => Ok(Some(deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_signature_request(
        &self,
        request_id: &RequestId,
        request: &SignatureRequest,
    ) -> Result<()> {
        let cf = self.cf(CF_SIGNATURE_REQUESTS)?;
        self.tx
            .put_cf(cf, request_id.as_bytes(), serialize(request)?)?;
        Ok(())
    }

    pub fn delete_signature_request(&self, request: &RequestId) -> Result<()> {
        let cf = self.cf(CF_SIGNATURE_REQUESTS)?;
        self.tx.delete_cf(cf, request.as_bytes())?;
        Ok(())
    }

    // --- pending indices ---------------------------------------------------

    pub fn add_pending_signature(&self, epoch: u64, request: &RequestId) -> Result<()> {
        let cf = self.cf(CF_PENDING_SIGNATURES)?;
        self.tx.put_cf(cf, epoch_key(epoch, request), [1u8])?;
        Ok(())
    }

    pub fn remove_pending_signature(&self, epoch: u64, request: &RequestId) -> Result<()> {
        let cf = self.cf(CF_PENDING_SIGNATURES)?;
        self.tx.delete_cf(cf, epoch_key(epoch, request))?;
        Ok(())
    }

    /// Requests in an epoch still awaiting enough signatures, up to `limit`
    pub fn pending_signature_requests(&self, epoch: u64, limit: usize) -> Result<Vec<RequestId>> {
        self.pending_requests(CF_PENDING_SIGNATURES, epoch, limit)
    }

    pub fn add_pending_proof(&self, epoch: u64, request: &RequestId) -> Result<()> {
        let cf = self.cf(CF_PENDING_PROOFS)?;
        self.tx.put_cf(cf, epoch_key(epoch, request), [1u8])?;
        Ok(())
    }

    pub fn remove_pending_proof(&self, epoch: u64, request: &RequestId) -> Result<()> {
        let cf = self.cf(CF_PENDING_PROOFS)?;
        self.tx.delete_cf(cf, epoch_key(epoch, request))?;
        Ok(())
    }

    /// Requests in an epoch still awaiting an aggregation proof, up to `limit`
    pub fn pending_proof_requests(&self, epoch: u64, limit: usize) -> Result<Vec<RequestId>> {
        self.pending_requests(CF_PENDING_PROOFS, epoch, limit)
    }

    fn pending_requests(
        &self,
        cf_name: &'static str,
        epoch: u64,
        limit: usize,
    ) -> Result<Vec<RequestId>> {
        let prefix = epoch.to_be_bytes();
        let mut out = Vec::new();
        for (key, _) in self.scan_prefix(cf_name, &prefix, limit)? {
            out.push(
                RequestId::from_slice(&key[8..40])
                    .map_err(|e| StorageError::InvalidData(e.to_string()))?,
            );
        }
        Ok(out)
    }

    // --- per-epoch request index (pruning) ---------------------------------

    pub fn record_request_epoch(
        &self,
        epoch: u64,
        request: &RequestId,
        key_tag: KeyTag,
    ) -> Result<()> {
        let cf = self.cf(CF_REQUEST_EPOCHS)?;
        self.tx
            .put_cf(cf, epoch_key(epoch, request), [key_tag.as_u8()])?;
        Ok(())
    }

    pub fn remove_request_epoch(&self, epoch: u64, request: &RequestId) -> Result<()> {
        let cf = self.cf(CF_REQUEST_EPOCHS)?;
        self.tx.delete_cf(cf, epoch_key(epoch, request))?;
        Ok(())
    }

    /// All indexed requests with epoch strictly below `end_epoch`, in
    /// ascending epoch order
    pub fn request_epochs_below(&self, end_epoch: u64) -> Result<Vec<(u64, RequestId, KeyTag)>> {
        let cf = self.cf(CF_REQUEST_EPOCHS)?;
        let mut out = Vec::new();
        for item in self.tx.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            if key.len() != 40 || value.is_empty() {
                return Err(StorageError::InvalidData(
                    "malformed request-epoch index entry".into(),
                ));
            }
            let mut epoch_bytes = [0u8; 8];
            epoch_bytes.copy_from_slice(&key[..8]);
            let epoch = u64::from_be_bytes(epoch_bytes);
            if epoch >= end_epoch {
                break;
            }
            let request = RequestId::from_slice(&key[8..40])
                .map_err(|e| StorageError::InvalidData(e.to_string()))?;
            let key_tag =
                KeyTag::from_u8(value[0]).map_err(|e| StorageError::InvalidData(e.to_string()))?;
            out.push((epoch, request, key_tag));
        }
        Ok(out)
    }

    // --- validator sets & network configs ----------------------------------

    pub fn validator_set(&self, epoch: u64) -> Result<Option<ValidatorSet>> {
        let cf = self.cf(CF_VALIDATOR_SETS)?;
        match self.tx.get_cf(cf, epoch.to_be_bytes())? {
            Some(bytes) => Ok(Some(deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Persist a validator set and advance the latest-epoch watermark
    pub fn put_validator_set(&self, set: &ValidatorSet) -> Result<()> {
        let cf = self.cf(CF_VALIDATOR_SETS)?;
        self.tx.put_cf(cf, set.epoch.to_be_bytes(), serialize(set)?)?;

        if self.latest_epoch()?.map_or(true, |latest| set.epoch > latest) {
            let metadata = self.cf(CF_METADATA)?;
            self.tx
                .put_cf(metadata, KEY_LATEST_EPOCH, set.epoch.to_be_bytes())?;
        }
        Ok(())
    }

    pub fn delete_validator_set(&self, epoch: u64) -> Result<()> {
        let cf = self.cf(CF_VALIDATOR_SETS)?;
        self.tx.delete_cf(cf, epoch.to_be_bytes())?;
        Ok(())
    }

    pub fn network_config(&self, epoch: u64) -> Result<Option<NetworkConfig>> {
        let cf = self.cf(CF_NETWORK_CONFIGS)?;
        match self.tx.get_cf(cf, epoch.to_be_bytes())? {
            Some(bytes) => Ok(Some(deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn put_network_config(&self, config: &NetworkConfig) -> Result<()> {
        let cf = self.cf(CF_NETWORK_CONFIGS)?;
        self.tx
            .put_cf(cf, config.epoch.to_be_bytes(), serialize(config)?)?;
        Ok(())
    }

    pub fn delete_network_config(&self, epoch: u64) -> Result<()> {
        let cf = self.cf(CF_NETWORK_CONFIGS)?;
        self.tx.delete_cf(cf, epoch.to_be_bytes())?;
        Ok(())
    }

    /// Epochs below this floor have had their per-epoch records pruned
    pub fn pruned_floor(&self) -> Result<u64> {
        let cf = self.cf(CF_METADATA)?;
        match self.tx.get_cf(cf, KEY_PRUNED_FLOOR)? {
            Some(bytes) => {
                if bytes.len() != 8 {
                    return Err(StorageError::InvalidData("Invalid epoch bytes".into()));
                }
                let mut epoch_bytes = [0u8; 8];
                epoch_bytes.copy_from_slice(&bytes);
                Ok(u64::from_be_bytes(epoch_bytes))
            }
            None => Ok(0),
        }
    }

    pub fn set_pruned_floor(&self, epoch: u64) -> Result<()> {
        let cf = self.cf(CF_METADATA)?;
        self.tx.put_cf(cf, KEY_PRUNED_FLOOR, epoch.to_be_bytes())?;
        Ok(())
    }

    /// Highest epoch for which a validator set has been persisted
    pub fn latest_epoch(&self) -> Result<Option<u64>> {
        let cf = self.cf(CF_METADATA)?;
        match self.tx.get_cf(cf, KEY_LATEST_EPOCH)? {
            Some(bytes) => {
                if bytes.len() != 8 {
                    return Err(StorageError::InvalidData("Invalid epoch bytes".into()));
                }
                let mut epoch_bytes = [0u8; 8];
                epoch_bytes.copy_from_slice(&bytes);
                Ok(Some(u64::from_be_bytes(epoch_bytes)))
            }
            None => Ok(None),
        }
    }
}
