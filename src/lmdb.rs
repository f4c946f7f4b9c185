//! LMDB-backed durable store (`lmdb` feature)
//!
//! Records are keyed by the big-endian message id and encoded with rkyv. Every
//! `put` runs in its own write transaction; LMDB serializes writers, so the
//! existence check and the insert cannot interleave with another writer, and a
//! committed transaction is synced to disk before `put` returns.

use crate::{DurableStore, MessageId, ProcessingRecord, PutOutcome, StoreError};
use heed::byteorder::BigEndian;
use heed::types::{Bytes, U64};
use heed::{Database, Env, EnvOpenOptions};
use std::path::Path;

const RECORDS_DB: &str = "processing_records";

/// Default LMDB map size (64 MB)
pub const DEFAULT_MAP_SIZE: usize = 64 * 1024 * 1024;

/// Durable store persisted in an LMDB environment
#[derive(Clone)]
pub struct LmdbStore {
    env: Env,
    records: Database<U64<BigEndian>, Bytes>,
}

impl LmdbStore {
    /// Open (or create) a store in `path` with the default map size
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_map_size(path, DEFAULT_MAP_SIZE)
    }

    /// Open (or create) a store in `path`
    pub fn open_with_map_size(path: impl AsRef<Path>, map_size: usize) -> Result<Self, StoreError> {
        let path = path.as_ref();
        std::fs::create_dir_all(path).map_err(|e| StoreError::Storage(e.to_string().into()))?;

        // SAFETY: the environment is opened once per directory by this process and
        // the directory is not shared with another LMDB opener using different flags.
        let env = unsafe { EnvOpenOptions::new().map_size(map_size).max_dbs(1).open(path)? };

        let mut wtxn = env.write_txn()?;
        let records = env.create_database(&mut wtxn, Some(RECORDS_DB))?;
        wtxn.commit()?;

        tracing::debug!(path = %path.display(), map_size, "Opened LMDB store");
        Ok(Self { env, records })
    }

    /// Number of stored records
    pub fn len(&self) -> Result<u64, StoreError> {
        let rtxn = self.env.read_txn()?;
        Ok(self.records.len(&rtxn)?)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

fn encode(record: &ProcessingRecord) -> Result<Vec<u8>, StoreError> {
    rkyv::to_bytes::<rkyv::rancor::Error>(record)
        .map(|bytes| bytes.to_vec())
        .map_err(|e| StoreError::Encoding(e.to_string().into()))
}

fn decode(bytes: &[u8]) -> Result<ProcessingRecord, StoreError> {
    // LMDB values carry no alignment guarantee
    let mut aligned = rkyv::util::AlignedVec::<16>::new();
    aligned.extend_from_slice(bytes);
    rkyv::from_bytes::<ProcessingRecord, rkyv::rancor::Error>(&aligned)
        .map_err(|e| StoreError::Encoding(e.to_string().into()))
}

impl DurableStore for LmdbStore {
    fn exists(&self, id: MessageId) -> Result<bool, StoreError> {
        let rtxn = self.env.read_txn()?;
        Ok(self.records.get(&rtxn, &id.0)?.is_some())
    }

    fn get(&self, id: MessageId) -> Result<Option<ProcessingRecord>, StoreError> {
        let rtxn = self.env.read_txn()?;
        self.records.get(&rtxn, &id.0)?.map(decode).transpose()
    }

    fn put(&self, record: ProcessingRecord) -> Result<PutOutcome, StoreError> {
        let bytes = encode(&record)?;
        let mut wtxn = self.env.write_txn()?;
        if self.records.get(&wtxn, &record.id.0)?.is_some() {
            // Dropping the transaction aborts it
            return Ok(PutOutcome::AlreadyPresent);
        }
        self.records.put(&mut wtxn, &record.id.0, &bytes)?;
        wtxn.commit()?;
        Ok(PutOutcome::Inserted)
    }
}
