//! RocksDB-backed memory store (feature `heavy-state`).
//!
//! Records live in a single column family, JSON-encoded so that arbitrary
//! `serde_json::Value` payloads survive the round trip.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, DB};

use super::errors::{MemoryError, MemoryResult};
use super::record::{MemoryFilter, MemoryRecord, RecordMetadata};
use super::store::{validate_key, MemoryStore, SharedMemoryStore};

/// Column family holding every record.
pub const CF_RECORDS: &str = "records";

fn backend_err(e: rocksdb::Error) -> MemoryError {
    MemoryError::Backend {
        backend: "rocksdb".to_string(),
        reason: e.to_string(),
    }
}

pub struct RocksStore {
    db: RwLock<DB>,
    path: PathBuf,
}

impl RocksStore {
    /// Open or create a store at the given path
    pub fn open(path: impl Into<PathBuf>) -> MemoryResult<Self> {
        let path = path.into();

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf = ColumnFamilyDescriptor::new(CF_RECORDS, Options::default());
        let db = DB::open_cf_descriptors(&opts, &path, vec![cf]).map_err(backend_err)?;

        Ok(Self {
            db: RwLock::new(db),
            path,
        })
    }

    pub fn shared(self) -> SharedMemoryStore {
        Arc::new(self)
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn missing_cf() -> MemoryError {
        MemoryError::Backend {
            backend: "rocksdb".to_string(),
            reason: format!("column family not found: {}", CF_RECORDS),
        }
    }
}

#[async_trait]
impl MemoryStore for RocksStore {
    fn name(&self) -> &str {
        "rocksdb"
    }

    async fn store(
        &self,
        key: &str,
        value: serde_json::Value,
        metadata: RecordMetadata,
    ) -> MemoryResult<()> {
        self.put_record(MemoryRecord::new(key, value, metadata)).await
    }

    async fn retrieve(&self, key: &str) -> MemoryResult<Option<MemoryRecord>> {
        validate_key(key)?;
        let db = self.db.read().map_err(|_| MemoryError::LockPoisoned)?;
        let cf = db.cf_handle(CF_RECORDS).ok_or_else(Self::missing_cf)?;
        match db.get_cf(&cf, key.as_bytes()).map_err(backend_err)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn query(&self, filter: &MemoryFilter) -> MemoryResult<Vec<MemoryRecord>> {
        let db = self.db.read().map_err(|_| MemoryError::LockPoisoned)?;
        let cf = db.cf_handle(CF_RECORDS).ok_or_else(Self::missing_cf)?;

        let mode = match &filter.key_prefix {
            Some(prefix) => {
                IteratorMode::From(prefix.as_bytes(), rocksdb::Direction::Forward)
            }
            None => IteratorMode::Start,
        };

        let mut records = Vec::new();
        for item in db.iterator_cf(&cf, mode) {
            let (key, bytes) = item.map_err(backend_err)?;
            if let Some(prefix) = &filter.key_prefix {
                if !key.starts_with(prefix.as_bytes()) {
                    break; // Prefix no longer matches
                }
            }
            let record: MemoryRecord = serde_json::from_slice(&bytes)?;
            if filter.matches(&record) {
                records.push(record);
            }
        }
        Ok(records)
    }

    async fn delete(&self, key: &str) -> MemoryResult<bool> {
        validate_key(key)?;
        let db = self.db.read().map_err(|_| MemoryError::LockPoisoned)?;
        let cf = db.cf_handle(CF_RECORDS).ok_or_else(Self::missing_cf)?;
        let existed = db.get_cf(&cf, key.as_bytes()).map_err(backend_err)?.is_some();
        if existed {
            db.delete_cf(&cf, key.as_bytes()).map_err(backend_err)?;
        }
        Ok(existed)
    }

    async fn put_record(&self, record: MemoryRecord) -> MemoryResult<()> {
        validate_key(&record.key)?;
        let bytes = serde_json::to_vec(&record)?;
        let db = self.db.read().map_err(|_| MemoryError::LockPoisoned)?;
        let cf = db.cf_handle(CF_RECORDS).ok_or_else(Self::missing_cf)?;
        db.put_cf(&cf, record.key.as_bytes(), bytes)
            .map_err(backend_err)?;
        Ok(())
    }
}
