//! MemoryStore abstraction and the in-memory backend.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use super::errors::{MemoryError, MemoryResult};
use super::record::{MemoryFilter, MemoryRecord, RecordMetadata};

/// Trait implemented by every memory backend.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Backend name used in logs and sync warnings.
    fn name(&self) -> &str;

    /// Insert or replace the record under `key`.
    async fn store(
        &self,
        key: &str,
        value: serde_json::Value,
        metadata: RecordMetadata,
    ) -> MemoryResult<()>;

    async fn retrieve(&self, key: &str) -> MemoryResult<Option<MemoryRecord>>;

    /// Records matching `filter`, sorted by key.
    async fn query(&self, filter: &MemoryFilter) -> MemoryResult<Vec<MemoryRecord>>;

    /// Remove `key`. Returns whether a record existed.
    async fn delete(&self, key: &str) -> MemoryResult<bool>;

    /// Write a fully-formed record, preserving its timestamp.
    async fn put_record(&self, record: MemoryRecord) -> MemoryResult<()> {
        self.store(&record.key, record.value, record.metadata).await
    }
}

/// Shared reference to a memory backend.
pub type SharedMemoryStore = Arc<dyn MemoryStore>;

pub(crate) fn validate_key(key: &str) -> MemoryResult<()> {
    if key.trim().is_empty() || key.contains('\0') {
        return Err(MemoryError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// In-memory backend. Lost on process exit.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: RwLock<BTreeMap<String, MemoryRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> SharedMemoryStore {
        Arc::new(self)
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
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
        let records = self.records.read().map_err(|_| MemoryError::LockPoisoned)?;
        Ok(records.get(key).cloned())
    }

    async fn query(&self, filter: &MemoryFilter) -> MemoryResult<Vec<MemoryRecord>> {
        let records = self.records.read().map_err(|_| MemoryError::LockPoisoned)?;
        Ok(records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn delete(&self, key: &str) -> MemoryResult<bool> {
        let mut records = self.records.write().map_err(|_| MemoryError::LockPoisoned)?;
        Ok(records.remove(key).is_some())
    }

    async fn put_record(&self, record: MemoryRecord) -> MemoryResult<()> {
        validate_key(&record.key)?;
        let mut records = self.records.write().map_err(|_| MemoryError::LockPoisoned)?;
        records.insert(record.key.clone(), record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edrr::Phase;
    use crate::memory::record::RecordKind;
    use serde_json::json;

    #[tokio::test]
    async fn test_store_and_retrieve() {
        let store = InMemoryStore::new();
        let meta = RecordMetadata::new(RecordKind::PhaseResult)
            .with_cycle("c1")
            .with_phase(Phase::Expand);
        store
            .store("cycle:c1:phase:expand", json!({"ideas": ["a", "b"]}), meta.clone())
            .await
            .unwrap();

        let got = store.retrieve("cycle:c1:phase:expand").await.unwrap().unwrap();
        assert_eq!(got.value, json!({"ideas": ["a", "b"]}));
        assert_eq!(got.metadata, meta);
        assert!(store.retrieve("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_store_overwrites_same_key() {
        let store = InMemoryStore::new();
        let meta = RecordMetadata::new(RecordKind::PhaseResult);
        store.store("k", json!(1), meta.clone()).await.unwrap();
        store.store("k", json!(2), meta).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.retrieve("k").await.unwrap().unwrap().value, json!(2));
    }

    #[tokio::test]
    async fn test_query_sorted_by_key() {
        let store = InMemoryStore::new();
        for key in ["b", "a", "c"] {
            store
                .store(key, json!(key), RecordMetadata::new(RecordKind::Draft))
                .await
                .unwrap();
        }
        let keys: Vec<_> = store
            .query(&MemoryFilter::new())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_delete_and_invalid_key() {
        let store = InMemoryStore::new();
        store
            .store("k", json!(null), RecordMetadata::new(RecordKind::Task))
            .await
            .unwrap();
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert!(store.is_empty());

        let err = store
            .store("  ", json!(null), RecordMetadata::new(RecordKind::Task))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "memory_invalid_key");
    }
}
