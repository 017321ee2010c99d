//! Primary + best-effort secondary replication.
//!
//! ```text
//!   store(k, v) ──► primary ──(error)──► caller
//!                     │ ok
//!                     ▼
//!               secondary₁..ₙ ──(error)──► MemorySyncError (warn, collected)
//! ```
//!
//! Reads and queries go to the primary only, so read-after-write is
//! immediate there and best-effort on secondaries until [`SyncedMemory::resync`].

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::errors::{MemoryResult, MemorySyncError};
use super::record::{MemoryFilter, MemoryRecord, RecordMetadata};
use super::store::{MemoryStore, SharedMemoryStore};

/// Shared reference to a synchronized memory manager.
pub type SharedSyncedMemory = Arc<SyncedMemory>;

pub struct SyncedMemory {
    primary: SharedMemoryStore,
    secondaries: Vec<SharedMemoryStore>,
    sync_errors: Mutex<Vec<MemorySyncError>>,
}

impl SyncedMemory {
    pub fn new(primary: SharedMemoryStore) -> Self {
        Self {
            primary,
            secondaries: Vec::new(),
            sync_errors: Mutex::new(Vec::new()),
        }
    }

    pub fn with_secondary(mut self, store: SharedMemoryStore) -> Self {
        self.secondaries.push(store);
        self
    }

    pub fn shared(self) -> SharedSyncedMemory {
        Arc::new(self)
    }

    pub fn primary(&self) -> &SharedMemoryStore {
        &self.primary
    }

    pub fn secondaries(&self) -> &[SharedMemoryStore] {
        &self.secondaries
    }

    /// Snapshot of every secondary failure recorded so far.
    pub fn sync_errors(&self) -> Vec<MemorySyncError> {
        self.sync_errors
            .lock()
            .map(|errors| errors.clone())
            .unwrap_or_default()
    }

    /// Remove and return the recorded secondary failures.
    pub fn take_sync_errors(&self) -> Vec<MemorySyncError> {
        self.sync_errors
            .lock()
            .map(|mut errors| std::mem::take(&mut *errors))
            .unwrap_or_default()
    }

    fn record_sync_error(&self, error: MemorySyncError) {
        warn!(store = %error.store, key = %error.key, reason = %error.reason, "Secondary memory write failed");
        if let Ok(mut errors) = self.sync_errors.lock() {
            errors.push(error);
        }
    }

    async fn mirror(&self, record: &MemoryRecord) {
        for secondary in &self.secondaries {
            if let Err(e) = secondary.put_record(record.clone()).await {
                self.record_sync_error(MemorySyncError {
                    store: secondary.name().to_string(),
                    key: record.key.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Copy every primary record to every secondary.
    ///
    /// Returns the number of records copied; failures are recorded like
    /// ordinary mirror failures.
    pub async fn resync(&self) -> MemoryResult<usize> {
        let records = self.primary.query(&MemoryFilter::new()).await?;
        for record in &records {
            self.mirror(record).await;
        }
        debug!(
            records = records.len(),
            secondaries = self.secondaries.len(),
            "Memory resync finished"
        );
        Ok(records.len())
    }
}

#[async_trait]
impl MemoryStore for SyncedMemory {
    fn name(&self) -> &str {
        self.primary.name()
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
        self.primary.retrieve(key).await
    }

    async fn query(&self, filter: &MemoryFilter) -> MemoryResult<Vec<MemoryRecord>> {
        self.primary.query(filter).await
    }

    async fn delete(&self, key: &str) -> MemoryResult<bool> {
        let existed = self.primary.delete(key).await?;
        for secondary in &self.secondaries {
            if let Err(e) = secondary.delete(key).await {
                self.record_sync_error(MemorySyncError {
                    store: secondary.name().to_string(),
                    key: key.to_string(),
                    reason: e.to_string(),
                });
            }
        }
        Ok(existed)
    }

    async fn put_record(&self, record: MemoryRecord) -> MemoryResult<()> {
        self.primary.put_record(record.clone()).await?;
        self.mirror(&record).await;
        Ok(())
    }
}
