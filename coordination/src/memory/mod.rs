//! Memory manager: pluggable stores for tasks, drafts, phase results and reports.
//!
//! Backends implement [`MemoryStore`]; [`SyncedMemory`] fans writes out from a
//! primary store to best-effort secondaries.

pub mod errors;
pub mod file;
pub mod record;
#[cfg(feature = "heavy-state")]
pub mod rocks;
pub mod store;
pub mod sync;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use errors::{MemoryError, MemoryResult, MemorySyncError};
pub use file::JsonFileStore;
pub use record::{keys, MemoryFilter, MemoryRecord, RecordKind, RecordMetadata};
#[cfg(feature = "heavy-state")]
pub use rocks::RocksStore;
pub use store::{InMemoryStore, MemoryStore, SharedMemoryStore};
pub use sync::{SharedSyncedMemory, SyncedMemory};

/// A single backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    InMemory,
    JsonFile { path: PathBuf },
    /// Requires the `heavy-state` feature.
    Rocksdb { path: PathBuf },
}

impl std::fmt::Display for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InMemory => write!(f, "in_memory"),
            Self::JsonFile { path } => write!(f, "json_file({})", path.display()),
            Self::Rocksdb { path } => write!(f, "rocksdb({})", path.display()),
        }
    }
}

/// Memory layout: one primary plus any number of mirrored secondaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub primary: BackendConfig,
    pub secondaries: Vec<BackendConfig>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            primary: BackendConfig::InMemory,
            secondaries: Vec::new(),
        }
    }
}

/// Open a single backend.
pub async fn open_backend(config: &BackendConfig) -> MemoryResult<SharedMemoryStore> {
    match config {
        BackendConfig::InMemory => Ok(InMemoryStore::new().shared()),
        BackendConfig::JsonFile { path } => Ok(JsonFileStore::open(path.clone()).await?.shared()),
        #[cfg(feature = "heavy-state")]
        BackendConfig::Rocksdb { path } => Ok(RocksStore::open(path.clone())?.shared()),
        #[cfg(not(feature = "heavy-state"))]
        BackendConfig::Rocksdb { .. } => Err(MemoryError::Backend {
            backend: "rocksdb".to_string(),
            reason: "built without the heavy-state feature".to_string(),
        }),
    }
}

/// Build the synchronized memory manager described by `config`.
pub async fn build_memory(config: &MemoryConfig) -> MemoryResult<SharedSyncedMemory> {
    let mut memory = SyncedMemory::new(open_backend(&config.primary).await?);
    for secondary in &config.secondaries {
        memory = memory.with_secondary(open_backend(secondary).await?);
    }
    tracing::debug!(
        primary = %config.primary,
        secondaries = config.secondaries.len(),
        "Memory manager constructed"
    );
    Ok(memory.shared())
}
