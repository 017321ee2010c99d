//! Memory error taxonomy.

use serde::{Deserialize, Serialize};

/// Error raised by a memory backend.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid key: {0:?}")]
    InvalidKey(String),

    #[error("Lock poisoned")]
    LockPoisoned,

    #[error("Backend {backend} failed: {reason}")]
    Backend { backend: String, reason: String },
}

impl MemoryError {
    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io { .. } => "memory_io",
            Self::Serialization(_) => "memory_serialization",
            Self::InvalidKey(_) => "memory_invalid_key",
            Self::LockPoisoned => "memory_lock_poisoned",
            Self::Backend { .. } => "memory_backend",
        }
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for memory operations
pub type MemoryResult<T> = Result<T, MemoryError>;

/// A write that reached the primary store but not a secondary one.
///
/// Never fails the originating operation; collected and reported as a warning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("failed to mirror {key:?} to {store}: {reason}")]
pub struct MemorySyncError {
    /// Name of the secondary store.
    pub store: String,
    pub key: String,
    pub reason: String,
}
