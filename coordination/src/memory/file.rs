//! JSON-file memory backend: one pretty-printed document per key.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::errors::{MemoryError, MemoryResult};
use super::record::{MemoryFilter, MemoryRecord, RecordMetadata};
use super::store::{validate_key, MemoryStore, SharedMemoryStore};

/// Longest encoded key stored verbatim; keeps names under the 255-byte limit.
const MAX_ENCODED_NAME: usize = 200;
/// Encoded prefix kept in front of the digest for long keys.
const HASHED_PREFIX: usize = 120;

/// File-backed store rooted at a directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Open (and create if missing) a store directory.
    pub async fn open(dir: impl Into<PathBuf>) -> MemoryResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| MemoryError::io(&dir, e))?;
        debug!(dir = %dir.display(), "Opened JSON file store");
        Ok(Self { dir })
    }

    pub fn shared(self) -> SharedMemoryStore {
        Arc::new(self)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Filesystem-safe, collision-free file name for `key`.
    ///
    /// Encodings longer than [`MAX_ENCODED_NAME`] keep a readable prefix and
    /// end in `.{blake3 of key}`; `.` never appears in a plain encoding.
    pub fn file_name(key: &str) -> String {
        let mut name = String::with_capacity(key.len() + 5);
        for byte in key.bytes() {
            match byte {
                b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' => name.push(byte as char),
                other => name.push_str(&format!("_{:02x}", other)),
            }
        }
        if name.len() > MAX_ENCODED_NAME {
            name.truncate(HASHED_PREFIX);
            name.push('.');
            name.push_str(blake3::hash(key.as_bytes()).to_hex().as_str());
        }
        name.push_str(".json");
        name
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(Self::file_name(key))
    }

    async fn read_record(path: &Path) -> MemoryResult<Option<MemoryRecord>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MemoryError::io(path, e)),
        }
    }
}

#[async_trait]
impl MemoryStore for JsonFileStore {
    fn name(&self) -> &str {
        "json_file"
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
        Self::read_record(&self.path_for(key)).await
    }

    async fn query(&self, filter: &MemoryFilter) -> MemoryResult<Vec<MemoryRecord>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| MemoryError::io(&self.dir, e))?;

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| MemoryError::io(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_record(&path).await {
                Ok(Some(record)) if filter.matches(&record) => records.push(record),
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable record"),
            }
        }

        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }

    async fn delete(&self, key: &str) -> MemoryResult<bool> {
        validate_key(key)?;
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(MemoryError::io(&path, e)),
        }
    }

    async fn put_record(&self, record: MemoryRecord) -> MemoryResult<()> {
        validate_key(&record.key)?;
        let path = self.path_for(&record.key);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(&record)?;

        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| MemoryError::io(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| MemoryError::io(&path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::record::RecordKind;
    use serde_json::json;

    #[test]
    fn test_file_name_is_safe_and_unique() {
        let a = JsonFileStore::file_name("cycle:1:phase:expand");
        assert_eq!(a, "cycle_3a1_3aphase_3aexpand.json");
        assert_ne!(
            JsonFileStore::file_name("a:b"),
            JsonFileStore::file_name("a_3ab")
        );
        assert!(!JsonFileStore::file_name("../etc/passwd").contains('/'));
    }

    #[tokio::test]
    async fn test_round_trip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("mem")).await.unwrap();
        let meta = RecordMetadata::new(RecordKind::Consensus).with_cycle("c9");
        store
            .store("cycle:c9:consensus:refine", json!({"decision": "use LRU"}), meta)
            .await
            .unwrap();

        let reopened = JsonFileStore::open(dir.path().join("mem")).await.unwrap();
        let got = reopened
            .retrieve("cycle:c9:consensus:refine")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.value, json!({"decision": "use LRU"}));
        assert_eq!(got.metadata.cycle_id.as_deref(), Some("c9"));
    }

    #[tokio::test]
    async fn test_query_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        store
            .store("k", json!(1), RecordMetadata::new(RecordKind::Task))
            .await
            .unwrap();

        let all = store.query(&MemoryFilter::new()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].key, "k");
    }

    #[test]
    fn test_long_key_gets_bounded_name() {
        let agent = "é".repeat(120);
        let key = format!("cycle:c1:draft:refine:1:0:proposal:{agent}");
        let name = JsonFileStore::file_name(&key);
        assert!(name.len() < 255, "{} bytes", name.len());
        assert!(name.starts_with("cycle_3ac1_3adraft"));
        assert_ne!(name, JsonFileStore::file_name(&format!("{key}x")));
        // Short keys keep the plain encoding.
        assert_eq!(JsonFileStore::file_name("cycle:c1:task"), "cycle_3ac1_3atask.json");
    }

    #[tokio::test]
    async fn test_long_key_round_trip_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        let key = format!("cycle:c1:draft:expand:1:0:proposal:{}", "智".repeat(90));
        store
            .store(&key, json!({"content": "long"}), RecordMetadata::new(RecordKind::Draft))
            .await
            .unwrap();

        let got = store.retrieve(&key).await.unwrap().unwrap();
        assert_eq!(got.key, key);
        let all = store.query(&MemoryFilter::new().key_prefix("cycle:c1:")).await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(store.delete(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_floats_survive_the_file_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        let mut scores = vec![0.9556395672092627, 0.1 + 0.2, 2.0f64.sqrt() / 3.0];
        let mut x = 0.5f64;
        for _ in 0..500 {
            // logistic map: cheap, deterministic, full-precision values
            x = 3.99 * x * (1.0 - x);
            scores.push(x);
        }

        store
            .store("scores", json!({ "scores": scores }), RecordMetadata::new(RecordKind::PhaseResult))
            .await
            .unwrap();
        let got = store.retrieve("scores").await.unwrap().unwrap();
        let back: Vec<f64> = serde_json::from_value(got.value["scores"].clone()).unwrap();
        let mismatches: Vec<(f64, f64)> = scores
            .iter()
            .zip(&back)
            .filter(|(a, b)| a.to_bits() != b.to_bits())
            .map(|(a, b)| (*a, *b))
            .collect();
        assert_eq!(back.len(), scores.len());
        assert!(mismatches.is_empty(), "{mismatches:?}");
    }

    #[tokio::test]
    async fn test_delete_missing_is_false() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path()).await.unwrap();
        assert!(!store.delete("nothing").await.unwrap());
    }
}
