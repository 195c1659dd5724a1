//! File-based backend: the whole store as one JSON document.
//!
//! Storage location: `~/.mindloop/store.json` by default.
//!
//! The document is loaded into memory on creation and flushed to disk on
//! every `set`, giving fast reads with durable writes.

use async_trait::async_trait;
use mindloop_core::error::StorageError;
use mindloop_core::storage::KeyValueStore;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// A file-backed key-value store.
pub struct FileStore {
    path: PathBuf,
    entries: Arc<RwLock<Map<String, Value>>>,
}

impl FileStore {
    /// Open the store at `path`.
    ///
    /// A missing file starts empty (created on first write). A corrupt file
    /// also starts empty, with a warning; it is overwritten on the next write.
    pub fn new(path: PathBuf) -> Self {
        let entries = Self::load_from_disk(&path);
        debug!(path = %path.display(), keys = entries.len(), "File store loaded");
        Self {
            path,
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_disk(path: &Path) -> Map<String, Value> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Map::new(),
        };

        match serde_json::from_str::<Map<String, Value>>(&content) {
            Ok(map) => map,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring corrupted store file");
                Map::new()
            }
        }
    }

    fn flush(&self, entries: &Map<String, Value>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Write(format!("Failed to create store directory: {e}"))
            })?;
        }

        let content = serde_json::to_string_pretty(entries)
            .map_err(|e| StorageError::Write(format!("Failed to serialize store: {e}")))?;

        std::fs::write(&self.path, content)
            .map_err(|e| StorageError::Write(format!("Failed to write store file: {e}")))
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, StorageError> {
        let entries = self.entries.read().await;
        Ok(keys
            .iter()
            .filter_map(|k| entries.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    async fn set(&self, updates: Map<String, Value>) -> Result<(), StorageError> {
        // Hold the write lock across the flush so concurrent sets never interleave on disk
        let mut entries = self.entries.write().await;
        let mut next = entries.clone();
        for (key, value) in updates {
            next.insert(key, value);
        }
        // Readers only see the update once it is on disk
        self.flush(&next)?;
        *entries = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::NamedTempFile;

    fn one(key: &str, value: Value) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(key.into(), value);
        map
    }

    #[tokio::test]
    async fn set_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.json");

        let store = FileStore::new(path.clone());
        store
            .set(one("condensedNarrative", json!("earlier talk")))
            .await
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("earlier talk"));

        let reopened = FileStore::new(path);
        let got = reopened.get(&["condensedNarrative"]).await.unwrap();
        assert_eq!(got["condensedNarrative"], "earlier talk");
    }

    #[tokio::test]
    async fn handles_missing_file_gracefully() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("absent.json"));
        assert!(store.get(&["profile"]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_starts_empty_and_is_replaced() {
        let tmp = NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "this is not json").unwrap();

        let store = FileStore::new(tmp.path().to_path_buf());
        assert!(store.get(&["skills"]).await.unwrap().is_empty());

        store.set(one("skills", json!([]))).await.unwrap();
        let reopened = FileStore::new(tmp.path().to_path_buf());
        assert_eq!(reopened.get(&["skills"]).await.unwrap()["skills"], json!([]));
    }

    #[tokio::test]
    async fn failed_write_leaves_entries_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "plain file").unwrap();

        // The parent of the store path is a regular file, so every flush fails
        let store = FileStore::new(blocker.join("store.json"));
        let result = store.set(one("profile", json!({"name": "Ada"}))).await;

        assert!(matches!(result, Err(StorageError::Write(_))));
        assert!(store.get(&["profile"]).await.unwrap().is_empty());
    }
}
