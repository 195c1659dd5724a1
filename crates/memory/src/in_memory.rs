//! In-memory backend: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use mindloop_core::error::StorageError;
use mindloop_core::storage::KeyValueStore;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A key-value store held in a single JSON object.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    entries: Arc<RwLock<Map<String, Value>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing snapshot.
    pub fn with_contents(entries: Map<String, Value>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    /// A copy of everything currently stored.
    pub async fn snapshot(&self) -> Map<String, Value> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, StorageError> {
        let entries = self.entries.read().await;
        Ok(keys
            .iter()
            .filter_map(|k| entries.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    async fn set(&self, updates: Map<String, Value>) -> Result<(), StorageError> {
        let mut entries = self.entries.write().await;
        for (key, value) in updates {
            entries.insert(key, value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn one(key: &str, value: Value) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(key.into(), value);
        map
    }

    #[tokio::test]
    async fn set_then_get_reads_own_writes() {
        let store = InMemoryStore::new();
        store.set(one("profile", json!({"name": "Ada"}))).await.unwrap();

        let got = store.get(&["profile"]).await.unwrap();
        assert_eq!(got["profile"]["name"], "Ada");
    }

    #[tokio::test]
    async fn absent_keys_are_missing() {
        let store = InMemoryStore::new();
        store.set(one("a", json!(1))).await.unwrap();

        let got = store.get(&["a", "b"]).await.unwrap();
        assert_eq!(got.len(), 1);
        assert!(!got.contains_key("b"));
    }

    #[tokio::test]
    async fn clones_share_state() {
        let store = InMemoryStore::new();
        let other = store.clone();
        store.set(one("k", json!("v"))).await.unwrap();
        assert_eq!(other.snapshot().await["k"], "v");
    }
}
