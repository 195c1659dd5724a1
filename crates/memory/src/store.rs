//! Typed accessor over the persisted memory regions.
//!
//! [`MemoryStore`] wraps an opaque [`KeyValueStore`] and reads or writes one
//! region per call. Every write path runs the region's cap function first,
//! so the caps documented in `mindloop_core::memory` hold at rest.
//!
//! Counters and the embedding cache are ordinary regions, read-modify-written
//! per access. Nothing is held in process between requests, so several
//! instances may share one store; concurrent writers can race on eviction,
//! which only costs bookkeeping precision.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mindloop_core::error::StorageError;
use mindloop_core::memory::{
    CHAT_HISTORY_KEY, CONDENSED_NARRATIVE_KEY, CONVERSATION_COUNT_KEY, EMBEDDING_CACHE_KEY,
    HistoryMessage, MAX_CHAT_HISTORY, MAX_EMBEDDING_CACHE, MAX_MANUAL_ENTRIES,
    MAX_NARRATIVE_CHARS, MAX_PROFILE_KEYS, MAX_SESSION_SUMMARIES, MEMORY_ENTRIES_KEY,
    PROFILE_KEY, SKILLS_KEY, Skill, is_session_key, session_key, session_timestamp,
};
use mindloop_core::storage::KeyValueStore;
use mindloop_core::text::tail_chars;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;

// ── Cap functions ─────────────────────────────────────────────────────────

/// Keep the 100 most recently inserted manual entries and the 20 newest
/// session summaries. Insertion order of the survivors is preserved.
pub fn cap_memory_entries(entries: Map<String, Value>) -> Map<String, Value> {
    let mut sessions: Vec<(i64, &String)> = entries
        .keys()
        .filter(|k| is_session_key(k))
        .map(|k| (session_timestamp(k).unwrap_or(0), k))
        .collect();
    sessions.sort_by_key(|(ts, _)| *ts);

    let manual: Vec<&String> = entries.keys().filter(|k| !is_session_key(k)).collect();

    let mut evict: HashSet<String> = HashSet::new();
    let excess_sessions = sessions.len().saturating_sub(MAX_SESSION_SUMMARIES);
    evict.extend(sessions.iter().take(excess_sessions).map(|(_, k)| (*k).clone()));
    let excess_manual = manual.len().saturating_sub(MAX_MANUAL_ENTRIES);
    evict.extend(manual.iter().take(excess_manual).map(|k| (*k).clone()));

    if evict.is_empty() {
        return entries;
    }
    debug!(evicted = evict.len(), "Evicting memory entries over cap");
    entries
        .into_iter()
        .filter(|(k, _)| !evict.contains(k))
        .collect()
}

/// Keep the 50 most recently inserted profile keys.
pub fn cap_profile(profile: Map<String, Value>) -> Map<String, Value> {
    let excess = profile.len().saturating_sub(MAX_PROFILE_KEYS);
    if excess == 0 {
        return profile;
    }
    profile.into_iter().skip(excess).collect()
}

/// Keep the most recent 200 history messages.
pub fn cap_history(mut history: Vec<HistoryMessage>) -> Vec<HistoryMessage> {
    let excess = history.len().saturating_sub(MAX_CHAT_HISTORY);
    history.drain(..excess);
    history
}

/// Keep the most recent 4000 characters of the narrative.
pub fn cap_narrative(text: &str) -> String {
    tail_chars(text, MAX_NARRATIVE_CHARS).to_string()
}

/// Merge newly observed facts into a profile. Updated keys move to the
/// most-recent end so they survive eviction longest.
pub fn merge_facts(profile: Map<String, Value>, facts: Map<String, Value>) -> Map<String, Value> {
    let mut merged: Map<String, Value> = profile
        .into_iter()
        .filter(|(k, _)| !facts.contains_key(k))
        .collect();
    merged.extend(facts);
    cap_profile(merged)
}

/// The key of the newest session summary, if any.
pub fn latest_session_key(entries: &Map<String, Value>) -> Option<&String> {
    entries
        .keys()
        .filter(|k| is_session_key(k))
        .max_by_key(|k| session_timestamp(k).unwrap_or(0))
}

// ── Embedding cache ───────────────────────────────────────────────────────

/// Memory-key → embedding vector, oldest insertion first, capped at 300.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingCache {
    entries: Vec<(String, Vec<f32>)>,
    dirty: bool,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the persisted JSON object, skipping malformed vectors.
    pub fn from_json(map: &Map<String, Value>) -> Self {
        let entries = map
            .iter()
            .filter_map(|(key, value)| {
                let vector: Option<Vec<f32>> = value
                    .as_array()?
                    .iter()
                    .map(|n| n.as_f64().map(|f| f as f32))
                    .collect();
                vector.map(|v| (key.clone(), v))
            })
            .collect();
        Self {
            entries,
            dirty: false,
        }
    }

    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::json!(v)))
            .collect();
        Value::Object(map)
    }

    pub fn get(&self, key: &str) -> Option<&[f32]> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    /// Insert or replace a vector, evicting the oldest beyond the cap.
    pub fn insert(&mut self, key: impl Into<String>, vector: Vec<f32>) {
        let key = key.into();
        self.entries.retain(|(k, _)| *k != key);
        self.entries.push((key, vector));
        let excess = self.entries.len().saturating_sub(MAX_EMBEDDING_CACHE);
        self.entries.drain(..excess);
        self.dirty = true;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the cache changed since it was loaded.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

// ── Store accessor ────────────────────────────────────────────────────────

/// Typed read/write over the memory regions of a key-value store.
#[derive(Clone)]
pub struct MemoryStore {
    kv: Arc<dyn KeyValueStore>,
}

impl MemoryStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// The underlying storage backend.
    pub fn backend(&self) -> &Arc<dyn KeyValueStore> {
        &self.kv
    }

    async fn read<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T, StorageError> {
        let mut got = self.kv.get(&[key]).await?;
        match got.remove(key) {
            None | Some(Value::Null) => Ok(T::default()),
            Some(value) => serde_json::from_value(value).map_err(|e| StorageError::Corrupt {
                region: key.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let value = serde_json::to_value(value)
            .map_err(|e| StorageError::Write(format!("Failed to encode {key}: {e}")))?;
        let mut update = Map::new();
        update.insert(key.to_string(), value);
        self.kv.set(update).await
    }

    // ── Condensed narrative ──

    pub async fn condensed_narrative(&self) -> Result<String, StorageError> {
        self.read(CONDENSED_NARRATIVE_KEY).await
    }

    pub async fn set_condensed_narrative(&self, text: &str) -> Result<(), StorageError> {
        self.write(CONDENSED_NARRATIVE_KEY, &cap_narrative(text)).await
    }

    // ── Profile ──

    pub async fn profile(&self) -> Result<Map<String, Value>, StorageError> {
        self.read(PROFILE_KEY).await
    }

    pub async fn set_profile(&self, profile: Map<String, Value>) -> Result<(), StorageError> {
        self.write(PROFILE_KEY, &cap_profile(profile)).await
    }

    /// Additively merge facts into the profile. Returns the number merged.
    pub async fn merge_profile(&self, facts: Map<String, Value>) -> Result<usize, StorageError> {
        let count = facts.len();
        let merged = merge_facts(self.profile().await?, facts);
        self.write(PROFILE_KEY, &merged).await?;
        Ok(count)
    }

    // ── Memory entries (manual + session summaries) ──

    /// Raw entries, without cap enforcement.
    pub async fn memory_entries(&self) -> Result<Map<String, Value>, StorageError> {
        self.read(MEMORY_ENTRIES_KEY).await
    }

    /// Entries after cap enforcement; writes back only when something was evicted.
    pub async fn capped_memory_entries(&self) -> Result<Map<String, Value>, StorageError> {
        let entries = self.memory_entries().await?;
        let before = entries.len();
        let capped = cap_memory_entries(entries);
        if capped.len() != before {
            self.write(MEMORY_ENTRIES_KEY, &capped).await?;
        }
        Ok(capped)
    }

    pub async fn set_memory_entries(&self, entries: Map<String, Value>) -> Result<(), StorageError> {
        self.write(MEMORY_ENTRIES_KEY, &cap_memory_entries(entries)).await
    }

    /// Save (or replace) a manual entry as the newest one.
    pub async fn save_memory(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let mut entries: Map<String, Value> = self
            .memory_entries()
            .await?
            .into_iter()
            .filter(|(k, _)| k != key)
            .collect();
        entries.insert(key.to_string(), value);
        self.set_memory_entries(entries).await
    }

    /// Remove an entry. Returns whether it existed.
    pub async fn remove_memory(&self, key: &str) -> Result<bool, StorageError> {
        let entries = self.memory_entries().await?;
        if !entries.contains_key(key) {
            return Ok(false);
        }
        let remaining: Map<String, Value> =
            entries.into_iter().filter(|(k, _)| k != key).collect();
        self.write(MEMORY_ENTRIES_KEY, &remaining).await?;
        Ok(true)
    }

    /// Store a session summary under a timestamp key and enforce the cap.
    pub async fn add_session_summary(
        &self,
        at: DateTime<Utc>,
        summary: &str,
    ) -> Result<String, StorageError> {
        let key = session_key(at);
        let mut entries = self.memory_entries().await?;
        entries.insert(key.clone(), Value::String(summary.to_string()));
        self.set_memory_entries(entries).await?;
        Ok(key)
    }

    // ── Skills ──

    pub async fn skills(&self) -> Result<Vec<Skill>, StorageError> {
        self.read(SKILLS_KEY).await
    }

    pub async fn set_skills(&self, skills: &[Skill]) -> Result<(), StorageError> {
        self.write(SKILLS_KEY, skills).await
    }

    // ── Chat history ──

    pub async fn chat_history(&self) -> Result<Vec<HistoryMessage>, StorageError> {
        self.read(CHAT_HISTORY_KEY).await
    }

    pub async fn set_chat_history(&self, history: Vec<HistoryMessage>) -> Result<(), StorageError> {
        self.write(CHAT_HISTORY_KEY, &cap_history(history)).await
    }

    pub async fn append_history(&self, messages: &[HistoryMessage]) -> Result<(), StorageError> {
        let mut history = self.chat_history().await?;
        history.extend_from_slice(messages);
        self.set_chat_history(history).await
    }

    // ── Embedding cache ──

    pub async fn embedding_cache(&self) -> Result<EmbeddingCache, StorageError> {
        let map: Map<String, Value> = self.read(EMBEDDING_CACHE_KEY).await?;
        Ok(EmbeddingCache::from_json(&map))
    }

    pub async fn set_embedding_cache(&self, cache: &EmbeddingCache) -> Result<(), StorageError> {
        self.write(EMBEDDING_CACHE_KEY, &cache.to_json()).await
    }

    // ── Conversation counter ──

    pub async fn conversation_count(&self) -> Result<u64, StorageError> {
        self.read(CONVERSATION_COUNT_KEY).await
    }

    /// Increment the persisted counter and return the new value.
    pub async fn increment_conversation_count(&self) -> Result<u64, StorageError> {
        let next = self.conversation_count().await? + 1;
        self.write(CONVERSATION_COUNT_KEY, &next).await?;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryStore;
    use mindloop_core::message::Role;
    use serde_json::json;

    fn store() -> MemoryStore {
        MemoryStore::new(Arc::new(InMemoryStore::new()))
    }

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    #[tokio::test]
    async fn manual_entries_capped_at_100_oldest_first() {
        let store = store();
        for i in 0..105 {
            store.save_memory(&format!("note{i:03}"), json!(i)).await.unwrap();
        }
        let entries = store.memory_entries().await.unwrap();
        assert_eq!(entries.len(), 100);
        assert!(!entries.contains_key("note004"));
        assert!(entries.contains_key("note005"));
        assert!(entries.contains_key("note104"));
    }

    #[tokio::test]
    async fn session_summaries_capped_at_20_by_timestamp() {
        let store = store();
        for i in 0..25 {
            store.add_session_summary(at(1_000 + i), "summary").await.unwrap();
        }
        store.save_memory("wallet", json!("0xabc")).await.unwrap();

        let entries = store.memory_entries().await.unwrap();
        let sessions: Vec<_> = entries.keys().filter(|k| is_session_key(k)).collect();
        assert_eq!(sessions.len(), 20);
        assert!(!entries.contains_key("session_1004"));
        assert!(entries.contains_key("session_1005"));
        assert!(entries.contains_key("wallet"));
    }

    #[test]
    fn session_cap_uses_timestamp_not_insertion() {
        let mut entries = Map::new();
        // Newest inserted first
        for i in (0..21).rev() {
            entries.insert(format!("session_{}", 100 + i), json!("s"));
        }
        let capped = cap_memory_entries(entries);
        assert_eq!(capped.len(), 20);
        assert!(!capped.contains_key("session_100"));
    }

    #[tokio::test]
    async fn profile_capped_at_50_most_recent() {
        let store = store();
        let profile: Map<String, Value> = (0..60).map(|i| (format!("k{i}"), json!(i))).collect();
        store.set_profile(profile).await.unwrap();

        let stored = store.profile().await.unwrap();
        assert_eq!(stored.len(), 50);
        assert!(!stored.contains_key("k9"));
        assert!(stored.contains_key("k10"));
        assert!(stored.contains_key("k59"));
    }

    #[tokio::test]
    async fn merge_profile_overwrites_and_refreshes_recency() {
        let store = store();
        let profile: Map<String, Value> = (0..50).map(|i| (format!("k{i}"), json!(i))).collect();
        store.set_profile(profile).await.unwrap();

        let mut facts = Map::new();
        facts.insert("k0".into(), json!("updated"));
        facts.insert("new".into(), json!(true));
        assert_eq!(store.merge_profile(facts).await.unwrap(), 2);

        let stored = store.profile().await.unwrap();
        assert_eq!(stored.len(), 50);
        assert_eq!(stored["k0"], "updated");
        assert!(stored.contains_key("new"));
        // k1 was the oldest untouched key
        assert!(!stored.contains_key("k1"));
    }

    #[tokio::test]
    async fn chat_history_capped_at_200() {
        let store = store();
        let msgs: Vec<HistoryMessage> = (0..210)
            .map(|i| HistoryMessage::new(Role::User, format!("m{i}")))
            .collect();
        store.append_history(&msgs).await.unwrap();

        let history = store.chat_history().await.unwrap();
        assert_eq!(history.len(), 200);
        assert_eq!(history[0].text, "m10");
        assert_eq!(history[199].text, "m209");
    }

    #[tokio::test]
    async fn embedding_cache_capped_at_300_and_persisted() {
        let store = store();
        let mut cache = store.embedding_cache().await.unwrap();
        for i in 0..305 {
            cache.insert(format!("k{i}"), vec![i as f32, 1.0]);
        }
        assert!(cache.is_dirty());
        store.set_embedding_cache(&cache).await.unwrap();

        let loaded = store.embedding_cache().await.unwrap();
        assert_eq!(loaded.len(), 300);
        assert!(loaded.get("k4").is_none());
        assert_eq!(loaded.get("k5"), Some(&[5.0, 1.0][..]));
        assert!(!loaded.is_dirty());
    }

    #[tokio::test]
    async fn narrative_keeps_most_recent_tail() {
        let store = store();
        let text = format!("{}{}", "a".repeat(100), "b".repeat(4000));
        store.set_condensed_narrative(&text).await.unwrap();

        let stored = store.condensed_narrative().await.unwrap();
        assert_eq!(stored.chars().count(), 4000);
        assert!(stored.chars().all(|c| c == 'b'));
    }

    #[tokio::test]
    async fn counter_starts_at_zero_and_increments() {
        let store = store();
        assert_eq!(store.conversation_count().await.unwrap(), 0);
        assert_eq!(store.increment_conversation_count().await.unwrap(), 1);
        assert_eq!(store.increment_conversation_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn remove_memory_reports_presence() {
        let store = store();
        store.save_memory("a", json!("1")).await.unwrap();
        assert!(store.remove_memory("a").await.unwrap());
        assert!(!store.remove_memory("a").await.unwrap());
    }

    #[tokio::test]
    async fn corrupt_region_is_a_storage_error() {
        let kv = Arc::new(InMemoryStore::new());
        let mut bad = Map::new();
        bad.insert(SKILLS_KEY.into(), json!("not a list"));
        kv.set(bad).await.unwrap();

        let err = MemoryStore::new(kv).skills().await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }));
    }

    #[test]
    fn latest_session_picks_max_timestamp() {
        let mut entries = Map::new();
        entries.insert("session_300".into(), json!("c"));
        entries.insert("session_100".into(), json!("a"));
        entries.insert("note".into(), json!("n"));
        assert_eq!(latest_session_key(&entries).map(String::as_str), Some("session_300"));
    }
}
