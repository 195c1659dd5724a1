//! Memory layer composer.
//!
//! Builds the message stack for one request from six memory tiers, in a
//! fixed order:
//!
//! | # | Layer | Placement |
//! |---|-------|-----------|
//! | 1 | Condensed narrative | synthetic prior exchange |
//! | 2 | Recent history | last 30 turns, verbatim |
//! | 3 | Current turn | page/selection/context annotations + input |
//! | 4 | Profile | appended to the current turn |
//! | 5 | Session summaries + saved memories | appended, relevance-filtered when many |
//! | 6 | Learned skills | appended, usage recorded immediately |
//!
//! Storage failures propagate: a turn composed from half-read memory is
//! worse than no turn at all.

use std::collections::HashSet;

use chrono::Utc;
use mindloop_core::error::StorageError;
use mindloop_core::memory::{
    HistoryMessage, MAX_PROFILE_KEYS, is_session_key, session_timestamp, value_text,
};
use mindloop_core::message::{ChatMessage, MessageStack};
use mindloop_memory::store::{cap_profile, latest_session_key};
use mindloop_memory::{MemoryStore, RelevanceFilter};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// History turns injected verbatim.
pub const RECENT_TURNS: usize = 30;

/// At or below this many memory entries, all are injected unfiltered.
pub const UNFILTERED_MAX: usize = 6;

/// Manual entries shown in full when filtering finds none relevant.
pub const SMALL_MANUAL_SET: usize = 10;

/// Skills scoring at or below this are not injected.
pub const VIABLE_SKILL_SCORE: u8 = 15;

/// Browser/page context accompanying a turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContext {
    pub title: Option<String>,
    pub url: Option<String>,
    pub selection: Option<String>,
}

/// Everything the host supplies for one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnInput {
    pub message: String,
    #[serde(default)]
    pub page: Option<PageContext>,
    /// Free-form context captured by the host (clipboard, screenshot OCR, ...)
    #[serde(default)]
    pub captured: Option<String>,
}

impl TurnInput {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }
}

/// Size of one layer after composition, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerStats {
    pub layer: &'static str,
    pub items: usize,
    pub chars: usize,
}

/// The composed stack plus what the maintenance pass needs to know.
#[derive(Debug, Clone)]
pub struct ComposedContext {
    pub stack: MessageStack,
    /// Names of the skills injected this turn
    pub active_skills: Vec<String>,
    pub layers: Vec<LayerStats>,
}

/// Builds message stacks from the memory store.
#[derive(Clone)]
pub struct ContextComposer {
    store: MemoryStore,
    filter: RelevanceFilter,
}

impl ContextComposer {
    pub fn new(store: MemoryStore, filter: RelevanceFilter) -> Self {
        Self { store, filter }
    }

    /// Compose the stack for `input`, given the retained chat history.
    pub async fn compose(
        &self,
        input: &TurnInput,
        history: &[HistoryMessage],
    ) -> Result<ComposedContext, StorageError> {
        let mut stack = MessageStack::new();
        let mut layers = Vec::with_capacity(6);

        // 1. Condensed narrative as an established exchange
        let narrative = self.store.condensed_narrative().await?;
        if !narrative.trim().is_empty() {
            stack.push(ChatMessage::user(format!("[Previous history: {narrative}]")));
            stack.push(ChatMessage::assistant("Understood."));
        }
        let narrative_items = usize::from(!narrative.trim().is_empty());
        layers.push(stats("narrative", narrative_items, narrative.chars().count()));

        // 2. Recent turns, oldest first
        let start = history.len().saturating_sub(RECENT_TURNS);
        let recent = &history[start..];
        stack.extend(recent.iter().map(|m| ChatMessage {
            role: m.role,
            content: m.text.clone(),
        }));
        layers.push(stats(
            "history",
            recent.len(),
            recent.iter().map(|m| m.text.chars().count()).sum(),
        ));

        // 3. Current turn; layers 4-6 append to it
        let mut current = annotate(input);

        // 4. Profile
        let profile_block = self.profile_block().await?;
        layers.push(stats("profile", profile_block.1, profile_block.0.chars().count()));
        current.push_str(&profile_block.0);

        // 5. Session summaries and saved memories
        let memory_block = self.memory_block(&input.message).await?;
        layers.push(stats("memory", memory_block.1, memory_block.0.chars().count()));
        current.push_str(&memory_block.0);

        // 6. Skills
        let (skill_block, active_skills) = self.skill_block().await?;
        layers.push(stats("skills", active_skills.len(), skill_block.chars().count()));
        current.push_str(&skill_block);

        stack.push(ChatMessage::user(current));

        debug!(
            entries = stack.len(),
            active_skills = active_skills.len(),
            "Composed message stack"
        );

        Ok(ComposedContext {
            stack,
            active_skills,
            layers,
        })
    }

    async fn profile_block(&self) -> Result<(String, usize), StorageError> {
        let profile = self.store.profile().await?;
        let profile = if profile.len() > MAX_PROFILE_KEYS {
            let capped = cap_profile(profile);
            self.store.set_profile(capped.clone()).await?;
            capped
        } else {
            profile
        };

        if profile.is_empty() {
            return Ok((String::new(), 0));
        }
        let mut block = String::from("\n\n[User profile]");
        for (key, value) in &profile {
            block.push_str(&format!("\n- {key}: {}", value_text(value)));
        }
        Ok((block, profile.len()))
    }

    async fn memory_block(&self, query: &str) -> Result<(String, usize), StorageError> {
        let entries = self.store.capped_memory_entries().await?;
        if entries.is_empty() {
            return Ok((String::new(), 0));
        }

        let (sessions, manual) = if entries.len() <= UNFILTERED_MAX {
            split_sessions(entries.iter())
        } else {
            self.select_relevant(query, &entries).await?
        };

        let mut block = String::new();
        if !sessions.is_empty() {
            block.push_str("\n\n[Recent session summaries]");
            for (_, value) in &sessions {
                block.push_str(&format!("\n- {}", value_text(value)));
            }
        }
        if !manual.is_empty() {
            block.push_str("\n\n[Saved memories]");
            for (key, value) in &manual {
                block.push_str(&format!("\n- {key}: {}", value_text(value)));
            }
        }
        Ok((block, sessions.len() + manual.len()))
    }

    async fn select_relevant<'a>(
        &self,
        query: &str,
        entries: &'a Map<String, Value>,
    ) -> Result<(Vec<EntryRef<'a>>, Vec<EntryRef<'a>>), StorageError> {
        let ranked = self.filter.rank(query, entries, &self.store).await?;
        let mut chosen: HashSet<&str> = ranked.iter().map(|c| c.key.as_str()).collect();

        // Continuity: the newest summary is always shown
        if let Some(latest) = latest_session_key(entries) {
            chosen.insert(latest.as_str());
        }

        let (sessions, mut manual) =
            split_sessions(entries.iter().filter(|(k, _)| chosen.contains(k.as_str())));

        if manual.is_empty() {
            let all_manual: Vec<_> = entries.iter().filter(|(k, _)| !is_session_key(k)).collect();
            if all_manual.len() <= SMALL_MANUAL_SET {
                manual = all_manual;
            }
        }

        debug!(
            candidates = entries.len(),
            relevant = ranked.len(),
            sessions = sessions.len(),
            manual = manual.len(),
            "Filtered memory entries"
        );
        Ok((sessions, manual))
    }

    async fn skill_block(&self) -> Result<(String, Vec<String>), StorageError> {
        let mut skills = self.store.skills().await?;
        let now = Utc::now();
        let mut block = String::new();
        let mut active = Vec::new();

        for skill in skills.iter_mut().filter(|s| s.score > VIABLE_SKILL_SCORE) {
            if active.is_empty() {
                block.push_str("\n\n[Learned skills: apply when relevant]");
            }
            block.push_str(&format!("\n- {}: {}", skill.name, skill.instruction));
            skill.usage_count += 1;
            skill.last_used_at = Some(now);
            active.push(skill.name.clone());
        }

        if !active.is_empty() {
            self.store.set_skills(&skills).await?;
        }
        Ok((block, active))
    }
}

fn stats(layer: &'static str, items: usize, chars: usize) -> LayerStats {
    LayerStats { layer, items, chars }
}

type EntryRef<'a> = (&'a String, &'a Value);

/// Split entries into (session summaries oldest first, manual entries in insertion order).
fn split_sessions<'a>(
    entries: impl Iterator<Item = EntryRef<'a>>,
) -> (Vec<EntryRef<'a>>, Vec<EntryRef<'a>>) {
    let (mut sessions, manual): (Vec<_>, Vec<_>) = entries.partition(|(k, _)| is_session_key(k));
    sessions.sort_by_key(|(k, _)| session_timestamp(k).unwrap_or(0));
    (sessions, manual)
}

/// The current-turn text: host annotations, then the raw input.
fn annotate(input: &TurnInput) -> String {
    let mut text = String::new();
    if let Some(page) = &input.page {
        match (&page.title, &page.url) {
            (Some(title), Some(url)) => text.push_str(&format!("[Current page: {title} ({url})]\n")),
            (Some(title), None) => text.push_str(&format!("[Current page: {title}]\n")),
            (None, Some(url)) => text.push_str(&format!("[Current page: {url}]\n")),
            (None, None) => {}
        }
        if let Some(selection) = page.selection.as_deref().filter(|s| !s.trim().is_empty()) {
            text.push_str(&format!("[Selected text: {selection}]\n"));
        }
    }
    if let Some(captured) = input.captured.as_deref().filter(|s| !s.trim().is_empty()) {
        text.push_str(&format!("[Captured context: {captured}]\n"));
    }
    text.push_str(&input.message);
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::test_helpers::{KeywordEmbedder, memory_store};
    use chrono::DateTime;
    use mindloop_core::memory::Skill;
    use mindloop_core::message::Role;
    use mindloop_core::storage::KeyValueStore;
    use mindloop_memory::InMemoryStore;
    use mindloop_memory::relevance::COMPOSE_THRESHOLD;
    use serde_json::json;
    use std::sync::Arc;

    fn composer(store: &MemoryStore) -> ContextComposer {
        ContextComposer::new(store.clone(), RelevanceFilter::new(None, COMPOSE_THRESHOLD))
    }

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    fn last(ctx: &ComposedContext) -> &str {
        &ctx.stack.last().unwrap().content
    }

    #[tokio::test]
    async fn empty_store_yields_only_current_turn() {
        let store = memory_store();
        let ctx = composer(&store).compose(&TurnInput::new("hi"), &[]).await.unwrap();
        assert_eq!(ctx.stack, vec![ChatMessage::user("hi")]);
        assert!(ctx.active_skills.is_empty());
    }

    #[tokio::test]
    async fn narrative_becomes_prior_exchange() {
        let store = memory_store();
        store.set_condensed_narrative("we discussed tokens").await.unwrap();
        let ctx = composer(&store).compose(&TurnInput::new("hi"), &[]).await.unwrap();
        assert_eq!(ctx.stack[0].content, "[Previous history: we discussed tokens]");
        assert_eq!(ctx.stack[1], ChatMessage::assistant("Understood."));
        assert_eq!(ctx.stack.len(), 3);
    }

    #[tokio::test]
    async fn only_last_30_history_turns() {
        let store = memory_store();
        let history: Vec<_> = (0..40)
            .map(|i| HistoryMessage::new(if i % 2 == 0 { Role::User } else { Role::Assistant }, format!("t{i}")))
            .collect();
        let ctx = composer(&store).compose(&TurnInput::new("now"), &history).await.unwrap();
        assert_eq!(ctx.stack.len(), 31);
        assert_eq!(ctx.stack[0].content, "t10");
        assert_eq!(ctx.stack[29].content, "t39");
    }

    #[tokio::test]
    async fn annotations_prefix_the_input() {
        let store = memory_store();
        let input = TurnInput {
            message: "what is this?".into(),
            page: Some(PageContext {
                title: Some("Docs".into()),
                url: Some("https://x.dev".into()),
                selection: Some("fn main".into()),
            }),
            captured: Some("clipboard".into()),
        };
        let ctx = composer(&store).compose(&input, &[]).await.unwrap();
        assert_eq!(
            last(&ctx),
            "[Current page: Docs (https://x.dev)]\n[Selected text: fn main]\n[Captured context: clipboard]\nwhat is this?"
        );
    }

    #[tokio::test]
    async fn oversized_profile_is_truncated_and_persisted() {
        let store = memory_store();
        let mut big = Map::new();
        for i in 0..55 {
            big.insert(format!("k{i}"), json!(i));
        }
        // Write around the accessor's cap to simulate an old store
        let mut raw = Map::new();
        raw.insert("profile".into(), Value::Object(big));
        store.backend().set(raw).await.unwrap();

        let ctx = composer(&store).compose(&TurnInput::new("hi"), &[]).await.unwrap();
        assert!(last(&ctx).contains("[User profile]"));
        assert!(!last(&ctx).contains("- k4: 4"));
        assert!(last(&ctx).contains("- k54: 54"));
        assert_eq!(store.profile().await.unwrap().len(), 50);
    }

    #[tokio::test]
    async fn six_entries_are_injected_unfiltered() {
        let store = memory_store();
        for i in 0..4 {
            store.save_memory(&format!("fact{i}"), json!(format!("unrelated {i}"))).await.unwrap();
        }
        store.add_session_summary(at(1_000), "first session").await.unwrap();
        store.add_session_summary(at(2_000), "second session").await.unwrap();

        let ctx = composer(&store).compose(&TurnInput::new("weather?"), &[]).await.unwrap();
        let text = last(&ctx);
        for i in 0..4 {
            assert!(text.contains(&format!("fact{i}: unrelated {i}")));
        }
        assert!(text.contains("- first session"));
        assert!(text.contains("- second session"));
    }

    #[tokio::test]
    async fn seven_entries_activate_filtering() {
        let store = memory_store();
        for i in 0..6 {
            store.save_memory(&format!("fact{i}"), json!(format!("colour {i}"))).await.unwrap();
        }
        store.save_memory("wallet", json!("deployer wallet 0xabc")).await.unwrap();

        let ctx = composer(&store).compose(&TurnInput::new("deployer wallet"), &[]).await.unwrap();
        let text = last(&ctx);
        assert!(text.contains("wallet: deployer wallet 0xabc"));
        assert!(!text.contains("fact0"));
    }

    #[tokio::test]
    async fn newest_session_always_included() {
        let store = memory_store();
        for i in 0..5 {
            store.add_session_summary(at(1_000 + i), &format!("old chat {i}")).await.unwrap();
        }
        store.add_session_summary(at(9_000), "latest chat about gardening").await.unwrap();
        store.save_memory("wallet", json!("deployer wallet 0xabc")).await.unwrap();

        let ctx = composer(&store).compose(&TurnInput::new("deployer wallet"), &[]).await.unwrap();
        let text = last(&ctx);
        assert!(text.contains("[Recent session summaries]\n- latest chat about gardening"));
        assert!(!text.contains("old chat 0"));
        assert!(text.contains("wallet: deployer wallet 0xabc"));
    }

    #[tokio::test]
    async fn small_manual_set_shown_when_none_relevant() {
        let store = memory_store();
        for i in 0..5 {
            store.add_session_summary(at(1_000 + i), &format!("chat {i}")).await.unwrap();
        }
        store.save_memory("pet", json!("cat named Miso")).await.unwrap();
        store.save_memory("city", json!("Lisbon")).await.unwrap();

        let ctx = composer(&store).compose(&TurnInput::new("quantum physics"), &[]).await.unwrap();
        let text = last(&ctx);
        assert!(text.contains("[Saved memories]\n- pet: cat named Miso\n- city: Lisbon"));
    }

    /// Shares `inner` for reads, rejects every write.
    struct ReadOnlyStore(Arc<dyn KeyValueStore>);

    #[async_trait::async_trait]
    impl KeyValueStore for ReadOnlyStore {
        fn name(&self) -> &str {
            "read-only"
        }

        async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, StorageError> {
            self.0.get(keys).await
        }

        async fn set(&self, _entries: Map<String, Value>) -> Result<(), StorageError> {
            Err(StorageError::Write("read-only".into()))
        }
    }

    #[tokio::test]
    async fn embedding_cache_write_failure_fails_compose() {
        let backend: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::new());
        let writable = MemoryStore::new(backend.clone());
        for i in 0..7 {
            writable.save_memory(&format!("fact{i}"), json!("my wallet")).await.unwrap();
        }

        let store = MemoryStore::new(Arc::new(ReadOnlyStore(backend)));
        let filter = RelevanceFilter::new(Some(Arc::new(KeywordEmbedder)), COMPOSE_THRESHOLD);
        let result = ContextComposer::new(store, filter)
            .compose(&TurnInput::new("wallet"), &[])
            .await;
        assert!(matches!(result, Err(StorageError::Write(_))));
    }

    #[tokio::test]
    async fn semantic_filter_used_when_embedder_available() {
        let store = memory_store();
        for i in 0..6 {
            store.save_memory(&format!("fact{i}"), json!("about tokens")).await.unwrap();
        }
        store.save_memory("w", json!("my wallet")).await.unwrap();

        let filter = RelevanceFilter::new(Some(Arc::new(KeywordEmbedder)), COMPOSE_THRESHOLD);
        let ctx = ContextComposer::new(store.clone(), filter)
            .compose(&TurnInput::new("wallet"), &[])
            .await
            .unwrap();
        assert!(last(&ctx).contains("- w: my wallet"));
        assert!(!store.embedding_cache().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn viable_skills_injected_and_usage_recorded() {
        let store = memory_store();
        let mut weak = Skill::new("weak", "never shown");
        weak.score = 15;
        store
            .set_skills(&[Skill::new("concise", "Keep answers short"), weak])
            .await
            .unwrap();

        let ctx = composer(&store).compose(&TurnInput::new("hi"), &[]).await.unwrap();
        assert_eq!(ctx.active_skills, vec!["concise"]);
        assert!(last(&ctx).contains("- concise: Keep answers short"));
        assert!(!last(&ctx).contains("never shown"));

        let skills = store.skills().await.unwrap();
        assert_eq!(skills[0].usage_count, 1);
        assert!(skills[0].last_used_at.is_some());
        assert_eq!(skills[1].usage_count, 0);
    }

    #[tokio::test]
    async fn layers_are_reported_in_order() {
        let store = memory_store();
        let ctx = composer(&store).compose(&TurnInput::new("hi"), &[]).await.unwrap();
        let names: Vec<_> = ctx.layers.iter().map(|l| l.layer).collect();
        assert_eq!(names, vec!["narrative", "history", "profile", "memory", "skills"]);
    }
}
