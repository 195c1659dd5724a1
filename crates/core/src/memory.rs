//! Persisted memory data model.
//!
//! The memory store is partitioned into named regions, each held under its
//! own storage key. Caps are enforced at write time by the store accessor so
//! they hold at rest:
//!
//! | Region | Cap | Eviction |
//! |--------|-----|----------|
//! | manual memory entries | 100 | oldest inserted first |
//! | session summaries | 20 | oldest timestamp first |
//! | profile keys | 50 | oldest inserted first |
//! | chat history | 200 messages | oldest first |
//! | embedding cache | 300 vectors | oldest inserted first |
//! | condensed narrative | 4000 chars | keep the most recent tail |
//! | learned skills | pruned by score, not capped | |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::Role;

// ── Region keys ───────────────────────────────────────────────────────────

pub const CONDENSED_NARRATIVE_KEY: &str = "condensedNarrative";
pub const PROFILE_KEY: &str = "profile";
pub const MEMORY_ENTRIES_KEY: &str = "memoryEntries";
pub const SKILLS_KEY: &str = "skills";
pub const CHAT_HISTORY_KEY: &str = "chatHistory";
pub const EMBEDDING_CACHE_KEY: &str = "embeddingCache";
pub const CONVERSATION_COUNT_KEY: &str = "conversationCount";

// ── Caps ──────────────────────────────────────────────────────────────────

pub const MAX_MANUAL_ENTRIES: usize = 100;
pub const MAX_SESSION_SUMMARIES: usize = 20;
pub const MAX_PROFILE_KEYS: usize = 50;
pub const MAX_CHAT_HISTORY: usize = 200;
pub const MAX_EMBEDDING_CACHE: usize = 300;
pub const MAX_NARRATIVE_CHARS: usize = 4000;

/// Prefix marking a memory entry as an automatic session summary.
pub const SESSION_PREFIX: &str = "session_";

/// Storage key for a session summary written at `at`.
pub fn session_key(at: DateTime<Utc>) -> String {
    format!("{SESSION_PREFIX}{}", at.timestamp_millis())
}

/// Whether a memory entry key names a session summary.
pub fn is_session_key(key: &str) -> bool {
    key.starts_with(SESSION_PREFIX)
}

/// The millisecond timestamp embedded in a session key, if it parses.
pub fn session_timestamp(key: &str) -> Option<i64> {
    key.strip_prefix(SESSION_PREFIX)?.parse().ok()
}

// ── Records ───────────────────────────────────────────────────────────────

/// One raw turn of persisted chat history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: Role,
    pub text: String,
}

impl HistoryMessage {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }
}

/// A persisted, scored behavioral directive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Skill {
    pub name: String,
    pub instruction: String,
    /// 0..=100, starts at 50
    #[serde(default = "default_score")]
    pub score: u8,
    #[serde(default)]
    pub usage_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub eval_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_eval_at: Option<DateTime<Utc>>,
    pub learned_at: DateTime<Utc>,
}

fn default_score() -> u8 {
    50
}

impl Skill {
    /// A freshly learned skill with the default score.
    pub fn new(name: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instruction: instruction.into(),
            score: default_score(),
            usage_count: 0,
            last_used_at: None,
            eval_count: 0,
            last_eval_at: None,
            learned_at: Utc::now(),
        }
    }
}

/// A memory entry ranked against the current input. Transient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevanceCandidate {
    pub key: String,
    pub value: serde_json::Value,
    pub score: f32,
}

/// Render a stored JSON value as plain text (strings unquoted).
pub fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
