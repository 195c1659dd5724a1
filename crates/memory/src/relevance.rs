//! Relevance ranking of memory entries against the current input.
//!
//! Two strategies, each callable on its own:
//! - [`filter_by_keyword`]: term-overlap scoring, always available
//! - [`filter_by_similarity`]: cosine similarity over embeddings, with
//!   per-entry and whole-query keyword fallbacks
//!
//! [`RelevanceFilter`] picks between them using the embedder's capability
//! probe and keeps the persisted embedding cache up to date.

use std::cmp::Ordering;
use std::sync::Arc;

use mindloop_core::error::StorageError;
use mindloop_core::memory::{RelevanceCandidate, value_text};
use mindloop_core::provider::Embedder;
use serde_json::{Map, Value};
use tracing::debug;

use crate::similarity::cosine_similarity;
use crate::store::{EmbeddingCache, MemoryStore};

/// At most this many candidates are returned.
pub const MAX_RELEVANT: usize = 10;

/// Multiplier applied to keyword scores standing in for embedding scores.
pub const KEYWORD_DISCOUNT: f32 = 0.5;

/// Threshold used when composing the message stack.
pub const COMPOSE_THRESHOLD: f32 = 0.2;

/// Threshold used by the standalone recall tool.
pub const RECALL_THRESHOLD: f32 = 0.25;

/// Lower-cased whitespace terms longer than two characters.
pub fn query_terms(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split_whitespace()
        .filter(|t| t.chars().count() > 2)
        .map(str::to_string)
        .collect()
}

fn keyword_score(terms: &[String], key: &str, value: &Value) -> f32 {
    if terms.is_empty() {
        return 0.0;
    }
    let haystack = format!("{key} {}", value_text(value)).to_lowercase();
    let matched = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
    matched as f32 / terms.len() as f32
}

/// Descending by score; `sort_by` is stable so ties keep input order.
fn rank(mut candidates: Vec<RelevanceCandidate>) -> Vec<RelevanceCandidate> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    candidates.truncate(MAX_RELEVANT);
    candidates
}

/// Rank entries by the fraction of query terms they contain.
pub fn filter_by_keyword(query: &str, entries: &Map<String, Value>) -> Vec<RelevanceCandidate> {
    let terms = query_terms(query);
    let candidates = entries
        .iter()
        .filter_map(|(key, value)| {
            let score = keyword_score(&terms, key, value);
            (score > 0.0).then(|| RelevanceCandidate {
                key: key.clone(),
                value: value.clone(),
                score,
            })
        })
        .collect();
    rank(candidates)
}

fn discounted(mut candidates: Vec<RelevanceCandidate>) -> Vec<RelevanceCandidate> {
    for c in &mut candidates {
        c.score *= KEYWORD_DISCOUNT;
    }
    candidates
}

/// Rank entries by embedding similarity, keeping scores above `threshold`.
///
/// Vectors are reused from `cache` by entry key; misses are embedded and
/// inserted. An entry that cannot be embedded is scored by discounted
/// keyword overlap instead. If the query itself cannot be embedded the
/// whole ranking degrades to discounted keyword scores.
pub async fn filter_by_similarity(
    query: &str,
    entries: &Map<String, Value>,
    cache: &mut EmbeddingCache,
    embedder: &dyn Embedder,
    threshold: f32,
) -> Vec<RelevanceCandidate> {
    let Some(query_vec) = embedder.embed(query).await else {
        debug!("Query embedding unavailable, using keyword ranking");
        return discounted(filter_by_keyword(query, entries));
    };

    let terms = query_terms(query);
    let mut candidates = Vec::new();
    for (key, value) in entries {
        let score = match cache.get(key) {
            Some(vector) => cosine_similarity(&query_vec, vector),
            None => match embedder.embed(&format!("{key}: {}", value_text(value))).await {
                Some(vector) => {
                    let score = cosine_similarity(&query_vec, &vector);
                    cache.insert(key.clone(), vector);
                    score
                }
                None => keyword_score(&terms, key, value) * KEYWORD_DISCOUNT,
            },
        };
        if score > threshold {
            candidates.push(RelevanceCandidate {
                key: key.clone(),
                value: value.clone(),
                score,
            });
        }
    }
    rank(candidates)
}

/// Chooses the ranking strategy for one call site.
#[derive(Clone)]
pub struct RelevanceFilter {
    embedder: Option<Arc<dyn Embedder>>,
    threshold: f32,
}

impl RelevanceFilter {
    pub fn new(embedder: Option<Arc<dyn Embedder>>, threshold: f32) -> Self {
        Self {
            embedder,
            threshold,
        }
    }

    /// Rank `entries` against `query`, persisting any new embeddings.
    ///
    /// Without a usable embedder this is plain keyword ranking.
    pub async fn rank(
        &self,
        query: &str,
        entries: &Map<String, Value>,
        store: &MemoryStore,
    ) -> Result<Vec<RelevanceCandidate>, StorageError> {
        let embedder = match &self.embedder {
            Some(e) if e.is_available() => e,
            _ => return Ok(filter_by_keyword(query, entries)),
        };

        let mut cache = store.embedding_cache().await?;
        let ranked =
            filter_by_similarity(query, entries, &mut cache, embedder.as_ref(), self.threshold)
                .await;
        if cache.is_dirty() {
            store.set_embedding_cache(&cache).await?;
        }
        Ok(ranked)
    }
}
