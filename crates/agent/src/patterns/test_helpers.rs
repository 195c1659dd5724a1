//! Shared test helpers for agent tests.

use async_trait::async_trait;
use mindloop_core::error::ProviderError;
use mindloop_core::message::ChatMessage;
use mindloop_core::provider::{Embedder, ModelClient, ModelSettings};
use mindloop_memory::{InMemoryStore, MemoryStore};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// One recorded model call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub system: String,
    pub messages: Vec<ChatMessage>,
}

/// A mock model that returns a sequence of scripted replies.
///
/// Each call takes the next reply from the queue. Once the queue is empty
/// every call fails with an API error, so "the model is down" needs no
/// separate mock.
pub struct SequentialMockModel {
    replies: Mutex<VecDeque<Result<String, String>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl SequentialMockModel {
    pub fn new(replies: Vec<String>) -> Self {
        Self::with_results(replies.into_iter().map(Ok).collect())
    }

    /// Script successes and failures in order.
    pub fn with_results(replies: Vec<Result<String, String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelClient for SequentialMockModel {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn call(
        &self,
        system: &str,
        messages: &[ChatMessage],
        _settings: &ModelSettings,
    ) -> Result<String, ProviderError> {
        self.calls.lock().unwrap().push(RecordedCall {
            system: system.to_string(),
            messages: messages.to_vec(),
        });
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(ProviderError::ApiError {
                status_code: 500,
                message,
            }),
            None => Err(ProviderError::ApiError {
                status_code: 503,
                message: "no scripted reply left".into(),
            }),
        }
    }
}

const VOCABULARY: &[&str] = &["wallet", "token", "deploy", "garden", "recipe", "travel"];

/// Embeds text as a bag of vocabulary hits plus a small bias, so unrelated
/// texts score well under the relevance thresholds.
pub struct KeywordEmbedder;

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let lower = text.to_lowercase();
        Some(
            VOCABULARY
                .iter()
                .map(|word| if lower.contains(word) { 1.05 } else { 0.05 })
                .collect(),
        )
    }
}

/// A memory store over a fresh in-memory backend.
pub fn memory_store() -> MemoryStore {
    MemoryStore::new(Arc::new(InMemoryStore::new()))
}
