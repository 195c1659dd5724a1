//! Model-call and embedding contracts.
//!
//! The language model is an external collaborator: a pure request/response
//! function that returns raw text. That text may contain think and tool tags;
//! parsing them is the caller's job, never the client's.
//!
//! Implementations: OpenAI-compatible HTTP endpoints, scripted mocks in tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::ChatMessage;

/// Per-call generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSettings {
    /// The model to use (e.g., "gpt-4o-mini")
    pub model: String,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

fn default_temperature() -> f32 {
    0.7
}

impl ModelSettings {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: default_temperature(),
            max_tokens: None,
        }
    }

    /// Same model, low temperature. Used for maintenance prompts that expect
    /// structured output.
    pub fn precise(&self) -> Self {
        Self {
            temperature: 0.2,
            ..self.clone()
        }
    }
}

/// The model-call contract.
///
/// `call` must enforce a hard wall-clock limit and report its expiry as
/// [`ProviderError::Timeout`].
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// A human-readable name for this client (e.g., "openai").
    fn name(&self) -> &str;

    /// Send the system directive and message stack, get raw text back.
    async fn call(
        &self,
        system: &str,
        messages: &[ChatMessage],
        settings: &ModelSettings,
    ) -> Result<String, ProviderError>;

    /// Capability probe: can this client reach a model at all?
    fn is_available(&self) -> bool {
        true
    }
}

/// The embedding contract.
///
/// `embed` never fails to the caller: any transport or auth problem yields
/// `None`, and every consumer carries a keyword fallback.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Option<Vec<f32>>;

    /// Capability probe: are credentials configured?
    fn is_available(&self) -> bool {
        true
    }
}
