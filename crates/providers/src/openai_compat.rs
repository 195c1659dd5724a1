//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI, and any
//! endpoint exposing `/chat/completions` and `/embeddings`.
//!
//! Every request runs under a hard wall-clock limit; expiry is reported as
//! [`ProviderError::Timeout`] so callers can tell it apart from transport
//! and API failures.

use std::time::Duration;

use async_trait::async_trait;
use mindloop_config::AppConfig;
use mindloop_core::error::ProviderError;
use mindloop_core::message::{ChatMessage, Role};
use mindloop_core::provider::{Embedder, ModelClient, ModelSettings};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// An OpenAI-compatible model client and embedder.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    embedding_model: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            embedding_model: None,
            timeout,
            client,
        })
    }

    /// Build from the loaded configuration. Embeddings are enabled when
    /// `[embedding].enabled` is set.
    pub fn from_config(config: &AppConfig) -> Result<Self, ProviderError> {
        let provider = Self::new(
            "openai-compat",
            &config.base_url,
            config.api_key.clone().unwrap_or_default(),
            Duration::from_secs(config.request_timeout_secs),
        )?;
        Ok(if config.embedding.enabled {
            provider.with_embedding_model(&config.embedding.model)
        } else {
            provider
        })
    }

    /// Enable the embedder side with the given model.
    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = Some(model.into());
        self
    }

    /// Convert the system directive and stack to OpenAI API format.
    fn to_api_messages(system: &str, messages: &[ChatMessage]) -> Vec<ApiMessage> {
        let mut out = Vec::with_capacity(messages.len() + 1);
        if !system.is_empty() {
            out.push(ApiMessage {
                role: "system".into(),
                content: Some(system.to_string()),
            });
        }
        out.extend(messages.iter().map(|m| ApiMessage {
            role: match m.role {
                Role::User => "user".into(),
                Role::Assistant => "assistant".into(),
            },
            content: Some(m.content.clone()),
        }));
        out
    }

    fn map_send_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout(self.timeout.as_secs())
        } else {
            ProviderError::Network(e.to_string())
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
        let status = response.status().as_u16();

        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_secs: 5,
            });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        Ok(response)
    }

    async fn complete(
        &self,
        system: &str,
        messages: &[ChatMessage],
        settings: &ModelSettings,
    ) -> Result<String, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = serde_json::json!({
            "model": settings.model,
            "messages": Self::to_api_messages(system, messages),
            "temperature": settings.temperature,
            "stream": false,
        });

        if let Some(max_tokens) = settings.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        debug!(
            provider = %self.name,
            model = %settings.model,
            messages = messages.len(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let response = Self::check_status(response).await?;

        let api_response: ApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse response: {e}"),
            })?;

        api_response.into_text()
    }

    async fn request_embedding(&self, model: &str, text: &str) -> Result<Vec<f32>, ProviderError> {
        let url = format!("{}/embeddings", self.base_url);

        let body = serde_json::json!({
            "model": model,
            "input": text,
            "encoding_format": "float",
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let response = Self::check_status(response).await?;

        let api_resp: EmbeddingApiResponse =
            response.json().await.map_err(|e| ProviderError::ApiError {
                status_code: 200,
                message: format!("Failed to parse embedding response: {e}"),
            })?;

        api_resp
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 200,
                message: "No embedding in response".into(),
            })
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(
        &self,
        system: &str,
        messages: &[ChatMessage],
        settings: &ModelSettings,
    ) -> Result<String, ProviderError> {
        if !ModelClient::is_available(self) {
            return Err(ProviderError::NotConfigured(
                "no API key set (MINDLOOP_API_KEY or OPENAI_API_KEY)".into(),
            ));
        }
        match tokio::time::timeout(self.timeout, self.complete(system, messages, settings)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(self.timeout.as_secs())),
        }
    }

    fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }
}

#[async_trait]
impl Embedder for OpenAiCompatProvider {
    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let model = self.embedding_model.as_deref()?;
        if self.api_key.is_empty() {
            return None;
        }
        match tokio::time::timeout(self.timeout, self.request_embedding(model, text)).await {
            Ok(Ok(vector)) => Some(vector),
            Ok(Err(e)) => {
                debug!(provider = %self.name, error = %e, "Embedding failed");
                None
            }
            Err(_) => {
                debug!(provider = %self.name, "Embedding timed out");
                None
            }
        }
    }

    fn is_available(&self) -> bool {
        self.embedding_model.is_some() && !self.api_key.is_empty()
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

impl ApiResponse {
    fn into_text(self) -> Result<String, ProviderError> {
        self.choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 200,
                message: "No choices in response".into(),
            })
    }
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

// --- Embedding API types ---

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}
