//! Text embedding client
//!
//! This module provides the [`EmbeddingModel`] trait and an
//! [`OpenAiCompatibleEmbedding`] client speaking the de facto standard
//! `/embeddings` wire format (OpenAI, Ollama `/v1`, vLLM, LocalAI,
//! LiteLLM, Azure OpenAI).

use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::util::mask_api_key;

/// Trait for single-text embedding models
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Generate an embedding vector for the given text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// The embedding dimension, or 0 if not yet known
    ///
    /// Implementations may auto-detect the dimension on the first
    /// successful [`embed`](Self::embed) call.
    fn dimension(&self) -> usize;
}

/// Configuration for [`OpenAiCompatibleEmbedding`]
#[derive(Clone)]
pub struct EmbeddingConfig {
    /// API base, e.g. `https://api.openai.com/v1` or `http://localhost:11434/v1`
    pub base_url: String,
    /// Optional bearer token; not required for local servers
    pub api_key: Option<String>,
    /// Model name, e.g. `text-embedding-3-small`, `nomic-embed-text`
    pub model: String,
    /// Known dimension; auto-detected on first call when 0
    pub dimension: i32,
}

impl fmt::Debug for EmbeddingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_deref().map(mask_api_key))
            .field("model", &self.model)
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl EmbeddingConfig {
    /// Create a config for the given base URL and model
    #[must_use]
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            model: model.into(),
            dimension: 0,
        }
    }

    /// Set the API key
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set a known dimension, skipping auto-detection
    #[must_use]
    pub fn with_dimension(mut self, dimension: i32) -> Self {
        self.dimension = dimension;
        self
    }
}

/// Embedding client for OpenAI-compatible `/embeddings` endpoints
pub struct OpenAiCompatibleEmbedding {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dim: AtomicI32,
}

impl OpenAiCompatibleEmbedding {
    /// Create a new embedding client
    #[must_use]
    pub fn new(config: EmbeddingConfig) -> Self {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        info!(
            model = %config.model,
            base_url = %base_url,
            dimension = config.dimension,
            "embedding client created"
        );
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key: config.api_key,
            model: config.model,
            dim: AtomicI32::new(config.dimension),
        }
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingModel for OpenAiCompatibleEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        debug!(model = %self.model, text_len = text.len(), "generating embedding");

        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });

        let mut request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(status = status.as_u16(), "embedding API returned error");
            return Err(Error::Api(format!(
                "embedding API returned status {status}: {body}"
            )));
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(e.to_string()))?;

        let Some(first) = result.data.into_iter().next() else {
            error!("no embedding returned from API");
            return Err(Error::NoEmbedding);
        };
        let embedding = first.embedding;

        // Auto-detect the dimension on the first successful call. The CAS
        // only ever moves the value away from zero, so a configured or
        // already-detected dimension is never overwritten.
        if !embedding.is_empty() && self.dim.load(Ordering::Relaxed) == 0 {
            let detected = i32::try_from(embedding.len()).unwrap_or(i32::MAX);
            if self
                .dim
                .compare_exchange(0, detected, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok()
            {
                info!(dimension = detected, "auto-detected embedding dimension");
            }
        }

        debug!(dimension = embedding.len(), "embedding generated");
        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        usize::try_from(self.dim.load(Ordering::Relaxed)).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn embedding_body(vector: &[f32]) -> serde_json::Value {
        serde_json::json!({
            "data": [{"embedding": vector, "index": 0}],
            "model": "test-embed",
            "usage": {"prompt_tokens": 2, "total_tokens": 2}
        })
    }

    #[tokio::test]
    async fn test_embed_and_dimension_auto_detection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(body_partial_json(serde_json::json!({"model": "test-embed"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(embedding_body(&[0.1, 0.2, 0.3])))
            .mount(&server)
            .await;

        // Trailing slash on the base URL is trimmed.
        let client = OpenAiCompatibleEmbedding::new(EmbeddingConfig::new(
            format!("{}/", server.uri()),
            "test-embed",
        ));

        assert_eq!(client.dimension(), 0);
        let vector = client.embed("hello").await.unwrap();
        assert_eq!(vector.len(), 3);
        assert_eq!(client.dimension(), 3);
    }

    #[tokio::test]
    async fn test_dimension_detection_is_idempotent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(embedding_body(&[0.5, 0.5, 0.5, 0.5])),
            )
            .mount(&server)
            .await;

        let client =
            OpenAiCompatibleEmbedding::new(EmbeddingConfig::new(server.uri(), "test-embed"));

        client.embed("first").await.unwrap();
        assert_eq!(client.dimension(), 4);
        client.embed("second").await.unwrap();
        assert_eq!(client.dimension(), 4);
    }

    #[tokio::test]
    async fn test_bearer_header_sent_when_key_configured() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("Authorization", "Bearer sk-test-1234567890"))
            .respond_with(ResponseTemplate::new(200).set_body_json(embedding_body(&[1.0])))
            .mount(&server)
            .await;

        let client = OpenAiCompatibleEmbedding::new(
            EmbeddingConfig::new(server.uri(), "test-embed").with_api_key("sk-test-1234567890"),
        );
        client.embed("authed").await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_data_is_a_distinct_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [], "model": "test-embed", "usage": {"prompt_tokens": 0, "total_tokens": 0}
            })))
            .mount(&server)
            .await;

        let client =
            OpenAiCompatibleEmbedding::new(EmbeddingConfig::new(server.uri(), "test-embed"));
        assert!(matches!(
            client.embed("empty").await,
            Err(Error::NoEmbedding)
        ));
        assert_eq!(client.dimension(), 0);
    }

    #[tokio::test]
    async fn test_error_status_surfaces_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model overloaded"))
            .mount(&server)
            .await;

        let client =
            OpenAiCompatibleEmbedding::new(EmbeddingConfig::new(server.uri(), "test-embed"));
        let err = client.embed("boom").await.unwrap_err();
        assert!(err.to_string().contains("model overloaded"));
    }

    #[test]
    fn test_config_debug_masks_key() {
        let config = EmbeddingConfig::new("http://localhost:11434/v1", "nomic-embed-text")
            .with_api_key("sk-1234567890abcdef");
        let debug_str = format!("{config:?}");
        assert!(!debug_str.contains("1234567890"));
    }
}
