//! Embedding generation trait and HTTP implementations.
//!
//! The [`Embedder`] trait abstracts over embedding providers.
//! [`OpenAiEmbedder`] calls an OpenAI-compatible `/embeddings` endpoint
//! (Docker Model Runner's llama.cpp engine), [`OllamaEmbedder`] calls the
//! Ollama `/api/embed` endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ModelDialect;

/// Core embedding generation interface.
///
/// All implementations must be `Send + Sync` to allow shared use across
/// async task boundaries.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding vector for the given text.
    ///
    /// # Errors
    ///
    /// Returns an error if the embedding provider is unreachable or the
    /// request fails.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// The embedding model identifier.
    fn model_id(&self) -> &str;
}

/// Errors from embedding generation.
#[derive(Debug, thiserror::Error)]
pub enum EmbedderError {
    /// HTTP transport failure.
    #[error("embedder request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Response did not match expected format.
    #[error("embedder response parse error: {0}")]
    Parse(String),

    /// Provider is unavailable.
    #[error("embedder unavailable: {0}")]
    Unavailable(String),
}

/// Instantiate an embedder for the configured wire dialect.
pub fn build_embedder(
    dialect: ModelDialect,
    base_url: &str,
    model: &str,
    api_key: Option<String>,
) -> Arc<dyn Embedder> {
    match dialect {
        ModelDialect::OpenAi => Arc::new(OpenAiEmbedder::new(base_url, model, api_key)),
        ModelDialect::Ollama => Arc::new(OllamaEmbedder::with_base_url(model, base_url)),
    }
}

async fn read_success(response: reqwest::Response, who: &str) -> Result<String, EmbedderError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(EmbedderError::Unavailable(format!(
            "{who} returned {status}: {body}"
        )));
    }
    Ok(body)
}

// ---------------------------------------------------------------------------
// OpenAI-compatible
// ---------------------------------------------------------------------------

/// OpenAI-compatible embedder using the `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    model: String,
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for OpenAiEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbedder")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl OpenAiEmbedder {
    /// Create an embedder for `model` served under `base_url`.
    pub fn new(base_url: &str, model: &str, api_key: Option<String>) -> Self {
        Self {
            model: model.to_owned(),
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key,
        }
    }
}

/// Parse an OpenAI `/embeddings` response body.
///
/// # Errors
///
/// Returns `EmbedderError::Parse` on malformed JSON or an empty data array.
#[doc(hidden)]
pub fn parse_openai_embedding(body: &str) -> Result<Vec<f32>, EmbedderError> {
    let parsed: OpenAiEmbedResponse =
        serde_json::from_str(body).map_err(|e| EmbedderError::Parse(e.to_string()))?;
    parsed
        .data
        .into_iter()
        .next()
        .map(|d| d.embedding)
        .ok_or_else(|| EmbedderError::Parse("empty data array".to_owned()))
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let url = format!("{}/embeddings", self.base_url);
        let body = OpenAiEmbedRequest {
            model: self.model.clone(),
            input: text.to_owned(),
        };

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.header("authorization", format!("Bearer {key}"));
        }
        let response = builder.send().await?;
        let payload = read_success(response, "embeddings endpoint").await?;
        parse_openai_embedding(&payload)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

// ---------------------------------------------------------------------------
// Ollama
// ---------------------------------------------------------------------------

/// Default base URL for the Ollama API.
const DEFAULT_OLLAMA_BASE_URL: &str = "http://127.0.0.1:11434";

/// Ollama-based embedder using the `/api/embed` endpoint.
///
/// Calls `POST {base_url}/api/embed` with the model name and input text,
/// returning the embedding vector.
pub struct OllamaEmbedder {
    model: String,
    client: reqwest::Client,
    base_url: String,
}

impl std::fmt::Debug for OllamaEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaEmbedder")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OllamaEmbedder {
    /// Create an Ollama embedder for the given model on the default local URL.
    pub fn new(model: &str) -> Self {
        Self::with_base_url(model, DEFAULT_OLLAMA_BASE_URL)
    }

    /// Create an Ollama embedder with a custom base URL.
    pub fn with_base_url(model: &str, base_url: &str) -> Self {
        Self {
            model: model.to_owned(),
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }
}

/// Parse an Ollama `/api/embed` response body.
///
/// # Errors
///
/// Returns `EmbedderError::Parse` on malformed JSON or an empty embeddings array.
#[doc(hidden)]
pub fn parse_ollama_embedding(body: &str) -> Result<Vec<f32>, EmbedderError> {
    let parsed: OllamaEmbedResponse =
        serde_json::from_str(body).map_err(|e| EmbedderError::Parse(e.to_string()))?;
    parsed
        .embeddings
        .into_iter()
        .next()
        .ok_or_else(|| EmbedderError::Parse("empty embeddings array".to_owned()))
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let url = format!("{}/api/embed", self.base_url);
        let body = OllamaEmbedRequest {
            model: self.model.clone(),
            input: text.to_owned(),
        };

        let response = self.client.post(&url).json(&body).send().await?;
        let payload = read_success(response, "ollama").await?;
        parse_ollama_embedding(&payload)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Request body for OpenAI `/embeddings`.
#[derive(Debug, Serialize)]
struct OpenAiEmbedRequest {
    model: String,
    input: String,
}

/// Response body from OpenAI `/embeddings`.
#[derive(Debug, Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedding {
    embedding: Vec<f32>,
}

/// Request body for Ollama `/api/embed`.
#[derive(Debug, Serialize)]
struct OllamaEmbedRequest {
    /// Model name.
    model: String,
    /// Input text to embed.
    input: String,
}

/// Response body from Ollama `/api/embed`.
#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    /// Array of embedding vectors (one per input).
    embeddings: Vec<Vec<f32>>,
}
