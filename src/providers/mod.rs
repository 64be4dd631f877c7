//! LLM provider abstraction layer.
//!
//! Defines the [`LlmProvider`] trait and the shared request/response types
//! used by all provider implementations.
//!
//! Two wire dialects are implemented:
//! - [`openai::OpenAiProvider`]: OpenAI-compatible `/chat/completions`
//!   (Docker Model Runner, llama.cpp server, vLLM, ...)
//! - [`ollama::OllamaProvider`]: Ollama `/api/chat` API
//!
//! [`build_provider`] instantiates the right one for a configured dialect.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;

use crate::config::ModelDialect;

pub mod ollama;
pub mod openai;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Conversation participant role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message.
    System,
    /// Human user message.
    User,
    /// Assistant (LLM) message.
    Assistant,
}

impl Role {
    /// Wire name shared by both dialects.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A message in a conversation with an LLM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message author.
    pub role: Role,
    /// Plain text content.
    pub content: String,
}

impl Message {
    /// Build a system-role message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Build a user-role message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Build an assistant-role message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// JSON Schema definition for a tool the LLM can call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (must match the executor's catalog).
    pub name: String,
    /// Description shown to the LLM.
    pub description: String,
    /// JSON Schema object for the tool's parameters.
    pub input_schema: serde_json::Value,
}

/// A tool call requested by the model.
///
/// Arguments stay as raw JSON text here; typing them is the dispatcher's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call identifier (provider-assigned or generated).
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Arguments encoded as a JSON string.
    pub arguments: String,
}

// ---------------------------------------------------------------------------
// Request / Response
// ---------------------------------------------------------------------------

/// A request to an LLM provider for a completion.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// Full message list, system prompt included.
    pub messages: Vec<Message>,
    /// Tools available to the LLM for this call.
    pub tools: Vec<ToolDefinition>,
    /// Sampling temperature.
    pub temperature: Option<f32>,
}

/// The response from a non-streaming completion.
#[derive(Debug, Clone, Default)]
pub struct CompletionResponse {
    /// Text content, empty when the model only called tools.
    pub text: String,
    /// Tool calls requested by the model.
    pub tool_calls: Vec<ToolCall>,
    /// The model identifier that served this response.
    pub model: String,
}

/// Incremental text fragments of a streaming completion.
///
/// Dropping the stream stops the upstream completion.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by model providers.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP transport failure.
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Response did not match expected schema.
    #[error("provider response parse error: {0}")]
    Parse(String),
    /// Upstream provider responded with an error status.
    #[error("provider returned non-success status {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Raw response body.
        body: String,
    },
    /// Provider cannot satisfy the request with current configuration.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// HTTP helpers (useful for all providers)
// ---------------------------------------------------------------------------

/// Check HTTP response status and return body text or a structured error.
///
/// # Errors
///
/// Returns `ProviderError::Request` on transport failure, `ProviderError::HttpStatus` on non-2xx.
pub async fn check_http_response(response: reqwest::Response) -> Result<String, ProviderError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ProviderError::HttpStatus {
            status: status.as_u16(),
            body: sanitize_http_error_body(&body),
        });
    }
    Ok(body)
}

/// Fail early on a non-2xx streaming response, keeping the body for the error.
///
/// # Errors
///
/// Returns `ProviderError::HttpStatus` on non-2xx.
pub async fn check_stream_response(
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::HttpStatus {
        status: status.as_u16(),
        body: sanitize_http_error_body(&body),
    })
}

fn sanitize_http_error_body(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut sanitized = collapsed;
    for pattern in [r"sk-[A-Za-z0-9_\-]{20,}", r"hf_[A-Za-z0-9]{20,}"] {
        if let Ok(regex) = Regex::new(pattern) {
            sanitized = regex.replace_all(&sanitized, "[REDACTED]").into_owned();
        }
    }

    const MAX_ERROR_BODY_CHARS: usize = 256;
    if sanitized.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = sanitized
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect::<String>();
        return format!("{shortened}...[truncated]");
    }

    sanitized
}

/// Buffered fragments between the reader task and the consumer.
const STREAM_CHANNEL_CAPACITY: usize = 64;

/// One decoded line of a streaming response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A text fragment to forward.
    Fragment(String),
    /// The last text fragment; the completion ends with it.
    Final(String),
    /// The provider signalled the end of the completion.
    Done,
    /// Keep-alive, metadata, or an empty delta.
    Skip,
}

/// Sender half of the channel behind a [`FragmentStream`].
type FragmentSender = mpsc::Sender<Result<String, ProviderError>>;

/// What the reader task does after one line.
enum LineFlow {
    Continue,
    Finished,
    Stop,
}

/// Turn a line-oriented streaming HTTP response into a [`FragmentStream`].
///
/// A reader task decodes each complete line with `parse_line` and forwards
/// fragments through a bounded channel. The task exits, dropping the HTTP
/// response and thereby stopping the upstream completion, as soon as the
/// consumer drops the returned stream.
///
/// A body that ends without the provider's end-of-completion marker yields a
/// trailing [`ProviderError::Parse`]. An unterminated last line is still
/// decoded first.
pub(crate) fn spawn_line_stream(
    response: reqwest::Response,
    parse_line: fn(&str) -> Result<StreamEvent, ProviderError>,
) -> FragmentStream {
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let mut body = Box::pin(response.bytes_stream());
        let mut buffer: Vec<u8> = Vec::new();
        loop {
            let chunk = tokio::select! {
                chunk = body.next() => chunk,
                () = tx.closed() => {
                    debug!("fragment consumer dropped, abandoning completion");
                    return;
                }
            };
            let Some(chunk) = chunk else {
                let tail = String::from_utf8_lossy(&buffer).trim().to_owned();
                if !tail.is_empty() {
                    match forward_line(&tx, parse_line, &tail).await {
                        LineFlow::Continue => {}
                        LineFlow::Finished | LineFlow::Stop => return,
                    }
                }
                debug!("response body ended before the completion finished");
                let _ = tx
                    .send(Err(ProviderError::Parse(
                        "stream ended before completion".to_owned(),
                    )))
                    .await;
                return;
            };
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    let _ = tx.send(Err(ProviderError::Request(e))).await;
                    return;
                }
            };
            buffer.extend_from_slice(&chunk);
            for line in drain_lines(&mut buffer) {
                match forward_line(&tx, parse_line, &line).await {
                    LineFlow::Continue => {}
                    LineFlow::Finished | LineFlow::Stop => return,
                }
            }
        }
    });
    Box::pin(ReceiverStream::new(rx))
}

async fn forward_line(
    tx: &FragmentSender,
    parse_line: fn(&str) -> Result<StreamEvent, ProviderError>,
    line: &str,
) -> LineFlow {
    match parse_line(line) {
        Ok(StreamEvent::Fragment(text)) => {
            if tx.send(Ok(text)).await.is_err() {
                LineFlow::Stop
            } else {
                LineFlow::Continue
            }
        }
        Ok(StreamEvent::Final(text)) => {
            let _ = tx.send(Ok(text)).await;
            LineFlow::Finished
        }
        Ok(StreamEvent::Done) => LineFlow::Finished,
        Ok(StreamEvent::Skip) => LineFlow::Continue,
        Err(e) => {
            let _ = tx.send(Err(e)).await;
            LineFlow::Stop
        }
    }
}

/// Split complete lines off the front of a byte buffer.
///
/// Incomplete trailing data stays in `buffer` until the next chunk arrives,
/// so multi-byte characters split across chunks are decoded intact.
pub(crate) fn drain_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
        let line: Vec<u8> = buffer.drain(..=pos).collect();
        lines.push(String::from_utf8_lossy(&line).trim().to_owned());
    }
    lines
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Core LLM provider interface.
///
/// All provider implementations must be `Send + Sync` to allow use
/// across request handler tasks.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Request a single, non-streaming completion.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on API, network, or parse failure.
    async fn complete(&self, request: CompletionRequest)
        -> Result<CompletionResponse, ProviderError>;

    /// Start a streaming completion.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if the stream cannot be opened. Failures
    /// after the first fragment arrive as items of the stream.
    async fn stream(&self, request: CompletionRequest) -> Result<FragmentStream, ProviderError>;

    /// The model identifier string this provider is instantiated for.
    fn model_id(&self) -> &str;
}

/// Instantiate a provider for the configured wire dialect.
pub fn build_provider(
    dialect: ModelDialect,
    base_url: &str,
    model: &str,
    api_key: Option<String>,
) -> Arc<dyn LlmProvider> {
    match dialect {
        ModelDialect::OpenAi => Arc::new(openai::OpenAiProvider::new(
            base_url.to_owned(),
            model.to_owned(),
            api_key,
        )),
        ModelDialect::Ollama => Arc::new(ollama::OllamaProvider::with_base_url(
            model.to_owned(),
            base_url.to_owned(),
        )),
    }
}

/// Serialize tool calls for diagnostics.
pub fn tool_calls_as_text(calls: &[ToolCall]) -> String {
    serde_json::to_string_pretty(calls).unwrap_or_else(|_| format!("{calls:?}"))
}
