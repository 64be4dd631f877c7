//! Ollama provider implementation using the `/api/chat` API.
//!
//! Streaming responses are newline-delimited JSON objects, the last one
//! carrying `"done": true`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    check_http_response, check_stream_response, spawn_line_stream, CompletionRequest,
    CompletionResponse, FragmentStream, LlmProvider, ProviderError, StreamEvent, ToolCall,
};

/// Default Ollama API base URL.
pub const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

// ---------------------------------------------------------------------------
// Wire types (pub for integration testing)
// ---------------------------------------------------------------------------

/// Ollama chat API request body.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct OllamaRequest {
    /// Model name.
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<OllamaMessage>,
    /// Whether to stream NDJSON chunks.
    pub stream: bool,
    /// Tool definitions.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    /// Generation options.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<OllamaOptions>,
}

/// A message in Ollama format.
#[doc(hidden)]
#[derive(Debug, Serialize, Deserialize)]
pub struct OllamaMessage {
    /// Role: "system", "user", or "assistant".
    pub role: String,
    /// Message content.
    pub content: String,
}

/// Ollama generation options.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct OllamaOptions {
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Ollama chat API response body (also one streaming chunk).
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct OllamaResponse {
    /// Response message.
    #[serde(default)]
    pub message: Option<OllamaResponseMessage>,
    /// Model that served the response.
    #[serde(default)]
    pub model: String,
    /// Set on the final streaming chunk.
    #[serde(default)]
    pub done: bool,
    /// In-band error message.
    pub error: Option<String>,
}

/// The message part of an Ollama response.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct OllamaResponseMessage {
    /// Message content.
    #[serde(default)]
    pub content: String,
    /// Tool calls, if any.
    pub tool_calls: Option<Vec<OllamaToolCall>>,
}

/// A tool call in Ollama format.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct OllamaToolCall {
    /// Function call details.
    pub function: OllamaFunction,
}

/// Function call details in Ollama format.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct OllamaFunction {
    /// Function name.
    pub name: String,
    /// Function arguments as JSON.
    pub arguments: Value,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// Ollama chat API provider.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    /// Model name passed to Ollama.
    #[doc(hidden)]
    pub model: String,
    /// Base URL for the Ollama API.
    #[doc(hidden)]
    pub base_url: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    /// Create an Ollama provider on the default local URL.
    pub fn new(model_name: String) -> Self {
        Self::with_base_url(model_name, DEFAULT_OLLAMA_URL.to_owned())
    }

    /// Create an Ollama provider with a custom base URL.
    pub fn with_base_url(model_name: String, base_url: String) -> Self {
        Self {
            model: model_name,
            base_url,
            client: reqwest::Client::new(),
        }
    }

    /// Check whether the Ollama server is reachable.
    pub async fn is_available(&self) -> bool {
        let url = format!("{}/api/tags", self.base_url.trim_end_matches('/'));
        self.client.get(&url).send().await.is_ok()
    }

    fn post(&self, body: &OllamaRequest) -> reqwest::RequestBuilder {
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        self.client
            .post(url)
            .header("content-type", "application/json")
            .json(body)
    }
}

// ---------------------------------------------------------------------------
// Request / Response builders (pub for integration testing)
// ---------------------------------------------------------------------------

/// Build an Ollama API request from a completion request.
#[doc(hidden)]
pub fn build_request(model: &str, request: &CompletionRequest, stream: bool) -> OllamaRequest {
    let messages = request
        .messages
        .iter()
        .map(|msg| OllamaMessage {
            role: msg.role.as_str().to_owned(),
            content: msg.content.clone(),
        })
        .collect();

    let tools: Vec<Value> = request
        .tools
        .iter()
        .map(|t| {
            serde_json::json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.input_schema,
                }
            })
        })
        .collect();

    let options = request.temperature.map(|t| OllamaOptions {
        temperature: Some(t),
    });

    OllamaRequest {
        model: model.to_owned(),
        messages,
        stream,
        tools,
        options,
    }
}

/// Parse an Ollama API response into a completion response.
///
/// # Errors
///
/// Returns `ProviderError::Parse` if the response cannot be deserialized.
#[doc(hidden)]
pub fn parse_response(body: &str) -> Result<CompletionResponse, ProviderError> {
    let resp: OllamaResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;
    if let Some(error) = resp.error {
        return Err(ProviderError::Unavailable(error));
    }

    let message = resp
        .message
        .ok_or_else(|| ProviderError::Parse("missing message".to_owned()))?;

    let tool_calls = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| ToolCall {
            id: uuid::Uuid::new_v4().to_string(),
            name: call.function.name,
            arguments: call.function.arguments.to_string(),
        })
        .collect();

    Ok(CompletionResponse {
        text: message.content,
        tool_calls,
        model: resp.model,
    })
}

/// Decode one NDJSON line of a streaming chat response.
///
/// # Errors
///
/// Returns `ProviderError::Parse` on malformed JSON and
/// `ProviderError::Unavailable` when Ollama reports an in-band error.
#[doc(hidden)]
pub fn parse_stream_line(line: &str) -> Result<StreamEvent, ProviderError> {
    if line.is_empty() {
        return Ok(StreamEvent::Skip);
    }
    let chunk: OllamaResponse =
        serde_json::from_str(line).map_err(|e| ProviderError::Parse(e.to_string()))?;
    if let Some(error) = chunk.error {
        return Err(ProviderError::Unavailable(error));
    }

    let text = chunk.message.map(|m| m.content).unwrap_or_default();
    Ok(match (text.is_empty(), chunk.done) {
        (false, false) => StreamEvent::Fragment(text),
        (false, true) => StreamEvent::Final(text),
        (true, true) => StreamEvent::Done,
        (true, false) => StreamEvent::Skip,
    })
}

// ---------------------------------------------------------------------------
// Trait impl
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl LlmProvider for OllamaProvider {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let api_request = build_request(&self.model, &request, false);
        let response = self.post(&api_request).send().await?;
        let payload = check_http_response(response).await?;
        parse_response(&payload)
    }

    async fn stream(&self, request: CompletionRequest) -> Result<FragmentStream, ProviderError> {
        let api_request = build_request(&self.model, &request, true);
        let response = self.post(&api_request).send().await?;
        let response = check_stream_response(response).await?;
        Ok(spawn_line_stream(response, parse_stream_line))
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
