//! OpenAI-compatible provider using the `/chat/completions` API.
//!
//! Targets any server speaking the OpenAI wire format: Docker Model Runner's
//! llama.cpp engine, llama.cpp server, vLLM, or OpenAI itself. Streaming uses
//! server-sent events (`data: {...}` lines terminated by `data: [DONE]`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    check_http_response, check_stream_response, spawn_line_stream, CompletionRequest,
    CompletionResponse, FragmentStream, LlmProvider, ProviderError, StreamEvent, ToolCall,
};

// ---------------------------------------------------------------------------
// Wire types (pub for integration testing)
// ---------------------------------------------------------------------------

/// OpenAI chat completions API request body.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct OpenAiRequest {
    /// Model identifier.
    pub model: String,
    /// Conversation messages.
    pub messages: Vec<OpenAiMessage>,
    /// Tool definitions.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Value>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Whether to stream the answer as server-sent events.
    pub stream: bool,
}

/// A message in OpenAI chat format.
#[doc(hidden)]
#[derive(Debug, Serialize)]
pub struct OpenAiMessage {
    /// Role (`system`, `user`, `assistant`).
    pub role: String,
    /// Plain text content.
    pub content: String,
}

/// A tool call in OpenAI format.
#[doc(hidden)]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiToolCall {
    /// Unique call identifier. Some local servers omit it.
    #[serde(default)]
    pub id: String,
    /// Call type (always `function`).
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Function call payload.
    pub function: OpenAiFunctionCall,
}

/// Function payload in OpenAI tool calls.
#[doc(hidden)]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiFunctionCall {
    /// Function name.
    pub name: String,
    /// Function arguments encoded as a JSON string.
    #[serde(default)]
    pub arguments: String,
}

/// OpenAI chat completions API response body.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct OpenAiResponse {
    /// Response choices.
    pub choices: Vec<OpenAiChoice>,
    /// Model that served the response.
    #[serde(default)]
    pub model: String,
}

/// A response choice from OpenAI.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct OpenAiChoice {
    /// Assistant message for this choice.
    pub message: OpenAiResponseMessage,
}

/// Assistant message from OpenAI.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct OpenAiResponseMessage {
    /// Optional text content.
    pub content: Option<String>,
    /// Optional tool calls.
    pub tool_calls: Option<Vec<OpenAiToolCall>>,
}

/// One server-sent event payload of a streaming completion.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct OpenAiStreamChunk {
    /// Delta choices.
    #[serde(default)]
    pub choices: Vec<OpenAiStreamChoice>,
    /// In-band error reported by some servers mid-stream.
    pub error: Option<Value>,
}

/// A delta choice in a streaming chunk.
#[doc(hidden)]
#[derive(Debug, Deserialize)]
pub struct OpenAiStreamChoice {
    /// Incremental message content.
    #[serde(default)]
    pub delta: OpenAiDelta,
}

/// Incremental content of a streaming choice.
#[doc(hidden)]
#[derive(Debug, Default, Deserialize)]
pub struct OpenAiDelta {
    /// Text fragment, absent on role-only and final chunks.
    pub content: Option<String>,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

/// OpenAI-compatible chat completions provider.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    base_url: String,
    model_name: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiProvider {
    /// Create a provider for `model_name` served under `base_url`
    /// (for example `http://localhost:12434/engines/llama.cpp/v1`).
    pub fn new(base_url: String, model_name: String, api_key: Option<String>) -> Self {
        Self {
            base_url,
            model_name,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    /// Full URL of the chat completions endpoint.
    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn post(&self, body: &OpenAiRequest) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .post(self.endpoint())
            .header("content-type", "application/json")
            .json(body);
        match &self.api_key {
            Some(key) => builder.header("authorization", format!("Bearer {key}")),
            None => builder,
        }
    }
}

// ---------------------------------------------------------------------------
// Request / Response builders (pub for integration testing)
// ---------------------------------------------------------------------------

/// Build an OpenAI API request from a completion request.
#[doc(hidden)]
pub fn build_request(model: &str, request: &CompletionRequest, stream: bool) -> OpenAiRequest {
    let messages = request
        .messages
        .iter()
        .map(|msg| OpenAiMessage {
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

    OpenAiRequest {
        model: model.to_owned(),
        messages,
        tools,
        temperature: request.temperature,
        stream,
    }
}

/// Parse an OpenAI API response into a completion response.
///
/// # Errors
///
/// Returns `ProviderError::Parse` if the response cannot be deserialized or
/// has no choices.
#[doc(hidden)]
pub fn parse_response(body: &str) -> Result<CompletionResponse, ProviderError> {
    let resp: OpenAiResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Parse(e.to_string()))?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Parse("missing choices[0]".to_owned()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| ToolCall {
            id: if call.id.is_empty() {
                uuid::Uuid::new_v4().to_string()
            } else {
                call.id
            },
            name: call.function.name,
            arguments: call.function.arguments,
        })
        .collect();

    Ok(CompletionResponse {
        text: choice.message.content.unwrap_or_default(),
        tool_calls,
        model: resp.model,
    })
}

/// Decode one line of a server-sent event stream.
///
/// # Errors
///
/// Returns `ProviderError::Parse` on malformed JSON and
/// `ProviderError::Unavailable` when the server reports an in-band error.
#[doc(hidden)]
pub fn parse_stream_line(line: &str) -> Result<StreamEvent, ProviderError> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(StreamEvent::Skip);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(StreamEvent::Skip);
    }
    if data == "[DONE]" {
        return Ok(StreamEvent::Done);
    }

    let chunk: OpenAiStreamChunk =
        serde_json::from_str(data).map_err(|e| ProviderError::Parse(e.to_string()))?;
    if let Some(error) = chunk.error {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| error.to_string(), str::to_owned);
        return Err(ProviderError::Unavailable(message));
    }

    let text: String = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.content)
        .collect();
    if text.is_empty() {
        Ok(StreamEvent::Skip)
    } else {
        Ok(StreamEvent::Fragment(text))
    }
}

// ---------------------------------------------------------------------------
// Trait impl
// ---------------------------------------------------------------------------

#[async_trait::async_trait]
impl LlmProvider for OpenAiProvider {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let api_request = build_request(&self.model_name, &request, false);
        let response = self.post(&api_request).send().await?;
        let payload = check_http_response(response).await?;
        parse_response(&payload)
    }

    async fn stream(&self, request: CompletionRequest) -> Result<FragmentStream, ProviderError> {
        let api_request = build_request(&self.model_name, &request, true);
        let response = self.post(&api_request).send().await?;
        let response = check_stream_response(response).await?;
        Ok(spawn_line_stream(response, parse_stream_line))
    }

    fn model_id(&self) -> &str {
        &self.model_name
    }
}
