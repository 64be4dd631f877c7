//! MCP JSON-RPC 2.0 client over stdin/stdout.
//!
//! Implements the Model Context Protocol handshake (`initialize`),
//! tool discovery (`tools/list`), and tool invocation (`tools/call`)
//! over a child process's stdin/stdout pipes, one JSON object per line.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};

/// MCP protocol revision announced during `initialize`.
const PROTOCOL_VERSION: &str = "2024-11-05";

// ── Error types ──

/// Errors from MCP client operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// I/O error communicating with the MCP server process.
    #[error("MCP I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("MCP JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The MCP server returned a JSON-RPC error response.
    #[error("MCP server error {code}: {message}")]
    ServerError {
        /// JSON-RPC error code.
        code: i64,
        /// Error message from the server.
        message: String,
    },

    /// Protocol-level error (unexpected response format, missing fields).
    #[error("MCP protocol error: {0}")]
    ProtocolError(String),
}

// ── MCP protocol types ──

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcNotification<'a> {
    jsonrpc: &'static str,
    method: &'a str,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    id: Option<serde_json::Value>,
    result: Option<serde_json::Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// A tool discovered via MCP `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolDef {
    /// Tool name as reported by the MCP server.
    pub name: String,
    /// Optional description of what the tool does.
    pub description: Option<String>,
    /// JSON Schema for the tool's input parameters.
    #[serde(rename = "inputSchema", default = "default_empty_object")]
    pub input_schema: serde_json::Value,
}

fn default_empty_object() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// Result content from an MCP `tools/call` response.
#[derive(Debug, Clone, Deserialize)]
pub struct McpCallResult {
    /// Content blocks returned by the tool.
    #[serde(default)]
    pub content: Vec<McpContent>,
    /// Whether the tool invocation was an error.
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl McpCallResult {
    /// Text blocks joined by newlines; other block types are skipped.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|c| c.content_type == "text")
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A single content block in an MCP tool result.
#[derive(Debug, Clone, Deserialize)]
pub struct McpContent {
    /// Content type ("text", "image", "resource").
    #[serde(rename = "type")]
    pub content_type: String,
    /// Text content (for type="text").
    pub text: Option<String>,
}

// ── MCP Client ──

/// JSON-RPC 2.0 client talking to one MCP server child process.
///
/// Requests are strictly sequential: each call writes one line and reads
/// lines until the matching response arrives.
pub struct McpClient {
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl McpClient {
    /// Create a new MCP client from child process pipes.
    pub fn new(stdin: ChildStdin, stdout: ChildStdout) -> Self {
        Self {
            stdin,
            reader: BufReader::new(stdout),
            next_id: AtomicU64::new(1),
        }
    }

    /// Perform the `initialize` handshake and send `notifications/initialized`.
    ///
    /// Returns the server's `initialize` result.
    ///
    /// # Errors
    ///
    /// Returns [`McpError`] on I/O failure or a server error response.
    pub async fn initialize(&mut self) -> Result<serde_json::Value, McpError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "legion",
                "version": env!("CARGO_PKG_VERSION")
            }
        });

        let result = self.call("initialize", Some(params)).await?;
        self.notify("notifications/initialized").await?;
        Ok(result)
    }

    /// Discover available tools via `tools/list`.
    ///
    /// # Errors
    ///
    /// Returns [`McpError`] on I/O failure or a malformed tool list.
    pub async fn list_tools(&mut self) -> Result<Vec<McpToolDef>, McpError> {
        let mut result = self.call("tools/list", None).await?;
        let tools = result
            .get_mut("tools")
            .map(serde_json::Value::take)
            .ok_or_else(|| McpError::ProtocolError("tools/list: missing 'tools' field".into()))?;
        Ok(serde_json::from_value(tools)?)
    }

    /// Invoke a tool via `tools/call`.
    ///
    /// # Errors
    ///
    /// Returns [`McpError`] on I/O failure or a server error response. A
    /// tool-level failure comes back as `Ok` with `is_error` set.
    pub async fn call_tool(
        &mut self,
        name: &str,
        args: serde_json::Value,
    ) -> Result<McpCallResult, McpError> {
        let params = serde_json::json!({
            "name": name,
            "arguments": args
        });
        let result = self.call("tools/call", Some(params)).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn call(
        &mut self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };
        self.write_line(&serde_json::to_vec(&request)?).await?;

        // Skip server notifications (no id) until the response shows up.
        loop {
            let mut line = String::new();
            let bytes_read = self.reader.read_line(&mut line).await?;
            if bytes_read == 0 {
                return Err(McpError::ProtocolError(
                    "MCP server closed stdout unexpectedly".into(),
                ));
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let response: JsonRpcResponse = serde_json::from_str(trimmed)?;
            if response.id.as_ref().is_none_or(serde_json::Value::is_null) {
                continue;
            }

            if let Some(err) = response.error {
                return Err(McpError::ServerError {
                    code: err.code,
                    message: err.message,
                });
            }

            return response.result.ok_or_else(|| {
                McpError::ProtocolError("response has neither result nor error".into())
            });
        }
    }

    async fn notify(&mut self, method: &str) -> Result<(), McpError> {
        let notification = JsonRpcNotification {
            jsonrpc: "2.0",
            method,
        };
        self.write_line(&serde_json::to_vec(&notification)?).await
    }

    async fn write_line(&mut self, bytes: &[u8]) -> Result<(), McpError> {
        self.stdin.write_all(bytes).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }
}
