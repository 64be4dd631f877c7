//! External tool backends.
//!
//! The search router only ever sees tool definitions; execution goes
//! through the [`ExternalToolBackend`] trait so the dispatch pipeline does
//! not care whether a tool runs over MCP or in-process.

pub mod mcp;

use async_trait::async_trait;

use crate::providers::ToolDefinition;

/// Errors from external tool execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The backend does not expose a tool with this name.
    #[error("unknown external tool '{0}'")]
    UnknownTool(String),

    /// The tool ran and reported a failure.
    #[error("tool '{name}' failed: {message}")]
    Failed {
        /// Tool name.
        name: String,
        /// Failure text returned by the tool.
        message: String,
    },

    /// Transport or protocol failure talking to the MCP server.
    #[error(transparent)]
    Mcp(#[from] mcp::client::McpError),
}

/// A source of external tools (for example web search).
#[async_trait]
pub trait ExternalToolBackend: Send + Sync {
    /// Tools offered to the search router.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Run `name` with JSON `arguments` and return its textual result.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] when the tool is unknown, fails, or the backend
    /// cannot be reached.
    async fn invoke(&self, name: &str, arguments: &serde_json::Value) -> Result<String, ToolError>;
}
