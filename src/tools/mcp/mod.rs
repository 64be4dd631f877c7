//! Web search through an MCP server.
//!
//! [`McpSearchBackend`] spawns the configured server command as a child
//! process (for the Docker MCP gateway: `socat STDIO TCP:host:8811`),
//! performs the handshake, keeps only the allowed tools of `tools/list`
//! and forwards `tools/call` requests to it.

pub mod client;

use async_trait::async_trait;
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{info, warn};

use self::client::{McpClient, McpError};
use super::{ExternalToolBackend, ToolError};
use crate::config::SearchConfig;
use crate::providers::ToolDefinition;

/// An MCP server child process exposing search tools.
#[derive(Debug)]
pub struct McpSearchBackend {
    client: Mutex<McpClient>,
    tools: Vec<ToolDefinition>,
    // Held so the child is killed when the backend is dropped.
    _child: Child,
}

impl McpSearchBackend {
    /// Spawn the server, run the handshake and discover the allowed tools.
    ///
    /// # Errors
    ///
    /// Returns [`McpError`] if the process cannot be spawned or the
    /// handshake or tool discovery fails.
    pub async fn spawn(config: &SearchConfig) -> Result<Self, McpError> {
        let mut child = tokio::process::Command::new(&config.command)
            .args(&config.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::ProtocolError("child stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::ProtocolError("child stdout unavailable".into()))?;

        let mut client = McpClient::new(stdin, stdout);
        client.initialize().await?;
        let discovered = client.list_tools().await?;

        let tools: Vec<ToolDefinition> = discovered
            .into_iter()
            .filter(|t| config.tools.iter().any(|allowed| allowed == &t.name))
            .map(|t| ToolDefinition {
                description: t.description.unwrap_or_else(|| t.name.clone()),
                name: t.name,
                input_schema: t.input_schema,
            })
            .collect();

        for missing in config
            .tools
            .iter()
            .filter(|name| !tools.iter().any(|t| &t.name == *name))
        {
            warn!(tool = %missing, "configured search tool not offered by MCP server");
        }
        info!(
            command = %config.command,
            tools = ?tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            "MCP search backend ready"
        );

        Ok(Self {
            client: Mutex::new(client),
            tools,
            _child: child,
        })
    }
}

#[async_trait]
impl ExternalToolBackend for McpSearchBackend {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.clone()
    }

    async fn invoke(&self, name: &str, arguments: &serde_json::Value) -> Result<String, ToolError> {
        if !self.tools.iter().any(|t| t.name == name) {
            return Err(ToolError::UnknownTool(name.to_owned()));
        }
        let result = self
            .client
            .lock()
            .await
            .call_tool(name, arguments.clone())
            .await?;
        if result.is_error {
            return Err(ToolError::Failed {
                name: name.to_owned(),
                message: result.text(),
            });
        }
        Ok(result.text())
    }
}
