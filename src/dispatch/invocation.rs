//! Typed tool invocations and the routing tool catalog.
//!
//! Providers hand back tool calls with a name and raw JSON arguments. This
//! module turns each call into a [`ToolInvocation`]: one variant per known
//! routing tool with its argument record, plus a variant for tools served
//! by the external backend. Anything else is an [`InvocationError`].

use serde::Deserialize;
use serde_json::Value;

use crate::config::LegionConfig;
use crate::providers::{ToolCall, ToolDefinition};

/// Tool switching the active persona by name.
pub const CHOOSE_PERSONA: &str = "choose_persona";

/// Tool switching the active persona by conversation topic.
pub const DETECT_TOPIC: &str = "detect_topic";

/// A detected, typed tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInvocation {
    /// Hand the conversation to the named persona.
    ChoosePersona {
        /// Persona name as the model wrote it.
        clone_name: String,
    },
    /// Hand the conversation to the owner of a topic.
    DetectTopic {
        /// Topic label as the model wrote it.
        topic_name: String,
    },
    /// Call a tool of the external backend.
    External {
        /// Backend tool name.
        name: String,
        /// Arguments object.
        arguments: Value,
    },
}

impl ToolInvocation {
    /// Type a raw tool call against the catalog it was offered.
    ///
    /// # Errors
    ///
    /// Returns `InvocationError::UnknownTool` when the name is not in
    /// `catalog`, and `InvocationError::MalformedArguments` when the
    /// arguments are not valid JSON or miss a required field.
    pub fn parse(call: &ToolCall, catalog: &[ToolDefinition]) -> Result<Self, InvocationError> {
        if !catalog.iter().any(|t| t.name == call.name) {
            return Err(InvocationError::UnknownTool(call.name.clone()));
        }
        let raw = if call.arguments.trim().is_empty() {
            "{}"
        } else {
            call.arguments.as_str()
        };
        let malformed = |e: serde_json::Error| InvocationError::MalformedArguments {
            tool: call.name.clone(),
            message: e.to_string(),
        };

        match call.name.as_str() {
            CHOOSE_PERSONA => {
                let args: ChoosePersonaArgs = serde_json::from_str(raw).map_err(malformed)?;
                Ok(Self::ChoosePersona {
                    clone_name: args.clone_name,
                })
            }
            DETECT_TOPIC => {
                let args: DetectTopicArgs = serde_json::from_str(raw).map_err(malformed)?;
                Ok(Self::DetectTopic {
                    topic_name: args.topic_name,
                })
            }
            other => {
                let arguments: Value = serde_json::from_str(raw).map_err(malformed)?;
                Ok(Self::External {
                    name: other.to_owned(),
                    arguments,
                })
            }
        }
    }

    /// Tool name of this invocation.
    pub fn name(&self) -> &str {
        match self {
            Self::ChoosePersona { .. } => CHOOSE_PERSONA,
            Self::DetectTopic { .. } => DETECT_TOPIC,
            Self::External { name, .. } => name,
        }
    }
}

/// A tool call that could not be typed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvocationError {
    /// The model called a tool it was not offered.
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    /// Arguments are not valid JSON or miss a required field.
    #[error("malformed arguments for '{tool}': {message}")]
    MalformedArguments {
        /// Tool name.
        tool: String,
        /// Decoder message.
        message: String,
    },
}

#[derive(Debug, Deserialize)]
struct ChoosePersonaArgs {
    clone_name: String,
}

#[derive(Debug, Deserialize)]
struct DetectTopicArgs {
    topic_name: String,
}

/// Tools offered to the persona router.
///
/// The descriptions enumerate the configured roster and topic labels.
pub fn routing_tools(config: &LegionConfig) -> Vec<ToolDefinition> {
    let clones = config
        .personas
        .iter()
        .map(|p| format!("{} ({})", p.name, p.key))
        .collect::<Vec<_>>()
        .join(", ");
    let topics = config
        .topics
        .iter()
        .map(|t| t.label.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    vec![
        ToolDefinition {
            name: CHOOSE_PERSONA.to_owned(),
            description: format!(
                "Select a clone of Bob by saying: I want to speak to <clone_name>. \
                 The clones are: {clones}."
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "clone_name": {
                        "type": "string",
                        "description": format!(
                            "The name of the clone of Bob to speak with, one of: {clones}."
                        )
                    }
                },
                "required": ["clone_name"]
            }),
        },
        ToolDefinition {
            name: DETECT_TOPIC.to_owned(),
            description: format!(
                "Detect the real topic of the user message. Possible topics are: {topics}."
            ),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "topic_name": {
                        "type": "string",
                        "description": "The topic of the user message."
                    }
                },
                "required": ["topic_name"]
            }),
        },
    ]
}
