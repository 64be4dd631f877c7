//! Intent detection with single-turn router completions.

use tracing::{debug, warn};

use super::invocation::{InvocationError, ToolInvocation};
use crate::personas::RouterAgent;
use crate::providers::{tool_calls_as_text, CompletionRequest, Message, ProviderError};
use crate::status::{ChatSink, StatusLabel};

/// Which router a detection runs for. Only changes the wording of labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorKind {
    /// Persona hand-off and topic intents.
    Routing,
    /// Explicit external search intents.
    Search,
}

impl DetectorKind {
    fn noun(self) -> &'static str {
        match self {
            Self::Routing => "tool call",
            Self::Search => "search tool call",
        }
    }
}

/// Result of one detection.
///
/// `invocations` is authoritative even when `advisory` is set.
#[derive(Debug, Default)]
pub struct Detection {
    /// Typed invocations, in the order the model produced them.
    pub invocations: Vec<ToolInvocation>,
    /// Problem encountered along the way, for observability only.
    pub advisory: Option<DetectionError>,
}

/// Advisory detection failures.
#[derive(Debug, thiserror::Error)]
pub enum DetectionError {
    /// The router completion itself failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Some tool calls could not be typed and were dropped.
    #[error("{} tool call(s) dropped: {}", .0.len(), join_errors(.0))]
    Invocations(Vec<InvocationError>),
}

fn join_errors(errors: &[InvocationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// The request sent to a router: its system prompt and the user message,
/// nothing else.
pub fn router_request(router: &RouterAgent, user_message: &str) -> CompletionRequest {
    CompletionRequest {
        messages: vec![
            Message::system(router.system_prompt.clone()),
            Message::user(user_message),
        ],
        tools: router.tools.clone(),
        temperature: Some(router.temperature),
    }
}

/// Ask `router` whether `user_message` calls for any of its tools.
///
/// Never fails: a transport error yields no invocations plus an advisory,
/// undecodable calls are dropped and reported in the advisory.
pub async fn detect(
    kind: DetectorKind,
    router: &RouterAgent,
    user_message: &str,
    sink: &ChatSink,
) -> Detection {
    let noun = kind.noun();
    let response = match router
        .provider
        .complete(router_request(router, user_message))
        .await
    {
        Ok(response) => response,
        Err(e) => {
            warn!(router = %router.name, error = %e, "tool call detection failed");
            sink.label(StatusLabel::Error, &format!("{} error detected: {e}", capitalize(noun)));
            return Detection {
                invocations: Vec::new(),
                advisory: Some(e.into()),
            };
        }
    };

    debug!(router = %router.name, count = response.tool_calls.len(), "tool calls detected");
    if response.tool_calls.is_empty() {
        sink.label(StatusLabel::Success, &format!("No {noun}s detected"));
        return Detection::default();
    }
    debug!(router = %router.name, calls = %tool_calls_as_text(&response.tool_calls), "tool call payload");

    let mut invocations = Vec::with_capacity(response.tool_calls.len());
    let mut errors = Vec::new();
    for call in &response.tool_calls {
        match ToolInvocation::parse(call, &router.tools) {
            Ok(invocation) => invocations.push(invocation),
            Err(e) => errors.push(e),
        }
    }

    let advisory = if errors.is_empty() {
        None
    } else {
        let error = DetectionError::Invocations(errors);
        warn!(router = %router.name, error = %error, "dropping undecodable tool calls");
        sink.label(StatusLabel::Error, &format!("{} error detected: {error}", capitalize(noun)));
        Some(error)
    };

    Detection {
        invocations,
        advisory,
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
