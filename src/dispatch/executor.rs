//! Tool invocation execution against a session's conversation state.
//!
//! Invocations run one after another in detection order, so a hand-off is
//! visible to every invocation after it in the same batch. A failing
//! invocation is recorded and the rest of the batch still runs.

use tracing::{debug, info, warn};

use super::detector::DetectorKind;
use super::invocation::ToolInvocation;
use crate::personas::PersonaRegistry;
use crate::providers::Message;
use crate::session::ConversationState;
use crate::status::{ChatSink, StatusLabel};
use crate::tools::{ExternalToolBackend, ToolError};

/// Output of one executed invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// Tool name.
    pub tool: String,
    /// Textual result.
    pub text: String,
    /// Whether the text came from the external backend.
    pub external: bool,
}

/// Everything a batch produced.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    /// Outputs of the invocations that succeeded, in execution order.
    pub outputs: Vec<ToolOutput>,
    /// Failures, in execution order. Advisory only.
    pub errors: Vec<ExecutionError>,
}

impl ExecutionReport {
    /// All result texts, in execution order.
    pub fn results(&self) -> Vec<String> {
        self.outputs.iter().map(|o| o.text.clone()).collect()
    }

    /// Result texts of external tools only.
    pub fn external_results(&self) -> Vec<String> {
        self.outputs
            .iter()
            .filter(|o| o.external)
            .map(|o| o.text.clone())
            .collect()
    }
}

/// A failed invocation.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// An external tool was requested but no backend is configured.
    #[error("no external tool backend for '{0}'")]
    NoBackend(String),

    /// The external backend failed.
    #[error(transparent)]
    Tool(#[from] ToolError),
}

/// Run `invocations` in order against `state`.
///
/// Routing invocations may change the active persona and append a note to
/// the newly active persona's history. External invocations go to
/// `backend` and never touch `state`.
pub async fn execute(
    kind: DetectorKind,
    invocations: &[ToolInvocation],
    registry: &PersonaRegistry,
    state: &mut ConversationState,
    backend: Option<&dyn ExternalToolBackend>,
    sink: &ChatSink,
) -> ExecutionReport {
    let (running, done) = match kind {
        DetectorKind::Routing => ("Executing tool calls...", "Tool calls executed successfully"),
        DetectorKind::Search => (
            "Executing search tool calls...",
            "Search tool calls executed successfully",
        ),
    };
    sink.label(StatusLabel::Orange, running);

    let mut report = ExecutionReport::default();
    for invocation in invocations {
        match invocation {
            ToolInvocation::ChoosePersona { clone_name } => {
                let text = choose_persona(clone_name, registry, state, sink);
                report.outputs.push(ToolOutput {
                    tool: invocation.name().to_owned(),
                    text,
                    external: false,
                });
            }
            ToolInvocation::DetectTopic { topic_name } => {
                let text = detect_topic(topic_name, registry, state, sink);
                report.outputs.push(ToolOutput {
                    tool: invocation.name().to_owned(),
                    text,
                    external: false,
                });
            }
            ToolInvocation::External { name, arguments } => {
                let outcome = match backend {
                    Some(backend) => backend.invoke(name, arguments).await.map_err(ExecutionError::from),
                    None => Err(ExecutionError::NoBackend(name.clone())),
                };
                match outcome {
                    Ok(text) => {
                        debug!(tool = %name, chars = text.len(), "external tool returned");
                        report.outputs.push(ToolOutput {
                            tool: name.clone(),
                            text,
                            external: true,
                        });
                    }
                    Err(e) => {
                        warn!(tool = %name, error = %e, "external tool failed");
                        report.errors.push(e);
                    }
                }
            }
        }
    }

    if report.errors.is_empty() {
        sink.label(StatusLabel::Success, done);
    } else {
        let joined = report
            .errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        sink.label(StatusLabel::Error, &format!("Tool execution failed: {joined}"));
    }
    report
}

/// Switch to the persona named `clone_name`.
///
/// Returns the persona's display name, or an "Unknown persona" text naming
/// the offending argument when no persona matches.
pub fn choose_persona(
    clone_name: &str,
    registry: &PersonaRegistry,
    state: &mut ConversationState,
    sink: &ChatSink,
) -> String {
    sink.label(StatusLabel::Yellow, "Selecting persona...");
    let Ok(persona) = registry.lookup(clone_name) else {
        let text = format!("Unknown persona: {clone_name}");
        sink.label(StatusLabel::Bug, &text);
        info!(requested = %clone_name, "hand-off to unknown persona ignored");
        return text;
    };

    state.set_active(&persona.key);
    state.push(
        &persona.key,
        Message::system(format!(
            "You have been selected to speak with the user, your name is: {}",
            persona.name
        )),
    );
    sink.label(
        StatusLabel::Enhancement,
        &format!("Hey, it's {}, {}", persona.name, persona.provider.model_id()),
    );
    info!(persona = %persona.key, "persona hand-off");
    persona.name.clone()
}

/// Switch to the persona owning `topic_name`.
///
/// Unknown topics leave the active persona alone. The topic text is
/// returned either way.
pub fn detect_topic(
    topic_name: &str,
    registry: &PersonaRegistry,
    state: &mut ConversationState,
    sink: &ChatSink,
) -> String {
    sink.label(StatusLabel::Step, "Detecting the real topic in user message...");
    sink.label(StatusLabel::White, &format!("Topic: {topic_name}"));

    let target = registry
        .topic(topic_name)
        .and_then(|topic| registry.lookup(&topic.persona).ok().map(|p| (topic.status, p)));
    let Some((status, persona)) = target else {
        info!(topic = %topic_name, "unrecognized topic, active persona unchanged");
        return topic_name.to_owned();
    };

    state.set_active(&persona.key);
    state.push(
        &persona.key,
        Message::assistant(format!("I understand that you want to talk about: {topic_name}")),
    );
    sink.label(status, &format!("You are speaking with {}", persona.name));
    info!(topic = %topic_name, persona = %persona.key, "topic hand-off");
    topic_name.to_owned()
}
