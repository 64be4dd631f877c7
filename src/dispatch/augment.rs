//! Context augmentation of the active persona's history.
//!
//! Exactly one source is folded in per turn. Fresh external tool results
//! win; similarity search only runs when there are none.

use tracing::{debug, warn};

use crate::memory::{RetrievalError, RetrievalService};
use crate::personas::Persona;
use crate::providers::Message;
use crate::session::ConversationState;
use crate::status::{ChatSink, StatusLabel};

/// Which source the turn was augmented with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AugmentSource {
    /// External tool results, with their count.
    ToolResults(usize),
    /// Corpus snippets that cleared the threshold, with their count.
    Retrieval(usize),
    /// Only the user question was appended.
    None,
}

/// Outcome of [`augment`].
#[derive(Debug)]
pub struct Augmentation {
    /// Source used.
    pub source: AugmentSource,
    /// Retrieval failure, if any. The question was still appended.
    pub advisory: Option<RetrievalError>,
}

/// Messages injecting external tool results ahead of the question.
pub fn tool_result_messages(results: &[String], question: &str) -> Vec<Message> {
    vec![
        Message::system(results.join("\n")),
        Message::system("use the above result of the tool calls to answer the user question: "),
        Message::user(question),
    ]
}

/// Messages injecting corpus snippets ahead of the question.
pub fn snippet_messages(snippets: &[String], question: &str) -> Vec<Message> {
    vec![
        Message::system(format!(
            "Here are some relevant documents found in the RAG memory:\n{}",
            snippets.join("\n")
        )),
        Message::system("Use the above documents to answer the user question: "),
        Message::user(question),
    ]
}

/// Append the turn's context and the user question to `persona`'s history.
pub async fn augment(
    state: &mut ConversationState,
    persona: &Persona,
    question: &str,
    external_results: &[String],
    retrieval: &dyn RetrievalService,
    threshold: f32,
    sink: &ChatSink,
) -> Augmentation {
    if !external_results.is_empty() {
        state.extend(&persona.key, tool_result_messages(external_results, question));
        return Augmentation {
            source: AugmentSource::ToolResults(external_results.len()),
            advisory: None,
        };
    }

    match retrieval
        .similarity_search(&persona.corpus, question, threshold)
        .await
    {
        Ok(snippets) if !snippets.is_empty() => {
            debug!(persona = %persona.key, similarities = snippets.len(), "injecting corpus snippets");
            state.extend(&persona.key, snippet_messages(&snippets, question));
            Augmentation {
                source: AugmentSource::Retrieval(snippets.len()),
                advisory: None,
            }
        }
        Ok(_) => {
            debug!(persona = %persona.key, "no snippet cleared the threshold");
            state.push(&persona.key, Message::user(question));
            Augmentation {
                source: AugmentSource::None,
                advisory: None,
            }
        }
        Err(e) => {
            warn!(persona = %persona.key, error = %e, "similarity search failed");
            sink.label(StatusLabel::Error, &format!("Similarity search failed: {e}"));
            state.push(&persona.key, Message::user(question));
            Augmentation {
                source: AugmentSource::None,
                advisory: Some(e),
            }
        }
    }
}
