//! Streaming answer generation with cooperative cancellation.
//!
//! Fragments are forwarded to the sink the moment they arrive. After each
//! one the responder checks the request's cancellation token and whether
//! the client is still connected; either ends the loop and drops the
//! provider stream, which stops the upstream completion. Only a completed
//! answer is appended to the persona's history.

use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::personas::Persona;
use crate::providers::{CompletionRequest, Message, ProviderError};
use crate::session::ConversationState;
use crate::status::ChatSink;

/// English text averages roughly 4 characters per token.
const CHARS_PER_TOKEN: u64 = 4;

/// How a response ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// The model finished; the answer is now in history.
    Completed(String),
    /// Stopped early by cancellation or disconnect. `partial` was already
    /// sent and is not stored.
    Cancelled {
        /// Text forwarded before the stop.
        partial: String,
    },
}

/// Generation failures.
#[derive(Debug, thiserror::Error)]
pub enum RespondError {
    /// The provider failed before or during streaming.
    #[error("completion failed: {0}")]
    Provider(#[from] ProviderError),
}

/// Stream `persona`'s answer to its current history.
///
/// # Errors
///
/// Returns [`RespondError::Provider`] when the stream cannot be opened or
/// breaks midway. Nothing is appended to history in that case.
pub async fn respond(
    persona: &Persona,
    state: &mut ConversationState,
    max_history_tokens: u64,
    token: &CancellationToken,
    sink: &ChatSink,
) -> Result<ResponseOutcome, RespondError> {
    let request = CompletionRequest {
        messages: trim_messages(state.history(&persona.key), max_history_tokens),
        tools: Vec::new(),
        temperature: Some(persona.temperature),
    };
    debug!(
        persona = %persona.key,
        messages = request.messages.len(),
        stored = state.history(&persona.key).len(),
        "starting completion"
    );

    let mut stream = tokio::select! {
        biased;
        () = token.cancelled() => {
            return Ok(ResponseOutcome::Cancelled { partial: String::new() });
        }
        opened = persona.provider.stream(request) => opened?,
    };

    let mut answer = String::new();
    loop {
        let next = tokio::select! {
            biased;
            () = token.cancelled() => None,
            next = stream.next() => Some(next),
        };
        let Some(next) = next else {
            info!(persona = %persona.key, chars = answer.len(), "completion cancelled");
            return Ok(ResponseOutcome::Cancelled { partial: answer });
        };
        match next {
            None => break,
            Some(Ok(fragment)) => {
                sink.text(&fragment);
                answer.push_str(&fragment);
                if token.is_cancelled() || sink.is_closed() {
                    info!(persona = %persona.key, chars = answer.len(), "completion cancelled");
                    return Ok(ResponseOutcome::Cancelled { partial: answer });
                }
            }
            Some(Err(e)) => return Err(e.into()),
        }
    }

    state.push(&persona.key, Message::assistant(answer.clone()));
    debug!(persona = %persona.key, chars = answer.len(), "completion stored");
    Ok(ResponseOutcome::Completed(answer))
}

// ---------------------------------------------------------------------------
// History trimming
// ---------------------------------------------------------------------------

/// Trim a conversation to fit within a token budget.
///
/// Strategy:
/// - Always keep the first message (the persona's system prompt)
/// - Always keep the last message (the current user question)
/// - Drop oldest messages from the middle until under budget
/// - If only one message exists, always keep it
pub fn trim_messages(messages: &[Message], max_context_tokens: u64) -> Vec<Message> {
    if messages.len() <= 2 || estimate_messages_tokens(messages) <= max_context_tokens {
        return messages.to_vec();
    }

    let first = &messages[0];
    let last = &messages[messages.len().saturating_sub(1)];
    let fixed_cost = estimate_message_tokens(first).saturating_add(estimate_message_tokens(last));
    if fixed_cost >= max_context_tokens {
        return vec![first.clone(), last.clone()];
    }

    let mut remaining_budget = max_context_tokens.saturating_sub(fixed_cost);
    let middle = &messages[1..messages.len().saturating_sub(1)];

    // Walk backwards so the most recent middle messages survive.
    let mut kept_middle: Vec<Message> = Vec::new();
    for msg in middle.iter().rev() {
        let cost = estimate_message_tokens(msg);
        if cost > remaining_budget {
            break;
        }
        kept_middle.push(msg.clone());
        remaining_budget = remaining_budget.saturating_sub(cost);
    }
    kept_middle.reverse();

    let mut result = Vec::with_capacity(kept_middle.len().saturating_add(2));
    result.push(first.clone());
    result.extend(kept_middle);
    result.push(last.clone());
    result
}

/// Estimate tokens for a slice of messages.
pub fn estimate_messages_tokens(messages: &[Message]) -> u64 {
    messages.iter().map(estimate_message_tokens).sum()
}

fn estimate_message_tokens(message: &Message) -> u64 {
    let char_count = u64::try_from(message.content.chars().count()).unwrap_or(u64::MAX);
    char_count.saturating_add(CHARS_PER_TOKEN.saturating_sub(1)) / CHARS_PER_TOKEN
}
