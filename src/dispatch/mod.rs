//! The per-turn dispatch pipeline.
//!
//! ```text
//! detect (routing) ─┐
//! detect (search)  ─┴─> execute ──> augment ──> respond
//! ```
//!
//! [`Dispatcher::handle_turn`] runs one user message through every stage
//! against a single session. The session lock is held for the whole turn.
//! Stage failures are advisory: they are labelled in the stream and logged,
//! and the turn carries on with whatever state it has. Cancellation is
//! checked between stages and after every streamed fragment.

pub mod augment;
pub mod detector;
pub mod executor;
pub mod invocation;
pub mod responder;

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use self::detector::{Detection, DetectorKind};
use self::responder::{RespondError, ResponseOutcome};
use crate::memory::RetrievalService;
use crate::personas::PersonaRegistry;
use crate::session::Session;
use crate::status::{ChatSink, StatusLabel};
use crate::tools::ExternalToolBackend;

/// How a turn ended.
#[derive(Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The active persona answered in full.
    Completed {
        /// Key of the persona that answered.
        persona: String,
        /// Full answer text.
        answer: String,
    },
    /// The request was cancelled or the client went away.
    Cancelled,
    /// Generation failed; the error was labelled in the stream.
    Failed(String),
}

/// Shared, stateless pipeline wiring.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<PersonaRegistry>,
    retrieval: Arc<dyn RetrievalService>,
    backend: Option<Arc<dyn ExternalToolBackend>>,
    similarity_threshold: f32,
    max_history_tokens: u64,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("personas", &self.registry.personas().len())
            .field("search", &self.backend.is_some())
            .field("similarity_threshold", &self.similarity_threshold)
            .field("max_history_tokens", &self.max_history_tokens)
            .finish()
    }
}

impl Dispatcher {
    /// Wire the pipeline.
    pub fn new(
        registry: Arc<PersonaRegistry>,
        retrieval: Arc<dyn RetrievalService>,
        backend: Option<Arc<dyn ExternalToolBackend>>,
        similarity_threshold: f32,
        max_history_tokens: u64,
    ) -> Self {
        Self {
            registry,
            retrieval,
            backend,
            similarity_threshold,
            max_history_tokens,
        }
    }

    /// The persona registry.
    pub fn registry(&self) -> &Arc<PersonaRegistry> {
        &self.registry
    }

    /// Run one user message through the pipeline for `session`.
    pub async fn handle_turn(
        &self,
        session: &Session,
        message: &str,
        token: &CancellationToken,
        sink: &ChatSink,
    ) -> TurnOutcome {
        let Some(mut state) = until_cancelled(token, session.lock()).await else {
            return TurnOutcome::Cancelled;
        };

        // Detection: both routers see only this message.
        let routing = self.registry.persona_router();
        let Some(routing) = until_cancelled(
            token,
            detector::detect(DetectorKind::Routing, routing, message, sink),
        )
        .await
        else {
            return TurnOutcome::Cancelled;
        };
        let search = match self.registry.search_router() {
            Some(router) => {
                let Some(detection) = until_cancelled(
                    token,
                    detector::detect(DetectorKind::Search, router, message, sink),
                )
                .await
                else {
                    return TurnOutcome::Cancelled;
                };
                detection
            }
            None => Detection::default(),
        };
        for advisory in [&routing.advisory, &search.advisory].into_iter().flatten() {
            warn!(session = %session.id(), error = %advisory, "detection advisory");
        }

        // Execution.
        if !routing.invocations.is_empty() {
            let report = executor::execute(
                DetectorKind::Routing,
                &routing.invocations,
                &self.registry,
                &mut state,
                self.backend.as_deref(),
                sink,
            )
            .await;
            info!(session = %session.id(), results = ?report.results(), "routing tools executed");
        }
        let mut external_results = Vec::new();
        if !search.invocations.is_empty() {
            let Some(report) = until_cancelled(
                token,
                executor::execute(
                    DetectorKind::Search,
                    &search.invocations,
                    &self.registry,
                    &mut state,
                    self.backend.as_deref(),
                    sink,
                ),
            )
            .await
            else {
                return TurnOutcome::Cancelled;
            };
            external_results = report.external_results();
        }

        let persona = match self.registry.lookup(state.active()) {
            Ok(persona) => persona,
            Err(e) => {
                sink.label(StatusLabel::Error, &e.to_string());
                return TurnOutcome::Failed(e.to_string());
            }
        };

        // Augmentation: tool results or corpus snippets, never both.
        let Some(augmentation) = until_cancelled(
            token,
            augment::augment(
                &mut state,
                &persona,
                message,
                &external_results,
                self.retrieval.as_ref(),
                self.similarity_threshold,
                sink,
            ),
        )
        .await
        else {
            return TurnOutcome::Cancelled;
        };
        info!(session = %session.id(), persona = %persona.key, source = ?augmentation.source, "history augmented");

        sink.label_line(StatusLabel::Info, &format!("{} is thinking...", persona.name));
        match responder::respond(&persona, &mut state, self.max_history_tokens, token, sink).await {
            Ok(ResponseOutcome::Completed(answer)) => TurnOutcome::Completed {
                persona: persona.key.clone(),
                answer,
            },
            Ok(ResponseOutcome::Cancelled { .. }) => TurnOutcome::Cancelled,
            Err(RespondError::Provider(e)) => {
                warn!(session = %session.id(), persona = %persona.key, error = %e, "completion failed");
                sink.label(StatusLabel::Error, &format!("Completion failed: {e}"));
                TurnOutcome::Failed(e.to_string())
            }
        }
    }
}

/// Run `fut` unless `token` fires first.
async fn until_cancelled<F: Future>(token: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        () = token.cancelled() => None,
        output = fut => Some(output),
    }
}
