//! Route handler functions.

use std::convert::Infallible;

use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, info};

use super::state::AppState;
use crate::session::DEFAULT_SESSION_ID;
use crate::status::{self, ChatSink, StatusLabel};

// =============================================================================
// Request / response types
// =============================================================================

/// Body of `POST /chat`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// The user message.
    pub message: String,
    /// Conversation id; the default session when absent.
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
}

/// Query of `DELETE /cancel`, and body of `POST /clear-history`.
#[derive(Debug, Default, Deserialize)]
pub struct SessionParams {
    /// Conversation id; the default session when absent.
    #[serde(rename = "sessionId", default)]
    pub session_id: Option<String>,
}

impl SessionParams {
    fn id(&self) -> &str {
        self.session_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .unwrap_or(DEFAULT_SESSION_ID)
    }
}

/// Body of `GET /health`.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `ok`.
    pub status: String,
    /// Number of registered personas.
    pub personas: usize,
    /// Sessions in use or used within the idle timeout.
    pub active_sessions: usize,
    /// Seconds since start.
    pub uptime_secs: u64,
}

/// One entry of `GET /personas`.
#[derive(Debug, Serialize, Deserialize)]
pub struct PersonaSummary {
    /// Lookup key.
    pub key: String,
    /// Display name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Chat model.
    pub model: String,
}

// =============================================================================
// Handlers
// =============================================================================

/// `POST /chat`: run one turn and stream its labels and answer.
///
/// The body is parsed here rather than by an extractor so that a malformed
/// request is still answered with a streamed error label.
pub async fn chat(State(state): State<AppState>, body: Bytes) -> Response {
    let (sink, rx) = ChatSink::channel();

    let request: ChatRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "rejecting malformed chat request");
            sink.label(StatusLabel::Error, &format!("Invalid request: {e}"));
            return stream_response(rx);
        }
    };

    let session_id = request
        .session_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| DEFAULT_SESSION_ID.to_owned());
    let session = state.sessions.get_or_create(&session_id);
    let token = session.begin_request();

    tokio::spawn(async move {
        tokio::select! {
            outcome = state.dispatcher.handle_turn(&session, &request.message, &token, &sink) => {
                info!(session = %session_id, outcome = ?outcome, "turn finished");
            }
            () = sink.closed() => {
                token.cancel();
                info!(session = %session_id, "client disconnected, turn abandoned");
            }
        }
    });

    stream_response(rx)
}

/// `DELETE /cancel`: cancel the session's in-flight turn.
pub async fn cancel(State(state): State<AppState>, Query(params): Query<SessionParams>) -> String {
    let id = params.id();
    match state.sessions.get(id) {
        Some(session) => session.cancel(),
        None => debug!(session = id, "cancel for unknown session"),
    }
    status::label(StatusLabel::Warning, "Cancelling request...")
}

/// `POST /clear-history`: reset the session's histories and active persona.
pub async fn clear_history(State(state): State<AppState>, body: Bytes) -> String {
    let params = if body.iter().all(u8::is_ascii_whitespace) {
        SessionParams::default()
    } else {
        match serde_json::from_slice::<SessionParams>(&body) {
            Ok(params) => params,
            Err(e) => return status::label(StatusLabel::Error, &format!("Invalid request: {e}")),
        }
    };

    let id = params.id();
    if let Some(session) = state.sessions.get(id) {
        session.clear(state.dispatcher.registry()).await;
        info!(session = id, "history cleared");
    }
    status::label(StatusLabel::Success, "Conversation history cleared")
}

/// `GET /health`.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_owned(),
        personas: state.dispatcher.registry().personas().len(),
        active_sessions: state.sessions.active_count(),
        uptime_secs: state.started.elapsed().as_secs(),
    })
}

/// `GET /personas`.
pub async fn personas(State(state): State<AppState>) -> Json<Vec<PersonaSummary>> {
    let personas = state
        .dispatcher
        .registry()
        .personas()
        .iter()
        .map(|p| PersonaSummary {
            key: p.key.clone(),
            name: p.name.clone(),
            description: p.description.clone(),
            model: p.provider.model_id().to_owned(),
        })
        .collect();
    Json(personas)
}

fn stream_response(rx: mpsc::UnboundedReceiver<String>) -> Response {
    let stream = UnboundedReceiverStream::new(rx).map(|chunk| Ok::<_, Infallible>(Bytes::from(chunk)));
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(stream),
    )
        .into_response()
}
