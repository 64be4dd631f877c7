//! HTTP surface.
//!
//! | Route                  | Purpose                                         |
//! |------------------------|-------------------------------------------------|
//! | `POST /chat`           | run a turn, stream labels and answer fragments  |
//! | `DELETE /cancel`       | cancel the in-flight turn of a session          |
//! | `POST /clear-history`  | reset a session's conversation                  |
//! | `GET /health`          | liveness and counters                           |
//! | `GET /personas`        | the persona roster                              |
//!
//! Failures of a chat turn are reported in-band as status labels; the HTTP
//! status is always 200.

pub mod handlers;
pub mod state;

use std::net::SocketAddr;

use anyhow::Context;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use self::state::AppState;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/chat", post(handlers::chat))
        .route("/cancel", delete(handlers::cancel))
        .route("/clear-history", post(handlers::clear_history))
        .route("/health", get(handlers::health))
        .route("/personas", get(handlers::personas))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `0.0.0.0:port` and serve until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the port cannot be bound or the server fails.
pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "http server listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received shutdown signal");
            }
        })
        .await
        .context("http server failed")
}
