//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use crate::dispatch::Dispatcher;
use crate::session::{SessionLimits, SessionStore};

/// Shared application state.
///
/// All fields are cheap to clone across handler tasks.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The dispatch pipeline.
    pub dispatcher: Dispatcher,
    /// Live conversation sessions.
    pub sessions: Arc<SessionStore>,
    /// Server start time for uptime reporting.
    pub started: Instant,
}

impl AppState {
    /// Create state around a dispatcher, with an empty session store.
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self::with_limits(dispatcher, SessionLimits::default())
    }

    /// Create state whose session store enforces `limits`.
    pub fn with_limits(dispatcher: Dispatcher, limits: SessionLimits) -> Self {
        let sessions = Arc::new(SessionStore::with_limits(
            Arc::clone(dispatcher.registry()),
            limits,
        ));
        Self {
            dispatcher,
            sessions,
            started: Instant::now(),
        }
    }
}
