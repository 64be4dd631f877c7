//! Per-session conversation state and cancellation.
//!
//! A [`Session`] is the explicit context a chat turn runs against: which
//! persona is active and one history per persona. The [`SessionStore`]
//! maps client-supplied session ids to sessions; clients that never send an
//! id all share [`DEFAULT_SESSION_ID`].
//!
//! The conversation lives behind an async mutex that a turn holds from
//! detection to the last streamed fragment, so turns of one session run one
//! after another and history appends never interleave. Turns of different
//! sessions never touch the same state.
//!
//! Cancellation is scoped the same way. Each session keeps a parent
//! [`CancellationToken`]; every request gets a child of it. Cancelling the
//! session cancels the parent and swaps in a fresh one, so the next request
//! starts uncancelled.
//!
//! The store is bounded by [`SessionLimits`]: sessions idle past the timeout
//! are dropped, and when the store is full the least recently used session
//! makes room. A session an in-flight turn still holds is never dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ServerConfig;
use crate::personas::PersonaRegistry;
use crate::providers::Message;

/// Session id used when the client does not send one.
pub const DEFAULT_SESSION_ID: &str = "default";

// ---------------------------------------------------------------------------
// Conversation state
// ---------------------------------------------------------------------------

/// Active persona and per-persona histories of one session.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationState {
    active: String,
    histories: HashMap<String, Vec<Message>>,
}

impl ConversationState {
    /// Fresh state: default persona active, each history holding only its
    /// persona's system prompt.
    pub fn new(registry: &PersonaRegistry) -> Self {
        let histories = registry
            .personas()
            .iter()
            .map(|p| (p.key.clone(), vec![Message::system(p.system_prompt.clone())]))
            .collect();
        Self {
            active: registry.default_persona().to_owned(),
            histories,
        }
    }

    /// Key of the persona currently speaking.
    pub fn active(&self) -> &str {
        &self.active
    }

    /// Make `key` the active persona. Callers resolve the key through the
    /// registry first.
    pub fn set_active(&mut self, key: &str) {
        self.active = key.to_owned();
    }

    /// History of a persona; empty for an unknown key.
    pub fn history(&self, key: &str) -> &[Message] {
        self.histories.get(key).map_or(&[], Vec::as_slice)
    }

    /// Append to a persona's history.
    pub fn push(&mut self, key: &str, message: Message) {
        self.histories.entry(key.to_owned()).or_default().push(message);
    }

    /// Append several messages, in order.
    pub fn extend(&mut self, key: &str, messages: impl IntoIterator<Item = Message>) {
        self.histories.entry(key.to_owned()).or_default().extend(messages);
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One conversation: state plus cancellation scope.
#[derive(Debug)]
pub struct Session {
    id: String,
    state: AsyncMutex<ConversationState>,
    cancel: Mutex<CancellationToken>,
    last_used: Mutex<Instant>,
}

impl Session {
    /// Create a session with fresh conversation state.
    pub fn new(id: impl Into<String>, registry: &PersonaRegistry) -> Self {
        Self {
            id: id.into(),
            state: AsyncMutex::new(ConversationState::new(registry)),
            cancel: Mutex::new(CancellationToken::new()),
            last_used: Mutex::new(Instant::now()),
        }
    }

    /// Session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// When the store last handed this session out.
    pub fn last_used(&self) -> Instant {
        *self.last_used.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn touch(&self) {
        *self.last_used.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    /// Token for a new request, cancelled by the next [`Session::cancel`].
    pub fn begin_request(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .child_token()
    }

    /// Cancel every in-flight request of this session.
    pub fn cancel(&self) {
        let previous = {
            let mut guard = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *guard, CancellationToken::new())
        };
        previous.cancel();
        debug!(session = %self.id, "session requests cancelled");
    }

    /// Wait for exclusive access to the conversation.
    pub async fn lock(&self) -> MutexGuard<'_, ConversationState> {
        self.state.lock().await
    }

    /// Cancel in-flight requests and reset the conversation.
    pub async fn clear(&self, registry: &PersonaRegistry) {
        self.cancel();
        let mut state = self.state.lock().await;
        *state = ConversationState::new(registry);
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Bounds on the sessions a [`SessionStore`] keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    /// Most sessions kept at once.
    pub max_sessions: usize,
    /// Sessions unused for this long are dropped.
    pub idle_timeout: Duration,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_sessions: 1024,
            idle_timeout: Duration::from_secs(1_800),
        }
    }
}

impl From<&ServerConfig> for SessionLimits {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_sessions: config.max_sessions,
            idle_timeout: Duration::from_secs(config.session_idle_secs),
        }
    }
}

/// Sessions by id, created on first use and evicted per [`SessionLimits`].
#[derive(Debug)]
pub struct SessionStore {
    registry: Arc<PersonaRegistry>,
    limits: SessionLimits,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionStore {
    /// Create an empty store with default limits.
    pub fn new(registry: Arc<PersonaRegistry>) -> Self {
        Self::with_limits(registry, SessionLimits::default())
    }

    /// Create an empty store with explicit limits.
    pub fn with_limits(registry: Arc<PersonaRegistry>, limits: SessionLimits) -> Self {
        Self {
            registry,
            limits,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// The session for `id`, created on first use.
    ///
    /// Creating a session first evicts idle sessions and, while the store
    /// is full, the least recently used ones.
    pub fn get_or_create(&self, id: &str) -> Arc<Session> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(session) = sessions.get(id) {
            session.touch();
            return Arc::clone(session);
        }

        self.evict(&mut sessions);
        debug!(session = id, "session created");
        let session = Arc::new(Session::new(id, &self.registry));
        sessions.insert(id.to_owned(), Arc::clone(&session));
        session
    }

    fn evict(&self, sessions: &mut HashMap<String, Arc<Session>>) {
        let before = sessions.len();
        sessions.retain(|_, session| self.is_live(session));

        while sessions.len() >= self.limits.max_sessions {
            let oldest = sessions
                .iter()
                .filter(|(_, session)| !is_held(session))
                .min_by_key(|(_, session)| session.last_used())
                .map(|(id, _)| id.clone());
            let Some(oldest) = oldest else {
                break;
            };
            sessions.remove(&oldest);
        }

        let evicted = before.saturating_sub(sessions.len());
        if evicted > 0 {
            debug!(evicted, remaining = sessions.len(), "sessions evicted");
        }
    }

    fn is_live(&self, session: &Arc<Session>) -> bool {
        is_held(session) || session.last_used().elapsed() < self.limits.idle_timeout
    }

    /// The session for `id`, if it exists.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Number of sessions currently stored.
    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no session is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sessions in use or used within the idle timeout.
    pub fn active_count(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|session| self.is_live(session))
            .count()
    }

    /// The limits this store enforces.
    pub fn limits(&self) -> SessionLimits {
        self.limits
    }

    /// The registry sessions are seeded from.
    pub fn registry(&self) -> &Arc<PersonaRegistry> {
        &self.registry
    }
}

/// Whether anything besides the store holds the session (an in-flight turn).
fn is_held(session: &Arc<Session>) -> bool {
    Arc::strong_count(session) > 1
}
