//! Session state, cancellation scoping and the session store.

use std::sync::Arc;
use std::time::Duration;

use legion::personas::PersonaRegistry;
use legion::providers::{Message, Role};
use legion::session::{
    ConversationState, Session, SessionLimits, SessionStore, DEFAULT_SESSION_ID,
};

use crate::support::{self, ChatModel, RouterModel};

fn roster() -> Arc<PersonaRegistry> {
    support::registry(RouterModel::silent(), None, ChatModel::new("m", &[]))
}

#[test]
fn fresh_state_seeds_every_history_with_its_prompt() {
    let registry = roster();
    let state = ConversationState::new(&registry);

    assert_eq!(state.active(), "bob");
    for persona in registry.personas() {
        let history = state.history(&persona.key);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::System);
        assert_eq!(history[0].content, persona.system_prompt);
    }
    assert!(state.history("nobody").is_empty());
}

#[test]
fn cancel_only_reaches_the_cancelled_session() {
    let registry = roster();
    let alice = Session::new("alice", &registry);
    let bob = Session::new("bob", &registry);
    let alice_turn = alice.begin_request();
    let bob_turn = bob.begin_request();

    alice.cancel();

    assert!(alice_turn.is_cancelled());
    assert!(!bob_turn.is_cancelled());
}

#[test]
fn cancel_hits_every_in_flight_request_but_not_later_ones() {
    let registry = roster();
    let session = Session::new("s", &registry);
    let first = session.begin_request();
    let second = session.begin_request();

    session.cancel();
    let third = session.begin_request();

    assert!(first.is_cancelled());
    assert!(second.is_cancelled());
    assert!(!third.is_cancelled());
}

#[test]
fn cancelling_one_request_leaves_siblings_alone() {
    let registry = roster();
    let session = Session::new("s", &registry);
    let first = session.begin_request();
    let second = session.begin_request();

    first.cancel();

    assert!(!second.is_cancelled());
}

#[tokio::test]
async fn clear_restores_a_fresh_conversation() {
    let registry = roster();
    let session = Session::new("s", &registry);
    let in_flight = session.begin_request();
    {
        let mut state = session.lock().await;
        state.set_active("milo");
        state.push("milo", Message::user("hello"));
    }

    session.clear(&registry).await;

    assert!(in_flight.is_cancelled());
    let state = session.lock().await;
    assert_eq!(*state, ConversationState::new(&registry));
}

#[tokio::test]
async fn sessions_do_not_share_histories() {
    let registry = roster();
    let store = SessionStore::new(Arc::clone(&registry));
    let alice = store.get_or_create("alice");
    let carol = store.get_or_create("carol");

    alice.lock().await.set_active("garfield");

    assert_eq!(carol.lock().await.active(), "bob");
    assert_eq!(alice.lock().await.active(), "garfield");
}

#[test]
fn store_reuses_sessions_by_id() {
    let store = SessionStore::new(roster());
    assert!(store.is_empty());

    let first = store.get_or_create(DEFAULT_SESSION_ID);
    let again = store.get_or_create(DEFAULT_SESSION_ID);
    let other = store.get_or_create("other");

    assert!(Arc::ptr_eq(&first, &again));
    assert!(!Arc::ptr_eq(&first, &other));
    assert_eq!(store.len(), 2);
    assert_eq!(first.id(), "default");
    assert!(store.get("missing").is_none());
}

fn bounded_store(max_sessions: usize, idle_secs: u64) -> SessionStore {
    SessionStore::with_limits(
        roster(),
        SessionLimits {
            max_sessions,
            idle_timeout: Duration::from_secs(idle_secs),
        },
    )
}

#[tokio::test(start_paused = true)]
async fn many_distinct_ids_stay_within_the_cap() {
    let store = bounded_store(3, 3_600);

    for i in 0..10_000 {
        drop(store.get_or_create(&format!("s{i}")));
        tokio::time::advance(Duration::from_millis(1)).await;
    }

    assert_eq!(store.len(), 3);
    for id in ["s9997", "s9998", "s9999"] {
        assert!(store.get(id).is_some(), "{id} should survive");
    }
    assert!(store.get("s0").is_none());
}

#[tokio::test(start_paused = true)]
async fn idle_sessions_are_dropped_on_next_creation() {
    let store = bounded_store(100, 60);
    drop(store.get_or_create("old"));

    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(store.active_count(), 0);
    drop(store.get_or_create("new"));

    assert!(store.get("old").is_none());
    assert_eq!(store.len(), 1);
    assert_eq!(store.active_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn reuse_refreshes_recency() {
    let store = bounded_store(2, 3_600);
    drop(store.get_or_create("a"));
    tokio::time::advance(Duration::from_secs(1)).await;
    drop(store.get_or_create("b"));
    tokio::time::advance(Duration::from_secs(1)).await;
    drop(store.get_or_create("a"));
    tokio::time::advance(Duration::from_secs(1)).await;

    drop(store.get_or_create("c"));

    assert!(store.get("a").is_some());
    assert!(store.get("b").is_none());
    assert!(store.get("c").is_some());
}

#[tokio::test(start_paused = true)]
async fn sessions_held_by_a_turn_are_never_evicted() {
    let store = bounded_store(1, 60);
    let in_flight = store.get_or_create("busy");

    tokio::time::advance(Duration::from_secs(120)).await;
    drop(store.get_or_create("other"));

    let still_there = store.get("busy").expect("held session kept");
    assert!(Arc::ptr_eq(&still_there, &in_flight));
    assert_eq!(store.len(), 2);
}
