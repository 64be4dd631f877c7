//! Streaming generation and cancellation.

use std::sync::Arc;

use legion::dispatch::responder::{self, RespondError, ResponseOutcome};
use legion::providers::{Message, Role};
use legion::session::ConversationState;
use legion::status::ChatSink;
use tokio_util::sync::CancellationToken;

use crate::support::{self, ChatModel, RouterModel};

#[tokio::test]
async fn fragments_are_forwarded_and_answer_stored() {
    let chat = ChatModel::new("chat-model", &["Hel", "lo"]);
    let registry = support::registry(RouterModel::silent(), None, chat.clone());
    let persona = registry.lookup("bob").expect("bob exists");
    let mut state = ConversationState::new(&registry);
    state.push("bob", Message::user("hi"));
    let (sink, mut rx) = ChatSink::channel();

    let outcome = responder::respond(&persona, &mut state, 6_000, &CancellationToken::new(), &sink)
        .await
        .expect("stream completes");

    assert_eq!(outcome, ResponseOutcome::Completed("Hello".to_owned()));
    assert_eq!(rx.recv().await.as_deref(), Some("Hel"));
    assert_eq!(rx.recv().await.as_deref(), Some("lo"));
    assert_eq!(state.history("bob").last(), Some(&Message::assistant("Hello")));

    let request = chat.last_request();
    assert!(request.tools.is_empty());
    assert_eq!(request.messages.first().map(|m| m.role), Some(Role::System));
    assert_eq!(request.messages.last(), Some(&Message::user("hi")));
}

#[tokio::test]
async fn cancel_mid_stream_stops_forwarding_and_skips_history() {
    let token = CancellationToken::new();
    let chat = ChatModel::cancelling(&["Hel", "lo"], token.clone());
    let registry = support::registry(RouterModel::silent(), None, chat);
    let persona = registry.lookup("bob").expect("bob exists");
    let mut state = ConversationState::new(&registry);
    state.push("bob", Message::user("hi"));
    let before = state.history("bob").to_vec();
    let (sink, mut rx) = ChatSink::channel();

    let outcome = responder::respond(&persona, &mut state, 6_000, &token, &sink)
        .await
        .expect("cancellation is not an error");

    assert_eq!(
        outcome,
        ResponseOutcome::Cancelled {
            partial: "Hel".to_owned()
        }
    );
    assert_eq!(support::drain(&mut rx), "Hel");
    assert_eq!(state.history("bob"), before.as_slice());
}

#[tokio::test]
async fn already_cancelled_token_never_opens_a_stream() {
    let chat = ChatModel::new("chat-model", &["unused"]);
    let registry = support::registry(RouterModel::silent(), None, chat.clone());
    let persona = registry.lookup("bob").expect("bob exists");
    let mut state = ConversationState::new(&registry);
    let token = CancellationToken::new();
    token.cancel();
    let (sink, _rx) = ChatSink::channel();

    let outcome = responder::respond(&persona, &mut state, 6_000, &token, &sink)
        .await
        .expect("cancellation is not an error");

    assert_eq!(
        outcome,
        ResponseOutcome::Cancelled {
            partial: String::new()
        }
    );
    assert_eq!(chat.request_count(), 0);
}

#[tokio::test]
async fn client_disconnect_counts_as_cancellation() {
    let chat = ChatModel::new("chat-model", &["a", "b", "c"]);
    let registry = support::registry(RouterModel::silent(), None, chat);
    let persona = registry.lookup("bob").expect("bob exists");
    let mut state = ConversationState::new(&registry);
    let (sink, rx) = ChatSink::channel();
    drop(rx);

    let outcome = responder::respond(&persona, &mut state, 6_000, &CancellationToken::new(), &sink)
        .await
        .expect("disconnect is not an error");

    assert_eq!(
        outcome,
        ResponseOutcome::Cancelled {
            partial: "a".to_owned()
        }
    );
    assert_eq!(state.history("bob").len(), 1);
}

#[tokio::test]
async fn provider_failure_leaves_history_alone() {
    let chat = ChatModel::failing();
    let registry = support::registry(RouterModel::silent(), None, chat);
    let persona = registry.lookup("bob").expect("bob exists");
    let mut state = ConversationState::new(&registry);
    let (sink, _rx) = ChatSink::channel();

    let result =
        responder::respond(&persona, &mut state, 6_000, &CancellationToken::new(), &sink).await;

    assert!(matches!(result, Err(RespondError::Provider(_))));
    assert_eq!(state.history("bob").len(), 1);
}

#[tokio::test]
async fn outgoing_history_is_trimmed_but_stored_history_is_not() {
    let chat = ChatModel::new("chat-model", &["ok"]);
    let registry = support::registry(RouterModel::silent(), None, chat.clone());
    let persona: Arc<_> = registry.lookup("bob").expect("bob exists");
    let mut state = ConversationState::new(&registry);
    for i in 0..20 {
        state.push("bob", Message::user(format!("question {i} {}", "x".repeat(200))));
        state.push("bob", Message::assistant("y".repeat(200)));
    }
    state.push("bob", Message::user("latest"));
    let stored = state.history("bob").len();
    let (sink, _rx) = ChatSink::channel();

    responder::respond(&persona, &mut state, 1_500, &CancellationToken::new(), &sink)
        .await
        .expect("stream completes");

    let sent = chat.last_request().messages;
    assert!(sent.len() < stored);
    assert_eq!(sent.first().map(|m| m.role), Some(Role::System));
    assert_eq!(sent.last(), Some(&Message::user("latest")));
    assert!(responder::estimate_messages_tokens(&sent) <= 1_500);
    assert_eq!(state.history("bob").len(), stored.saturating_add(1));
}
