//! Shared provider types.

use legion::config::ModelDialect;
use legion::providers::{build_provider, Message, Role};

#[test]
fn message_constructors_set_roles() {
    assert_eq!(Message::system("s").role, Role::System);
    assert_eq!(Message::user("u").role, Role::User);
    assert_eq!(Message::assistant("a").role, Role::Assistant);
}

#[test]
fn roles_serialize_lowercase() {
    let json = serde_json::to_string(&Message::assistant("hi")).expect("serializes");
    assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
}

#[test]
fn build_provider_honours_dialect_and_model() {
    let openai = build_provider(
        ModelDialect::OpenAi,
        "http://localhost:12434/engines/llama.cpp/v1",
        "ai/qwen2.5:latest",
        None,
    );
    let ollama = build_provider(
        ModelDialect::Ollama,
        "http://localhost:11434",
        "qwen2.5",
        None,
    );

    assert_eq!(openai.model_id(), "ai/qwen2.5:latest");
    assert_eq!(ollama.model_id(), "qwen2.5");
}
