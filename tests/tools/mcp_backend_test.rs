//! MCP search backend against a scripted server process.

use legion::config::SearchConfig;
use legion::tools::mcp::McpSearchBackend;
use legion::tools::{ExternalToolBackend, ToolError};

const HANDSHAKE: &str = concat!(
    r#"read line; "#,
    r#"echo '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{}}}'; "#,
    r#"read line; "#,
    r#"read line; "#,
    r#"echo '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"brave_web_search","description":"Web search","inputSchema":{"type":"object","properties":{"query":{"type":"string"}}}},{"name":"fetch"}]}}'; "#,
);

fn config(script: &str) -> SearchConfig {
    SearchConfig {
        command: "bash".to_owned(),
        args: vec!["-c".to_owned(), format!("{HANDSHAKE}{script}")],
        tools: vec!["brave_web_search".to_owned()],
    }
}

#[tokio::test]
async fn only_allowed_tools_are_exposed() {
    let backend = McpSearchBackend::spawn(&config("sleep 5"))
        .await
        .expect("backend starts");

    let definitions = backend.definitions();

    assert_eq!(definitions.len(), 1);
    assert_eq!(definitions[0].name, "brave_web_search");
    assert_eq!(definitions[0].description, "Web search");
    assert_eq!(definitions[0].input_schema["properties"]["query"]["type"], "string");
}

#[tokio::test]
async fn invoke_returns_text_content() {
    let backend = McpSearchBackend::spawn(&config(concat!(
        r#"read line; "#,
        r#"echo '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"Docker Bake docs"},{"type":"text","text":"bake.hcl reference"}]}}'; "#,
        "sleep 5"
    )))
    .await
    .expect("backend starts");

    let text = backend
        .invoke("brave_web_search", &serde_json::json!({"query": "docker bake"}))
        .await
        .expect("tool call succeeds");

    assert_eq!(text, "Docker Bake docs\nbake.hcl reference");
}

#[tokio::test]
async fn tool_level_error_is_a_failure() {
    let backend = McpSearchBackend::spawn(&config(concat!(
        r#"read line; "#,
        r#"echo '{"jsonrpc":"2.0","id":3,"result":{"isError":true,"content":[{"type":"text","text":"rate limited"}]}}'; "#,
        "sleep 5"
    )))
    .await
    .expect("backend starts");

    let err = backend
        .invoke("brave_web_search", &serde_json::json!({"query": "x"}))
        .await
        .expect_err("tool reports failure");

    assert!(matches!(err, ToolError::Failed { message, .. } if message == "rate limited"));
}

#[tokio::test]
async fn tools_outside_the_allow_list_are_refused() {
    let backend = McpSearchBackend::spawn(&config("sleep 5"))
        .await
        .expect("backend starts");

    let err = backend
        .invoke("fetch", &serde_json::json!({"url": "http://example.com"}))
        .await
        .expect_err("fetch is not allowed");

    assert!(matches!(err, ToolError::UnknownTool(name) if name == "fetch"));
}

#[tokio::test]
async fn missing_command_fails_to_spawn() {
    let config = SearchConfig {
        command: "/nonexistent/mcp-server".to_owned(),
        args: Vec::new(),
        tools: vec!["brave_web_search".to_owned()],
    };

    assert!(McpSearchBackend::spawn(&config).await.is_err());
}
