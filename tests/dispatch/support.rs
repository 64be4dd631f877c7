//! Scripted models, retrieval and search doubles shared by pipeline tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use legion::config::LegionConfig;
use legion::dispatch::invocation::routing_tools;
use legion::dispatch::Dispatcher;
use legion::memory::{Corpus, RetrievalError, RetrievalService};
use legion::memory::embedder::EmbedderError;
use legion::personas::{Persona, PersonaRegistry, RouterAgent};
use legion::providers::{
    CompletionRequest, CompletionResponse, FragmentStream, LlmProvider, ProviderError, ToolCall,
    ToolDefinition,
};
use legion::tools::{ExternalToolBackend, ToolError};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

type Script = dyn Fn(&str) -> Result<Vec<ToolCall>, ProviderError> + Send + Sync;

/// Router model answering each detection with a scripted list of tool calls.
pub struct RouterModel {
    script: Box<Script>,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl RouterModel {
    pub fn new(
        script: impl Fn(&str) -> Result<Vec<ToolCall>, ProviderError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// A router that never calls a tool.
    pub fn silent() -> Arc<Self> {
        Self::new(|_| Ok(Vec::new()))
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }
}

#[async_trait]
impl LlmProvider for RouterModel {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let user = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.requests.lock().expect("requests lock").push(request);
        Ok(CompletionResponse {
            text: String::new(),
            tool_calls: (self.script)(&user)?,
            model: "router-model".to_owned(),
        })
    }

    async fn stream(&self, _request: CompletionRequest) -> Result<FragmentStream, ProviderError> {
        Err(ProviderError::Unavailable("router models do not stream".to_owned()))
    }

    fn model_id(&self) -> &str {
        "router-model"
    }
}

/// Chat model streaming a fixed list of fragments.
pub struct ChatModel {
    model: String,
    fragments: Vec<String>,
    cancel_on_first: Option<CancellationToken>,
    fail: bool,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl ChatModel {
    pub fn new(model: &str, fragments: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            model: model.to_owned(),
            fragments: fragments.iter().map(|f| (*f).to_owned()).collect(),
            cancel_on_first: None,
            fail: false,
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Cancel `token` as soon as the first fragment is pulled.
    pub fn cancelling(fragments: &[&str], token: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            model: "chat-model".to_owned(),
            fragments: fragments.iter().map(|f| (*f).to_owned()).collect(),
            cancel_on_first: Some(token),
            fail: false,
            requests: Mutex::new(Vec::new()),
        })
    }

    /// A model whose stream cannot be opened.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            model: "chat-model".to_owned(),
            fragments: Vec::new(),
            cancel_on_first: None,
            fail: true,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn last_request(&self) -> CompletionRequest {
        self.requests
            .lock()
            .expect("requests lock")
            .last()
            .cloned()
            .expect("at least one streamed request")
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }
}

#[async_trait]
impl LlmProvider for ChatModel {
    async fn complete(
        &self,
        _request: CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        Ok(CompletionResponse::default())
    }

    async fn stream(&self, request: CompletionRequest) -> Result<FragmentStream, ProviderError> {
        self.requests.lock().expect("requests lock").push(request);
        if self.fail {
            return Err(ProviderError::HttpStatus {
                status: 503,
                body: "model not loaded".to_owned(),
            });
        }
        let cancel = self.cancel_on_first.clone();
        let stream = tokio_stream::iter(self.fragments.clone()).map(move |fragment| {
            if let Some(token) = &cancel {
                token.cancel();
            }
            Ok::<_, ProviderError>(fragment)
        });
        Ok(Box::pin(stream))
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

/// Retrieval returning fixed snippets and counting its calls.
#[derive(Default)]
pub struct StaticRetrieval {
    snippets: Vec<String>,
    fail: bool,
    calls: AtomicUsize,
}

impl StaticRetrieval {
    pub fn with(snippets: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            snippets: snippets.iter().map(|s| (*s).to_owned()).collect(),
            ..Self::default()
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RetrievalService for StaticRetrieval {
    async fn similarity_search(
        &self,
        _corpus: &Corpus,
        _query: &str,
        _threshold: f32,
    ) -> Result<Vec<String>, RetrievalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(EmbedderError::Unavailable("embedding model offline".to_owned()).into());
        }
        Ok(self.snippets.clone())
    }
}

/// Search backend echoing the query it was given.
#[derive(Default)]
pub struct EchoSearch {
    calls: AtomicUsize,
}

impl EchoSearch {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn search_tool() -> ToolDefinition {
    ToolDefinition {
        name: "brave_web_search".to_owned(),
        description: "Search the web".to_owned(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {"query": {"type": "string"}},
            "required": ["query"]
        }),
    }
}

#[async_trait]
impl ExternalToolBackend for EchoSearch {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![search_tool()]
    }

    async fn invoke(&self, name: &str, arguments: &serde_json::Value) -> Result<String, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if name != "brave_web_search" {
            return Err(ToolError::UnknownTool(name.to_owned()));
        }
        let query = arguments
            .get("query")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default();
        Ok(format!("web result for {query}"))
    }
}

pub fn call(name: &str, arguments: &str) -> ToolCall {
    ToolCall {
        id: format!("call_{name}"),
        name: name.to_owned(),
        arguments: arguments.to_owned(),
    }
}

/// Scripted persona router understanding a couple of phrasings.
pub fn scripted_router() -> Arc<RouterModel> {
    RouterModel::new(|message| {
        let lower = message.to_lowercase();
        if let Some(name) = lower.strip_prefix("i want to speak to ") {
            return Ok(vec![call(
                "choose_persona",
                &serde_json::json!({ "clone_name": name.trim() }).to_string(),
            )]);
        }
        if let Some(topic) = lower.strip_prefix("let's talk about ") {
            return Ok(vec![call(
                "detect_topic",
                &serde_json::json!({ "topic_name": topic.trim() }).to_string(),
            )]);
        }
        Ok(Vec::new())
    })
}

/// Scripted search router reacting to "search the web for ...".
pub fn scripted_search_router() -> Arc<RouterModel> {
    RouterModel::new(|message| {
        Ok(message
            .strip_prefix("search the web for ")
            .map(|query| {
                vec![call(
                    "brave_web_search",
                    &serde_json::json!({ "query": query }).to_string(),
                )]
            })
            .unwrap_or_default())
    })
}

/// The default roster and topics, every persona backed by `chat`.
pub fn registry(
    router: Arc<dyn LlmProvider>,
    search_router: Option<Arc<dyn LlmProvider>>,
    chat: Arc<dyn LlmProvider>,
) -> Arc<PersonaRegistry> {
    let config = LegionConfig::default();
    let personas = config
        .personas
        .iter()
        .map(|p| Persona {
            key: p.key.clone(),
            name: p.name.clone(),
            description: p.description.clone(),
            system_prompt: p.system_prompt.clone(),
            temperature: p.temperature,
            provider: Arc::clone(&chat),
            corpus: Arc::new(Corpus::empty(p.key.clone())),
        })
        .collect();
    let persona_router = RouterAgent::new(&config.routing.persona_router, routing_tools(&config), router);
    let search_router = search_router.map(|provider| {
        RouterAgent::new(&config.routing.search_router, vec![search_tool()], provider)
    });
    let registry = PersonaRegistry::from_parts(
        personas,
        config.topics.clone(),
        &config.routing.default_persona,
        persona_router,
        search_router,
    )
    .expect("default roster is consistent");
    Arc::new(registry)
}

pub fn dispatcher(
    registry: Arc<PersonaRegistry>,
    retrieval: Arc<dyn RetrievalService>,
    backend: Option<Arc<dyn ExternalToolBackend>>,
) -> Dispatcher {
    Dispatcher::new(registry, retrieval, backend, 0.7, 6_000)
}

/// Drain everything already written to a sink receiver.
pub fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<String>) -> String {
    let mut out = String::new();
    while let Ok(chunk) = rx.try_recv() {
        out.push_str(&chunk);
    }
    out
}
