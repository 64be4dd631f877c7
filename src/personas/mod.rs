//! Persona roster and router agents.
//!
//! The [`PersonaRegistry`] is built once at startup from [`LegionConfig`] and
//! is read-only afterwards: persona keys are fixed, nothing registers later.
//! Conversation histories are not stored here; they belong to a session
//! (see [`crate::session`]), so the registry can be shared freely.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::{LegionConfig, RouterConfig, TopicConfig};
use crate::dispatch::invocation::routing_tools;
use crate::memory::embedder::Embedder;
use crate::memory::Corpus;
use crate::providers::{build_provider, LlmProvider, ToolDefinition};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A named chat agent with its own prompt, model and reference corpus.
#[derive(Clone)]
pub struct Persona {
    /// Lower-case lookup key.
    pub key: String,
    /// Display name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// System prompt seeding every session's history.
    pub system_prompt: String,
    /// Sampling temperature for answers.
    pub temperature: f32,
    /// Chat model client.
    pub provider: Arc<dyn LlmProvider>,
    /// Reference snippets.
    pub corpus: Arc<Corpus>,
}

impl std::fmt::Debug for Persona {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persona")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("model", &self.provider.model_id())
            .field("snippets", &self.corpus.len())
            .finish()
    }
}

/// A single-turn intent classifier.
///
/// Holds no conversation: every detection builds its own two-message
/// request from `system_prompt` and the user message.
#[derive(Clone)]
pub struct RouterAgent {
    /// Display name.
    pub name: String,
    /// System prompt placed before the user message.
    pub system_prompt: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Tools offered to the model.
    pub tools: Vec<ToolDefinition>,
    /// Tools model client.
    pub provider: Arc<dyn LlmProvider>,
}

impl RouterAgent {
    /// Build a router from its configuration.
    pub fn new(
        config: &RouterConfig,
        tools: Vec<ToolDefinition>,
        provider: Arc<dyn LlmProvider>,
    ) -> Self {
        Self {
            name: config.name.clone(),
            system_prompt: config.system_prompt.clone(),
            temperature: config.temperature,
            tools,
            provider,
        }
    }
}

impl std::fmt::Debug for RouterAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouterAgent")
            .field("name", &self.name)
            .field("model", &self.provider.model_id())
            .field("tools", &self.tools.iter().map(|t| &t.name).collect::<Vec<_>>())
            .finish()
    }
}

/// Lookup failures.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No persona has this key.
    #[error("unknown persona '{0}'")]
    NotFound(String),
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// The fixed persona roster plus the two router agents.
#[derive(Debug, Clone)]
pub struct PersonaRegistry {
    personas: Vec<Arc<Persona>>,
    index: HashMap<String, usize>,
    topics: Vec<TopicConfig>,
    default_persona: String,
    persona_router: RouterAgent,
    search_router: Option<RouterAgent>,
}

impl PersonaRegistry {
    /// Build every persona, embed every corpus and create both routers.
    ///
    /// `search_tools` is the catalog of the external search backend; when
    /// empty the search router is disabled. There is no partial mode: the
    /// first persona that cannot be built fails the whole registry.
    ///
    /// # Errors
    ///
    /// Returns an error when a corpus cannot be loaded or embedded, or when
    /// the configuration references an unknown default persona.
    pub async fn initialize(
        config: &LegionConfig,
        embedder: &dyn Embedder,
        search_tools: Vec<ToolDefinition>,
    ) -> Result<Self> {
        let model = &config.model;
        let api_key = model.api_key();

        let mut personas = Vec::with_capacity(config.personas.len());
        for persona in &config.personas {
            let dir = config.retrieval.docs_dir.join(&persona.key);
            let corpus = Corpus::build(
                &persona.key,
                &dir,
                &config.retrieval.extension,
                config.retrieval.chunk_size,
                config.retrieval.chunk_overlap,
                embedder,
            )
            .await
            .with_context(|| format!("failed to build persona '{}'", persona.key))?;

            let chat_model = config.persona_model(persona);
            info!(persona = %persona.key, model = chat_model, "persona ready");
            personas.push(Persona {
                key: persona.key.clone(),
                name: persona.name.clone(),
                description: persona.description.clone(),
                system_prompt: persona.system_prompt.clone(),
                temperature: persona.temperature,
                provider: build_provider(model.dialect, &model.base_url, chat_model, api_key.clone()),
                corpus: Arc::new(corpus),
            });
        }

        let tools_provider =
            build_provider(model.dialect, &model.base_url, &model.tools_model, api_key);
        let persona_router = RouterAgent::new(
            &config.routing.persona_router,
            routing_tools(config),
            Arc::clone(&tools_provider),
        );
        let search_router = (!search_tools.is_empty()).then(|| {
            RouterAgent::new(&config.routing.search_router, search_tools, tools_provider)
        });
        info!(
            tools_model = %model.tools_model,
            search = search_router.is_some(),
            "router agents ready"
        );

        Self::from_parts(
            personas,
            config.topics.clone(),
            &config.routing.default_persona,
            persona_router,
            search_router,
        )
    }

    /// Assemble a registry from already-built parts.
    ///
    /// # Errors
    ///
    /// Returns an error if `default_persona` or a topic target is not among
    /// `personas`.
    pub fn from_parts(
        personas: Vec<Persona>,
        topics: Vec<TopicConfig>,
        default_persona: &str,
        persona_router: RouterAgent,
        search_router: Option<RouterAgent>,
    ) -> Result<Self> {
        let personas: Vec<Arc<Persona>> = personas.into_iter().map(Arc::new).collect();
        let index: HashMap<String, usize> = personas
            .iter()
            .enumerate()
            .map(|(i, p)| (p.key.to_lowercase(), i))
            .collect();

        let default_persona = default_persona.to_lowercase();
        anyhow::ensure!(
            index.contains_key(&default_persona),
            "default persona '{default_persona}' is not registered"
        );
        for topic in &topics {
            anyhow::ensure!(
                index.contains_key(&topic.persona.to_lowercase()),
                "topic '{}' targets unregistered persona '{}'",
                topic.label,
                topic.persona
            );
        }

        Ok(Self {
            personas,
            index,
            topics,
            default_persona,
            persona_router,
            search_router,
        })
    }

    /// Find a persona by key, ignoring case and surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::NotFound` for an unknown key.
    pub fn lookup(&self, name: &str) -> Result<Arc<Persona>, RegistryError> {
        let key = normalize(name);
        self.index
            .get(&key)
            .and_then(|i| self.personas.get(*i))
            .cloned()
            .ok_or(RegistryError::NotFound(name.to_owned()))
    }

    /// Find the topic entry for a label, ignoring case and surrounding whitespace.
    pub fn topic(&self, label: &str) -> Option<&TopicConfig> {
        let label = normalize(label);
        self.topics.iter().find(|t| t.label.to_lowercase() == label)
    }

    /// All personas in configuration order.
    pub fn personas(&self) -> &[Arc<Persona>] {
        &self.personas
    }

    /// All topic entries.
    pub fn topics(&self) -> &[TopicConfig] {
        &self.topics
    }

    /// Key of the persona active at the start of a session.
    pub fn default_persona(&self) -> &str {
        &self.default_persona
    }

    /// Router detecting persona hand-off and topic intents.
    pub fn persona_router(&self) -> &RouterAgent {
        &self.persona_router
    }

    /// Router detecting explicit search intents, if a backend is configured.
    pub fn search_router(&self) -> Option<&RouterAgent> {
        self.search_router.as_ref()
    }
}

/// Canonical form of a persona key or topic label.
pub fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}
