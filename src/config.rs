//! Configuration loading and validation.
//!
//! Loads configuration from `./legion.toml` (or `$LEGION_CONFIG_PATH`).
//! Environment variables override file values; file values override defaults.
//!
//! Precedence: env vars > config file > defaults.
//!
//! The environment variable names follow the Docker Model Runner deployment
//! (`DMR_BASE_URL`, `MODEL_RUNNER_*`, `HTTP_PORT`).

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::status::StatusLabel;

/// Path suffix of the llama.cpp engine on a Docker Model Runner host.
const DMR_ENGINE_PATH: &str = "/engines/llama.cpp/v1";

// ── Top-level config ────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LegionConfig {
    /// HTTP listener and logging.
    pub server: ServerConfig,
    /// Model-serving endpoint and model identifiers.
    pub model: ModelConfig,
    /// Reference corpus ingestion and similarity search.
    pub retrieval: RetrievalConfig,
    /// Router agents and history bounds.
    pub routing: RoutingConfig,
    /// The fixed persona roster.
    #[serde(default = "default_personas")]
    pub personas: Vec<PersonaConfig>,
    /// Closed topic → persona table.
    #[serde(default = "default_topics")]
    pub topics: Vec<TopicConfig>,
    /// External search backend; absent disables the search router.
    pub search: Option<SearchConfig>,
}

impl Default for LegionConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            model: ModelConfig::default(),
            retrieval: RetrievalConfig::default(),
            routing: RoutingConfig::default(),
            personas: default_personas(),
            topics: default_topics(),
            search: None,
        }
    }
}

impl LegionConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed, or if the
    /// merged configuration fails validation.
    pub fn load() -> Result<Self> {
        let env = |key: &str| std::env::var(key).ok();
        let mut config = Self::load_from_file(Self::config_path_with(env))?;
        config.apply_overrides(env);
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file only, no env overrides. A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: PathBuf) -> Result<Self> {
        match std::fs::read_to_string(&path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
                    .with_context(|| format!("failed to parse config at {}", path.display()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => {
                Err(anyhow::anyhow!("failed to read config at {}: {e}", path.display()))
            }
        }
    }

    /// Resolve the config path using a custom env resolver.
    pub fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        env("LEGION_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("legion.toml"))
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error on invalid TOML or unknown enum values.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: LegionConfig = toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function so tests never touch the process environment.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("HTTP_PORT") {
            match v.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!(var = "HTTP_PORT", value = %v, "ignoring invalid env override"),
            }
        }
        if let Some(v) = env("LEGION_LOG_LEVEL") {
            self.server.log_level = v;
        }

        if let Some(v) = env("DMR_BASE_URL") {
            self.model.dialect = ModelDialect::OpenAi;
            self.model.base_url = format!("{}{DMR_ENGINE_PATH}", v.trim_end_matches('/'));
        }
        if let Some(v) = env("MODEL_RUNNER_CHAT_MODEL") {
            self.model.chat_model = v;
        }
        if let Some(v) = env("MODEL_RUNNER_TOOLS_MODEL") {
            self.model.tools_model = v;
        }
        if let Some(v) = env("MODEL_RUNNER_EMBEDDING_MODEL") {
            self.model.embedding_model = v;
        }
        for persona in &mut self.personas {
            let var = format!("MODEL_RUNNER_CHAT_MODEL_{}", persona.key.to_uppercase());
            if let Some(v) = env(&var) {
                persona.model = Some(v);
            }
        }

        if let Some(v) = env("LEGION_DOCS_DIR") {
            self.retrieval.docs_dir = PathBuf::from(v);
        }
    }

    /// Check cross-field invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant as an error.
    pub fn validate(&self) -> Result<()> {
        if self.personas.is_empty() {
            bail!("at least one persona must be configured");
        }

        if self.server.max_sessions == 0 {
            bail!("server.max_sessions must be at least 1");
        }
        if self.server.session_idle_secs == 0 {
            bail!("server.session_idle_secs must be at least 1");
        }

        let mut keys = HashSet::new();
        for persona in &self.personas {
            if persona.key.is_empty() || persona.key != persona.key.to_lowercase() {
                bail!("persona key '{}' must be non-empty and lower case", persona.key);
            }
            if !keys.insert(persona.key.as_str()) {
                bail!("duplicate persona key '{}'", persona.key);
            }
        }

        if !keys.contains(self.routing.default_persona.as_str()) {
            bail!(
                "default persona '{}' is not a configured persona",
                self.routing.default_persona
            );
        }

        let mut labels = HashSet::new();
        for topic in &self.topics {
            if !keys.contains(topic.persona.as_str()) {
                bail!(
                    "topic '{}' targets unknown persona '{}'",
                    topic.label,
                    topic.persona
                );
            }
            if !labels.insert(topic.label.as_str()) {
                bail!("duplicate topic label '{}'", topic.label);
            }
        }

        if self.retrieval.chunk_size == 0 || self.retrieval.chunk_overlap >= self.retrieval.chunk_size {
            bail!(
                "chunk_overlap ({}) must be smaller than a non-zero chunk_size ({})",
                self.retrieval.chunk_overlap,
                self.retrieval.chunk_size
            );
        }
        if !(0.0..=1.0).contains(&self.retrieval.similarity_threshold) {
            bail!(
                "similarity_threshold {} must lie within [0, 1]",
                self.retrieval.similarity_threshold
            );
        }

        url::Url::parse(&self.model.base_url)
            .with_context(|| format!("invalid model base_url '{}'", self.model.base_url))?;

        if let Some(search) = &self.search {
            if search.command.is_empty() {
                bail!("[search] command must not be empty");
            }
        }
        Ok(())
    }

    /// Chat model for a persona: its own override or the shared default.
    pub fn persona_model<'a>(&'a self, persona: &'a PersonaConfig) -> &'a str {
        persona.model.as_deref().unwrap_or(&self.model.chat_model)
    }
}

// ── Server ──────────────────────────────────────────────────────

/// HTTP listener and logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen port (`HTTP_PORT`).
    pub port: u16,
    /// Tracing filter used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Directory for rotated JSON logs; console only when unset.
    pub logs_dir: Option<PathBuf>,
    /// Most conversation sessions kept in memory.
    pub max_sessions: usize,
    /// Seconds a session may sit unused before it is dropped.
    pub session_idle_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5050,
            log_level: "info".to_owned(),
            logs_dir: None,
            max_sessions: 1024,
            session_idle_secs: 1_800,
        }
    }
}

// ── Model ───────────────────────────────────────────────────────

/// Wire dialect of the model-serving endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelDialect {
    /// OpenAI-compatible `/chat/completions` and `/embeddings`.
    #[default]
    OpenAi,
    /// Ollama `/api/chat` and `/api/embed`.
    Ollama,
}

/// Model-serving endpoint and model identifiers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Wire dialect.
    pub dialect: ModelDialect,
    /// Base URL of the model-serving endpoint.
    pub base_url: String,
    /// Default chat model for personas.
    pub chat_model: String,
    /// Model used by both router agents.
    pub tools_model: String,
    /// Embedding model for corpus and queries.
    pub embedding_model: String,
    /// Name of an env var holding a bearer token, if the endpoint needs one.
    pub api_key_env: Option<String>,
}

impl ModelConfig {
    /// Resolve the bearer token from the configured env var.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            dialect: ModelDialect::OpenAi,
            base_url: format!("http://localhost:12434{DMR_ENGINE_PATH}"),
            chat_model: "ai/qwen2.5:latest".to_owned(),
            tools_model: "ai/qwen2.5:latest".to_owned(),
            embedding_model: "ai/mxbai-embed-large:latest".to_owned(),
            api_key_env: None,
        }
    }
}

// ── Retrieval ───────────────────────────────────────────────────

/// Reference corpus ingestion and similarity search settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Root directory; each persona reads `<docs_dir>/<key>/`.
    pub docs_dir: PathBuf,
    /// File extension of reference documents, without the dot.
    pub extension: String,
    /// Window size in characters.
    pub chunk_size: usize,
    /// Characters shared by consecutive windows.
    pub chunk_overlap: usize,
    /// Minimum cosine similarity for a snippet to be injected.
    pub similarity_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            docs_dir: PathBuf::from("/app/docs"),
            extension: "md".to_owned(),
            chunk_size: 512,
            chunk_overlap: 210,
            similarity_threshold: 0.7,
        }
    }
}

// ── Routing ─────────────────────────────────────────────────────

/// Router agents and conversation bounds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Persona active at the start of every session.
    pub default_persona: String,
    /// Token budget for the history sent with each generation.
    pub max_history_tokens: u64,
    /// Detects persona hand-off and topic intents.
    pub persona_router: RouterConfig,
    /// Detects explicit external-search intents.
    pub search_router: RouterConfig,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default_persona: "bob".to_owned(),
            max_history_tokens: 6_000,
            persona_router: RouterConfig {
                name: "Riker".to_owned(),
                system_prompt: "Your name is Riker. You know how to join the other clones of \
                                Bob and you can use tools to do so. Only call a tool when the \
                                user asks to speak to someone or names a topic."
                    .to_owned(),
                temperature: 0.0,
            },
            search_router: RouterConfig {
                name: "Khan".to_owned(),
                system_prompt: "Your name is Khan. Use the search tool only if the user \
                                explicitly says they want a web search. Otherwise ignore \
                                the tool."
                    .to_owned(),
                temperature: 0.0,
            },
        }
    }
}

/// A single-turn router agent.
#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    /// Display name used in logs and status labels.
    pub name: String,
    /// System prompt placed before the user message.
    pub system_prompt: String,
    /// Sampling temperature, normally zero.
    #[serde(default)]
    pub temperature: f32,
}

// ── Personas ────────────────────────────────────────────────────

/// One persona of the fixed roster.
#[derive(Debug, Clone, Deserialize)]
pub struct PersonaConfig {
    /// Lower-case lookup key, also the corpus sub-directory name.
    pub key: String,
    /// Display name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// System prompt seeding every session's history.
    pub system_prompt: String,
    /// Chat model override (`MODEL_RUNNER_CHAT_MODEL_<KEY>`).
    #[serde(default)]
    pub model: Option<String>,
    /// Sampling temperature.
    #[serde(default = "default_persona_temperature")]
    pub temperature: f32,
}

/// One entry of the closed topic table.
#[derive(Debug, Clone, Deserialize)]
pub struct TopicConfig {
    /// Exact label the router reports.
    pub label: String,
    /// Key of the persona owning the topic.
    pub persona: String,
    /// Status label used for the hand-off notice.
    #[serde(default = "default_topic_status")]
    pub status: StatusLabel,
}

// ── Search ──────────────────────────────────────────────────────

/// MCP server providing external search tools.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    /// Executable to spawn (for example `socat` or `docker`).
    pub command: String,
    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Tool names exposed to the search router.
    #[serde(default = "default_search_tools")]
    pub tools: Vec<String>,
}

// Default value functions for serde

fn default_persona_temperature() -> f32 {
    0.9
}
fn default_topic_status() -> StatusLabel {
    StatusLabel::Step
}
fn default_search_tools() -> Vec<String> {
    vec!["brave_web_search".to_owned()]
}

const CLONE_ROSTER: &str = "\
If the user asks who you are or who else is around, you can display this list of clones:
- Bob: the original, Docker expert
- Bill: Docker Compose expert
- Garfield: Docker Model Runner expert
- Milo: the intellectual of the bunch, Docker Bake expert
- Riker: in charge of bringing the other clones into the conversation";

fn persona(key: &str, name: &str, description: &str, speciality: &str) -> PersonaConfig {
    PersonaConfig {
        key: key.to_owned(),
        name: name.to_owned(),
        description: description.to_owned(),
        system_prompt: format!(
            "Your name is {name}, you are a {speciality} expert and a helpful assistant.\n\
             If the user asks something about {speciality}, do your best to answer it \
             using your knowledge and the documents you are given.\n\n{CLONE_ROSTER}"
        ),
        model: None,
        temperature: default_persona_temperature(),
    }
}

fn default_personas() -> Vec<PersonaConfig> {
    vec![
        persona("bob", "Bob", "The original Bob", "Docker"),
        persona("bill", "Bill", "Bob's clone, Docker Compose specialist", "Docker Compose"),
        persona("milo", "Milo", "Bob's clone, Docker Bake specialist", "Docker Bake"),
        persona(
            "garfield",
            "Garfield",
            "Bob's clone, Docker Model Runner specialist",
            "Docker Model Runner",
        ),
    ]
}

fn default_topics() -> Vec<TopicConfig> {
    [
        ("docker", "bob", StatusLabel::Pink),
        ("docker compose", "bill", StatusLabel::Orange),
        ("docker model runner", "garfield", StatusLabel::Red),
        ("docker bake", "milo", StatusLabel::Warning),
    ]
    .into_iter()
    .map(|(label, persona, status)| TopicConfig {
        label: label.to_owned(),
        persona: persona.to_owned(),
        status,
    })
    .collect()
}
