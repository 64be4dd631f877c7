//! Legion CLI entry point.
//!
//! Provides `start` to run the chat server and `check` to validate the
//! configuration and print the persona roster.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use legion::api::{self, AppState};
use legion::config::LegionConfig;
use legion::dispatch::Dispatcher;
use legion::memory::embedder::build_embedder;
use legion::memory::{EmbeddingRetrieval, RetrievalService};
use legion::personas::PersonaRegistry;
use legion::session::SessionLimits;
use legion::tools::mcp::McpSearchBackend;
use legion::tools::ExternalToolBackend;

/// Legion: a multi-persona chat router.
#[derive(Parser)]
#[command(name = "legion", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Build every persona and serve the chat API.
    Start {
        /// Listen port, overriding `HTTP_PORT` and the config file.
        #[arg(long)]
        port: Option<u16>,
        /// Write rotated JSON logs to this directory.
        #[arg(long)]
        logs_dir: Option<PathBuf>,
    },
    /// Validate the configuration and print the persona and topic tables.
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    // A missing .env file is normal outside compose deployments.
    let _ = dotenvy::dotenv();

    match cli.command {
        Command::Start { port, logs_dir } => handle_start(port, logs_dir).await,
        Command::Check => handle_check(),
    }
}

/// Run the chat server until Ctrl-C.
async fn handle_start(port: Option<u16>, logs_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let mut config = LegionConfig::load().context("failed to load configuration")?;
    if let Some(port) = port {
        config.server.port = port;
    }

    let _logging_guard = match logs_dir.or_else(|| config.server.logs_dir.clone()) {
        Some(dir) => Some(legion::logging::init_production(&dir, &config.server.log_level)?),
        None => {
            legion::logging::init_cli(&config.server.log_level);
            None
        }
    };
    info!(
        version = env!("CARGO_PKG_VERSION"),
        base_url = %config.model.base_url,
        chat_model = %config.model.chat_model,
        "legion starting"
    );

    let model = &config.model;
    let embedder = build_embedder(
        model.dialect,
        &model.base_url,
        &model.embedding_model,
        model.api_key(),
    );

    let backend: Option<Arc<dyn ExternalToolBackend>> = match &config.search {
        Some(search) => match McpSearchBackend::spawn(search).await {
            Ok(backend) => Some(Arc::new(backend) as Arc<dyn ExternalToolBackend>),
            Err(e) => {
                warn!(error = %e, command = %search.command, "search backend unavailable, web search disabled");
                None
            }
        },
        None => None,
    };
    let search_tools = backend
        .as_ref()
        .map(|b| b.definitions())
        .unwrap_or_default();

    let registry = PersonaRegistry::initialize(&config, embedder.as_ref(), search_tools)
        .await
        .context("failed to build persona registry")?;
    let retrieval: Arc<dyn RetrievalService> = Arc::new(EmbeddingRetrieval::new(embedder));

    let dispatcher = Dispatcher::new(
        Arc::new(registry),
        retrieval,
        backend,
        config.retrieval.similarity_threshold,
        config.routing.max_history_tokens,
    );

    let limits = SessionLimits::from(&config.server);
    info!(
        max_sessions = limits.max_sessions,
        idle_secs = config.server.session_idle_secs,
        "session limits"
    );
    api::serve(AppState::with_limits(dispatcher, limits), config.server.port).await
}

/// Validate configuration and print what `start` would build.
fn handle_check() -> anyhow::Result<()> {
    legion::logging::init_cli("warn");
    let config = LegionConfig::load().context("configuration is invalid")?;

    println!("model endpoint: {} ({:?})", config.model.base_url, config.model.dialect);
    println!("tools model:    {}", config.model.tools_model);
    println!("embeddings:     {}", config.model.embedding_model);
    println!();
    println!("{:<10} {:<10} {:<28} docs", "key", "name", "model");
    for persona in &config.personas {
        let dir = config.retrieval.docs_dir.join(&persona.key);
        let docs = if dir.is_dir() { "ok" } else { "missing" };
        println!(
            "{:<10} {:<10} {:<28} {} ({docs})",
            persona.key,
            persona.name,
            config.persona_model(persona),
            dir.display()
        );
    }
    println!();
    for topic in &config.topics {
        println!("topic {:?} -> {}", topic.label, topic.persona);
    }
    match &config.search {
        Some(search) => println!("search: {} {}", search.command, search.args.join(" ")),
        None => println!("search: disabled"),
    }
    Ok(())
}
