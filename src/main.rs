//! # pointer
//!
//! Pointer server binary: wires settings, storage, the LLM provider and the
//! turn engine together and serves the message API.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use pointer_core::provider::{LlmProvider, StreamOptions};
use pointer_core::security::ApiKey;
use pointer_engine::{
    FirecrawlFetcher, HttpPageFetcher, MessageService, PageFetcher, ProcessMessage, QuickEditService,
    RetryPolicy, RouterConfig, TurnConfig, WorkflowEngine,
};
use pointer_llm::{AnthropicProvider, ReliableConfig, ReliableProvider, UnconfiguredProvider};
use pointer_server::{AppState, ServerConfig};
use pointer_settings::loader::pointer_home;
use pointer_settings::Settings;
use pointer_store::{Database, SqliteProjectStore};
use pointer_telemetry::{init_telemetry, TelemetryConfig};

/// Pointer agent server.
#[derive(Parser, Debug)]
#[command(name = "pointer", about = "Durable coding-agent turns over HTTP")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the message API.
    Serve {
        /// Port to bind (0 for auto-assign). Overrides settings.
        #[arg(long)]
        port: Option<u16>,

        /// Path to the SQLite database. Overrides settings.
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Create a project with one conversation and print their ids.
    Seed {
        #[arg(long)]
        project: String,

        #[arg(long)]
        db: Option<PathBuf>,
    },
}

/// Relative database paths live under `~/.pointer`.
fn resolve_db_path(settings: &Settings, flag: Option<PathBuf>) -> PathBuf {
    let path = flag.unwrap_or_else(|| PathBuf::from(&settings.database.path));
    if path.is_absolute() {
        path
    } else {
        pointer_home().join(path)
    }
}

fn open_database(path: &Path) -> Result<Database> {
    Database::open(path).with_context(|| format!("Failed to open database: {}", path.display()))
}

fn build_provider(settings: &Settings) -> Result<Arc<dyn LlmProvider>> {
    let Some(key) = settings.secrets.anthropic_api_key.clone() else {
        tracing::warn!("ANTHROPIC_API_KEY not set; turns will fail until it is configured");
        return Ok(Arc::new(UnconfiguredProvider::new(&settings.llm.model)));
    };
    let anthropic = AnthropicProvider::new(ApiKey(key), &settings.llm.model)
        .context("Failed to build Anthropic provider")?;
    let config = ReliableConfig {
        max_retries: settings.llm.max_retries,
        ..ReliableConfig::default()
    };
    Ok(Arc::new(ReliableProvider::new(anthropic, config)))
}

fn build_fetcher(settings: &Settings) -> Arc<dyn PageFetcher> {
    let timeout = Duration::from_millis(settings.scrape.timeout_ms);
    match settings.secrets.firecrawl_api_key.clone() {
        Some(key) => {
            tracing::info!(url = %settings.scrape.firecrawl_url, "scraping through Firecrawl");
            Arc::new(FirecrawlFetcher::new(
                ApiKey(key),
                &settings.scrape.firecrawl_url,
                timeout,
            ))
        }
        None => Arc::new(HttpPageFetcher::new(timeout, settings.scrape.max_bytes)),
    }
}

fn turn_config(settings: &Settings) -> TurnConfig {
    TurnConfig {
        read_after_write_delay: Duration::from_millis(settings.agent.read_after_write_delay_ms),
        context_messages: settings.agent.context_messages,
        tool_timeout: Duration::from_millis(settings.agent.tool_timeout_ms),
        router: RouterConfig {
            max_rounds: settings.agent.max_rounds,
            stream_options: StreamOptions {
                max_tokens: Some(settings.llm.max_tokens),
                ..StreamOptions::default()
            },
            ..RouterConfig::default()
        },
    }
}

fn retry_policy(settings: &Settings) -> RetryPolicy {
    RetryPolicy {
        max_attempts: settings.workflow.step_max_attempts,
        base_delay: Duration::from_millis(settings.workflow.step_base_delay_ms),
        max_delay: Duration::from_millis(settings.workflow.step_max_delay_ms),
    }
}

async fn serve(settings: Settings, port: Option<u16>, db: Option<PathBuf>) -> Result<()> {
    let db_path = resolve_db_path(&settings, db);
    let db = open_database(&db_path)?;
    let store = Arc::new(SqliteProjectStore::new(db.clone()));

    let provider = build_provider(&settings)?;
    let fetcher = build_fetcher(&settings);
    let turn_config = turn_config(&settings);
    let quick_edit = QuickEditService::new(Arc::clone(&provider), Arc::clone(&fetcher))
        .with_options(turn_config.router.stream_options.clone());
    let handler = Arc::new(ProcessMessage::new(store.clone(), provider, fetcher, turn_config));
    let engine = WorkflowEngine::new(db, retry_policy(&settings));
    let service = MessageService::new(store, engine, handler);

    if settings.workflow.resume_on_start {
        let resumed = service.resume().context("Failed to resume pending turns")?;
        tracing::info!(count = resumed.len(), "pending turns resumed");
    }

    let config = ServerConfig {
        host: settings.server.host.clone(),
        port: port.unwrap_or(settings.server.port),
    };
    let handle = pointer_server::start(config, AppState { service, quick_edit })
        .await
        .context("Failed to start server")?;
    tracing::info!(port = handle.port, db = %db_path.display(), "Pointer server ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;
    tracing::info!("Shutting down");
    handle.shutdown().await;
    Ok(())
}

fn seed(settings: &Settings, project: &str, db: Option<PathBuf>) -> Result<()> {
    let db = open_database(&resolve_db_path(settings, db))?;
    let store = SqliteProjectStore::new(db);
    let project_id = store
        .create_project(project)
        .context("Failed to create project")?;
    let conversation = store
        .create_conversation(&project_id, None)
        .context("Failed to create conversation")?;
    println!("project:      {project_id}");
    println!("conversation: {}", conversation.id);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = pointer_settings::load_settings().context("Failed to load settings")?;

    init_telemetry(&TelemetryConfig::from_parts(
        &settings.logging.level,
        &settings.logging.modules,
        settings.logging.json,
    ));

    match cli.command {
        Command::Serve { port, db } => serve(settings, port, db).await,
        Command::Seed { project, db } => seed(&settings, &project, db),
    }
}
