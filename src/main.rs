//! toolchat - tool-augmented chat server
//!
//! A Rust backend that runs a bounded model/tool loop per chat session and
//! checkpoints every message to SQLite.

mod api;
mod config;
mod db;
mod llm;
mod runtime;
mod state_machine;
mod system_prompt;
mod title_generator;
mod tools;

use api::{create_router, AppState};
use config::ServerConfig;
use db::Database;
use llm::{LlmConfig, ModelRegistry};
use runtime::RuntimeManager;
use std::net::SocketAddr;
use std::sync::Arc;
use tools::ToolRegistry;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "toolchat=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = ServerConfig::from_env();

    // Ensure database directory and tool workspace exist
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::create_dir_all(&config.workspace)?;

    tracing::info!(path = %config.db_path.display(), "Opening database");
    let db = Database::open(&config.db_path)?;

    // Close tool calls left open by a crash
    let repaired = db.repair_orphaned_tool_calls()?;
    if repaired > 0 {
        tracing::warn!(repaired, "Closed interrupted tool calls");
    }

    // Initialize LLM registry
    let llm_config = LlmConfig::from_env();
    let llm_registry = Arc::new(ModelRegistry::new(&llm_config));

    if llm_registry.has_models() {
        tracing::info!(
            models = ?llm_registry.available_models(),
            default = %llm_registry.default_model_id(),
            "LLM registry initialized"
        );
    } else {
        tracing::warn!("No LLM API keys configured. Set GROQ_API_KEY, OPENAI_API_KEY or LLM_GATEWAY.");
    }

    let tool_registry = Arc::new(ToolRegistry::standard());
    tracing::info!(tools = ?tool_registry.names(), max_rounds = config.max_rounds, "Tools registered");

    let runtime = RuntimeManager::new(
        db,
        llm_registry.clone(),
        tool_registry,
        config.max_rounds,
        config.workspace.clone(),
    );
    let state = AppState::new(runtime, llm_registry);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(state)
        .layer(cors)
        .layer(compression)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("toolchat server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
