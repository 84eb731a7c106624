//! effusive-server - local TTS inference service
//!
//! Serves the catalog, model and generation endpoints on a local port and
//! forwards synthesis jobs to the configured inference worker.

use anyhow::{Context, Result};
use clap::Parser;
use effusive_common::config::{resolve_root_folder, ServerConfig, ROOT_ENV_VAR};
use effusive_common::db::init_database_pool;
use effusive_server::engine::{SubprocessEngine, TtsEngine};
use effusive_server::hf::HfHub;
use effusive_server::{build_router, AppState};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "effusive-server", version, about = "Local TTS inference server")]
struct Args {
    /// Root folder holding server.toml, the catalog and reference audio
    #[arg(long)]
    root_folder: Option<String>,

    /// Bind address (overrides server.toml)
    #[arg(long)]
    host: Option<String>,

    /// Port (overrides server.toml)
    #[arg(long)]
    port: Option<u16>,

    /// Inference worker command (overrides server.toml)
    #[arg(long)]
    engine_command: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Starting effusive-server v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), ROOT_ENV_VAR);
    std::fs::create_dir_all(&root_folder)
        .with_context(|| format!("Failed to create root folder {}", root_folder.display()))?;
    info!("Root folder: {}", root_folder.display());

    let mut config = ServerConfig::load(&root_folder);
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(command) = args.engine_command {
        config.engine.command = command;
    }
    std::fs::create_dir_all(&config.ref_audio_dir)?;
    std::fs::create_dir_all(&config.models_dir)?;

    info!("Database path: {}", config.database_file.display());
    let pool = match init_database_pool(&config.database_file).await {
        Ok(pool) => {
            info!("✓ Connected to database");
            pool
        }
        Err(e) => {
            error!("Failed to connect to database: {}", e);
            return Err(e.into());
        }
    };

    let engine = Arc::new(SubprocessEngine::new(config.engine.clone()));
    let weights = engine.active_models().await;
    info!(
        command = %config.engine.command,
        gpt = ?weights.gpt_path,
        sovits = ?weights.sovits_path,
        "Inference engine configured"
    );

    let address = config.bind_address();
    let state = AppState::new(pool, engine, Arc::new(HfHub), config);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;
    info!("effusive-server listening on http://{}", address);
    info!("Health check: http://{}/health", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    Ok(())
}
