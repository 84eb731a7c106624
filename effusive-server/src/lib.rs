//! effusive-server library
//!
//! Local HTTP front end for the TTS engine: model discovery and loading,
//! the reference-audio catalog, and streamed generation.

pub mod api;
pub mod engine;
pub mod error;
pub mod hf;
pub mod runs;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use effusive_common::config::ServerConfig;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use crate::engine::TtsEngine;
use crate::hf::ModelHub;
use crate::runs::RunRegistry;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Reference-audio catalog
    pub db: SqlitePool,
    pub engine: Arc<dyn TtsEngine>,
    /// Source of downloadable models
    pub hub: Arc<dyn ModelHub>,
    pub config: Arc<ServerConfig>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last generation failure, reported by /health
    pub last_error: Arc<RwLock<Option<String>>>,
    /// Generation streams in flight, ended by /stop
    pub generations: RunRegistry,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        engine: Arc<dyn TtsEngine>,
        hub: Arc<dyn ModelHub>,
        config: ServerConfig,
    ) -> Self {
        Self {
            db,
            engine,
            hub,
            config: Arc::new(config),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
            generations: RunRegistry::new(),
        }
    }

    pub async fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write().await = Some(message.into());
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::model_routes())
        .merge(api::generate_routes())
        .merge(api::ref_audio_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
