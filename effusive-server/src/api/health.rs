//! Liveness and health endpoints

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use effusive_common::api::HealthResponse;

use crate::AppState;

/// GET|HEAD /test
///
/// Bare liveness probe used by clients when connecting.
pub async fn test_connection() -> StatusCode {
    StatusCode::OK
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let last_error = state.last_error.read().await.clone();

    Json(HealthResponse {
        status: "ok".to_string(),
        module: "effusive-server".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        last_error,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/test", get(test_connection).head(test_connection))
        .route("/health", get(health_check))
}
