//! Model discovery, loading and download endpoints

use axum::{extract::State, routing::post, Json, Router};
use effusive_common::api::{DownloadHfModelsRequest, DownloadHfModelsResponse, FoundModels, SetModelsRequest};
use effusive_common::models::find_models as scan_models;
use std::path::Path;
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// POST /find_models
pub async fn find_models(State(state): State<AppState>) -> ApiResult<Json<FoundModels>> {
    let config = state.config.clone();
    let found = tokio::task::spawn_blocking(move || scan_models(&config.base_dir, &config.models_dir)).await?;
    info!(
        sovits = found.loose_models.sovits_weights.len(),
        gpt = found.loose_models.gpt_weights.len(),
        folders = found.folder_models.len(),
        "Model scan complete"
    );
    Ok(Json(found))
}

/// POST /set_models
///
/// Loads every weight named in the body; the rest stay loaded as they are.
pub async fn set_models(
    State(state): State<AppState>,
    Json(request): Json<SetModelsRequest>,
) -> ApiResult<Json<SetModelsRequest>> {
    for (field, path) in request.paths() {
        if !Path::new(path).exists() {
            return Err(ApiError::BadRequest(format!("{} does not exist: {}", field, path)));
        }
    }

    let active = state.engine.set_models(&request).await?;
    Ok(Json(active))
}

/// POST /download_hf_models
pub async fn download_hf_models(
    State(state): State<AppState>,
    Json(request): Json<DownloadHfModelsRequest>,
) -> ApiResult<Json<DownloadHfModelsResponse>> {
    if request.repo.trim().is_empty() {
        return Err(ApiError::BadRequest("repo must not be empty".to_string()));
    }

    let hub = state.hub.clone();
    let models_dir = state.config.models_dir.clone();
    let models = tokio::task::spawn_blocking(move || {
        crate::hf::download_models(
            hub.as_ref(),
            request.repo.trim(),
            request.model_name.as_deref(),
            &models_dir,
        )
    })
    .await??;

    info!(count = models.len(), "Downloaded models");
    Ok(Json(DownloadHfModelsResponse { models }))
}

/// Build model routes
pub fn model_routes() -> Router<AppState> {
    Router::new()
        .route("/find_models", post(find_models))
        .route("/set_models", post(set_models))
        .route("/download_hf_models", post(download_hf_models))
}
