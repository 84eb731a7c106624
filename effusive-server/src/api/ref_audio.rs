//! Reference audio upload and lookup endpoints

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use base64::Engine as _;
use effusive_common::api::{PostRefAudioRequest, PostRefAudioResponse, TestHashesRequest, TestHashesResponse};
use effusive_common::db::{self, RefAudio, UpsertOutcome};
use effusive_common::hashing::{hash_bytes, hash_file, is_valid_hash};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

fn check_hash(expected: &str, actual: &str) -> ApiResult<()> {
    if expected != actual {
        return Err(ApiError::BadRequest(format!(
            "audio hash mismatch: expected {}, content hashes to {}",
            expected, actual
        )));
    }
    Ok(())
}

/// Store an uploaded payload under the reference directory, named by hash
async fn store_upload(ref_audio_dir: &Path, audio_hash: &str, encoded: &str) -> ApiResult<PathBuf> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| ApiError::BadRequest(format!("invalid base64 audio data: {}", e)))?;
    check_hash(audio_hash, &hash_bytes(&bytes))?;

    tokio::fs::create_dir_all(ref_audio_dir).await?;
    let path = ref_audio_dir.join(audio_hash);
    tokio::fs::write(&path, &bytes).await?;
    Ok(path)
}

/// Verify a file the server can already see
async fn verify_local(audio_hash: &str, local_filepath: &str) -> ApiResult<PathBuf> {
    let path = PathBuf::from(local_filepath);
    if !path.is_file() {
        return Err(ApiError::NotFound(format!("no such file: {}", local_filepath)));
    }
    let hashed = path.clone();
    let actual = tokio::task::spawn_blocking(move || hash_file(&hashed)).await??;
    check_hash(audio_hash, &actual)?;
    Ok(path)
}

/// POST /post_ref_audio
///
/// Registers a reference audio file, either uploaded as base64 or by a path
/// on the server's filesystem. Uploading the same content twice keeps one
/// record.
pub async fn post_ref_audio(
    State(state): State<AppState>,
    Json(request): Json<PostRefAudioRequest>,
) -> ApiResult<(StatusCode, Json<PostRefAudioResponse>)> {
    let audio_hash = request.audio_hash.trim().to_ascii_lowercase();
    if !is_valid_hash(&audio_hash) {
        return Err(ApiError::BadRequest(format!("not a SHA-256 hash: {}", request.audio_hash)));
    }

    let path = match (&request.base64_audio_data, &request.local_filepath) {
        (Some(encoded), _) => store_upload(&state.config.ref_audio_dir, &audio_hash, encoded).await?,
        (None, Some(local)) => verify_local(&audio_hash, local).await?,
        (None, None) => {
            return Err(ApiError::BadRequest(
                "either base64_audio_data or local_filepath is required".to_string(),
            ))
        }
    };
    let local_filepath = path.to_string_lossy().into_owned();

    let mut record = RefAudio::new(&audio_hash, &local_filepath);
    record.utterance = request.utterance.clone().filter(|u| !u.trim().is_empty());
    let outcome = db::upsert_ref_audio(&state.db, &record, true).await?;

    info!(audio_hash = %audio_hash, path = %local_filepath, outcome = ?outcome, "Reference audio registered");

    Ok((
        StatusCode::CREATED,
        Json(PostRefAudioResponse {
            audio_hash,
            local_filepath,
            created: outcome == UpsertOutcome::Inserted,
        }),
    ))
}

/// GET|POST /test_hashes
///
/// Which of the given hashes the server can use without an upload.
pub async fn test_hashes(
    State(state): State<AppState>,
    Json(request): Json<TestHashesRequest>,
) -> ApiResult<Json<TestHashesResponse>> {
    let known = db::known_hashes(&state.db, &request.hashes).await?;
    Ok(Json(known))
}

/// Build reference audio routes
pub fn ref_audio_routes() -> Router<AppState> {
    Router::new()
        .route("/post_ref_audio", post(post_ref_audio))
        .route("/test_hashes", get(test_hashes).post(test_hashes))
}
