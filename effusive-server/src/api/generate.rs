//! Generation and stop endpoints
//!
//! `/generate` answers with newline-delimited JSON. Each line is either an
//! audio chunk or a `{"warning": ...}` line. Chunks marked `parallelized`
//! carry per-sentence lengths for all repetitions batched into one engine
//! run; unmarked chunks are one whole repetition each.

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use effusive_common::api::{AudioChunk, GenerateRequest, StreamChunk};
use effusive_common::audio::concat_segments;
use effusive_common::db;
use effusive_common::Result;
use futures::{Stream, StreamExt};
use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::engine::{EngineOutput, EngineStream, ResolvedRefs, SynthesisJob, TtsEngine};
use crate::error::{ApiError, ApiResult};
use crate::runs::RunGuard;
use crate::AppState;

/// Look up a cataloged reference and check its file is still on disk
async fn resolve_hash(state: &AppState, audio_hash: &str) -> ApiResult<(String, Option<String>)> {
    let record = db::get_ref_audio(&state.db, audio_hash)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("unknown reference audio hash {}", audio_hash)))?;
    if !Path::new(&record.local_filepath).is_file() {
        return Err(ApiError::NotFound(format!(
            "file for reference audio {} is missing: {}",
            audio_hash, record.local_filepath
        )));
    }
    Ok((record.local_filepath, record.utterance))
}

/// Resolve every reference the request names to a server-local path
pub async fn resolve_refs(state: &AppState, request: &GenerateRequest) -> ApiResult<ResolvedRefs> {
    let (ref_audio_path, utterance) = match (&request.ref_audio_hash, &request.ref_audio_path) {
        (Some(hash), _) => resolve_hash(state, hash).await?,
        (None, Some(path)) => {
            if !Path::new(path).is_file() {
                return Err(ApiError::NotFound(format!("reference audio not found: {}", path)));
            }
            (path.clone(), None)
        }
        (None, None) => {
            return Err(ApiError::BadRequest(
                "a primary reference audio (ref_audio_hash or ref_audio_path) is required".to_string(),
            ))
        }
    };

    let mut aux_ref_audio_paths = Vec::with_capacity(request.aux_ref_audio_hashes.len());
    for hash in &request.aux_ref_audio_hashes {
        aux_ref_audio_paths.push(resolve_hash(state, hash).await?.0);
    }

    let prompt_text = request
        .prompt_text
        .clone()
        .filter(|t| !t.trim().is_empty())
        .or(utterance)
        .unwrap_or_default();

    Ok(ResolvedRefs {
        ref_audio_path,
        aux_ref_audio_paths,
        prompt_text,
    })
}

/// The request's seed, if it is to be used as given
///
/// A fixed seed is honored only when the request asks to keep it.
pub fn fixed_seed(request: &GenerateRequest) -> Option<i64> {
    match request.seed {
        Some(seed) if !request.keep_random && seed >= 0 => Some(seed),
        _ => None,
    }
}

/// Seed for one engine run
pub fn pick_seed(request: &GenerateRequest) -> i64 {
    fixed_seed(request).unwrap_or_else(|| rand::random::<u32>() as i64)
}

/// Next engine output, or `None` once the run ends or the generation is stopped
async fn next_output(outputs: &mut EngineStream, run: &RunGuard) -> Option<Result<EngineOutput>> {
    tokio::select! {
        biased;
        _ = run.token().cancelled() => None,
        output = outputs.next() => output,
    }
}

fn stopped_line(done: u32, n: u32) -> String {
    StreamChunk::warning(format!("generation stopped after {} of {} repetitions", done, n)).to_line()
}

/// NDJSON lines for one generation request
///
/// Cancelling `run` ends the stream after the last complete repetition; a
/// repetition cut short is dropped, not sent.
pub fn generation_lines(
    engine: Arc<dyn TtsEngine>,
    request: GenerateRequest,
    refs: ResolvedRefs,
    run: RunGuard,
) -> impl Stream<Item = String> + Send + 'static {
    async_stream::stream! {
        let n = request.n_repetitions;

        if request.is_parallel() {
            let job = SynthesisJob::new(&request, &refs, pick_seed(&request), n);
            let mut outputs = match engine.synthesize(job).await {
                Ok(outputs) => outputs,
                Err(e) => {
                    warn!("Generation failed to start: {}", e);
                    yield StreamChunk::warning(format!("generation failed: {}", e)).to_line();
                    return;
                }
            };
            while let Some(output) = next_output(&mut outputs, &run).await {
                match output {
                    Ok(output) => {
                        let lengths = output
                            .sentence_lengths
                            .unwrap_or_else(|| vec![output.samples.len()]);
                        let chunk = AudioChunk::from_samples(output.sample_rate, &output.samples, lengths, true);
                        yield StreamChunk::Audio(chunk).to_line();
                    }
                    Err(e) => {
                        warn!("Generation failed: {}", e);
                        yield StreamChunk::warning(format!("generation failed: {}", e)).to_line();
                        return;
                    }
                }
            }
            if run.is_cancelled() {
                info!("Parallel generation stopped");
                yield stopped_line(0, n);
            }
            return;
        }

        if n > 1 && fixed_seed(&request).is_some() {
            yield StreamChunk::warning(
                "fixed seed with several sequential repetitions: every repetition will sound the same",
            )
            .to_line();
        }

        for repetition in 0..n {
            if run.is_cancelled() {
                info!(repetition, "Generation stopped");
                yield stopped_line(repetition, n);
                return;
            }

            let job = SynthesisJob::new(&request, &refs, pick_seed(&request), 1);
            let mut outputs = match engine.synthesize(job).await {
                Ok(outputs) => outputs,
                Err(e) => {
                    warn!(repetition, "Generation failed to start: {}", e);
                    yield StreamChunk::warning(format!("generation failed: {}", e)).to_line();
                    return;
                }
            };

            let mut sample_rate = None;
            let mut fragments = Vec::new();
            let mut failed = None;
            while let Some(output) = next_output(&mut outputs, &run).await {
                match output {
                    Ok(output) => {
                        sample_rate.get_or_insert(output.sample_rate);
                        fragments.push(output.samples);
                    }
                    Err(e) => {
                        failed = Some(e);
                        break;
                    }
                }
            }
            if run.is_cancelled() {
                info!(repetition, "Generation stopped mid-repetition");
                yield stopped_line(repetition, n);
                return;
            }
            if let Some(e) = failed {
                warn!(repetition, "Generation failed: {}", e);
                yield StreamChunk::warning(format!("generation failed: {}", e)).to_line();
                return;
            }
            let Some(sample_rate) = sample_rate else {
                warn!(repetition, "Engine produced no audio");
                yield StreamChunk::warning("generation produced no audio").to_line();
                return;
            };

            let samples = concat_segments(&fragments);
            let chunk = AudioChunk::from_samples(sample_rate, &samples, Vec::new(), false);
            yield StreamChunk::Audio(chunk).to_line();
        }
    }
}

/// POST /generate
pub async fn generate(
    State(state): State<AppState>,
    Json(request): Json<GenerateRequest>,
) -> ApiResult<Response> {
    if request.text.trim().is_empty() {
        return Err(ApiError::BadRequest("text must not be empty".to_string()));
    }
    if request.n_repetitions == 0 {
        return Err(ApiError::BadRequest("n_repetitions must be at least 1".to_string()));
    }

    let refs = match resolve_refs(&state, &request).await {
        Ok(refs) => refs,
        Err(e) => {
            state.record_error(e.to_string()).await;
            return Err(e);
        }
    };

    info!(
        chars = request.text.len(),
        n_repetitions = request.n_repetitions,
        parallel = request.is_parallel(),
        "Generating"
    );

    let run = state.generations.register();
    let lines = generation_lines(state.engine.clone(), request, refs, run).map(Ok::<_, Infallible>);
    Ok((
        [(header::CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(lines),
    )
        .into_response())
}

/// POST /stop
pub async fn stop(State(state): State<AppState>) -> StatusCode {
    let stopped = state.generations.cancel_all();
    info!(generations = stopped, "Stop requested");
    state.engine.stop().await;
    StatusCode::OK
}

/// Build generation routes
pub fn generate_routes() -> Router<AppState> {
    Router::new()
        .route("/generate", post(generate))
        .route("/stop", post(stop))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_seed_kept_only_without_keep_random() {
        let fixed = GenerateRequest {
            seed: Some(1234),
            keep_random: false,
            ..Default::default()
        };
        assert_eq!(pick_seed(&fixed), 1234);

        // keep_random overrides a fixed seed; the draw is 32-bit
        let random = GenerateRequest {
            seed: Some(-1),
            keep_random: true,
            ..Default::default()
        };
        let seed = pick_seed(&random);
        assert!((0..=u32::MAX as i64).contains(&seed));
    }

    #[test]
    fn test_negative_seed_is_not_fixed() {
        let request = GenerateRequest {
            seed: Some(-1),
            keep_random: false,
            ..Default::default()
        };
        assert_eq!(fixed_seed(&request), None);
        assert!((0..=u32::MAX as i64).contains(&pick_seed(&request)));
    }
}
