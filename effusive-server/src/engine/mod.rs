//! TTS engine seam
//!
//! The HTTP layer never talks to the model directly. It hands a
//! [`SynthesisJob`] to a [`TtsEngine`] and relays whatever audio comes back.

pub mod subprocess;

pub use subprocess::SubprocessEngine;

use async_trait::async_trait;
use effusive_common::api::{GenerateRequest, Language, SetModelsRequest, TextSplitMethod};
use effusive_common::Result;
use futures::stream::BoxStream;
use serde::Serialize;

/// Weight paths the engine has loaded
pub type ModelWeights = SetModelsRequest;

/// Audio produced by one engine step
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOutput {
    pub sample_rate: u32,
    pub samples: Vec<i16>,
    /// Samples per sentence, present when the engine batched repetitions
    pub sentence_lengths: Option<Vec<usize>>,
}

pub type EngineStream = BoxStream<'static, Result<EngineOutput>>;

/// One synthesis run as handed to the engine
///
/// Field names follow the engine pipeline's own parameter names.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisJob {
    pub text: String,
    pub text_lang: Language,
    pub ref_audio_path: String,
    pub aux_ref_audio_paths: Vec<String>,
    pub prompt_text: String,
    pub prompt_lang: Language,
    pub top_k: u32,
    pub top_p: f64,
    pub temperature: f64,
    pub text_split_method: TextSplitMethod,
    pub batch_size: u32,
    pub speed_factor: f64,
    pub split_bucket: bool,
    pub return_fragment: bool,
    pub fragment_interval: f64,
    pub seed: i64,
    pub parallel_infer: bool,
    pub repetition_penalty: f64,
    /// Repetitions batched into this run (1 outside parallel mode)
    pub n_repetitions: u32,
}

/// Resolved reference audio for a request
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRefs {
    pub ref_audio_path: String,
    pub aux_ref_audio_paths: Vec<String>,
    pub prompt_text: String,
}

impl SynthesisJob {
    pub fn new(request: &GenerateRequest, refs: &ResolvedRefs, seed: i64, n_repetitions: u32) -> Self {
        Self {
            text: request.text.clone(),
            text_lang: request.text_lang,
            ref_audio_path: refs.ref_audio_path.clone(),
            aux_ref_audio_paths: refs.aux_ref_audio_paths.clone(),
            prompt_text: refs.prompt_text.clone(),
            prompt_lang: request.prompt_lang,
            top_k: request.top_k,
            top_p: request.top_p,
            temperature: request.temperature,
            text_split_method: request.text_split_method,
            batch_size: request.batch_size,
            speed_factor: request.speed_factor,
            split_bucket: request.split_bucket,
            return_fragment: false,
            fragment_interval: request.fragment_interval,
            seed,
            parallel_infer: request.parallel_infer,
            repetition_penalty: request.repetition_penalty,
            n_repetitions,
        }
    }
}

#[async_trait]
pub trait TtsEngine: Send + Sync {
    /// Load the weights that are set in `update`; others stay as they are.
    /// Returns the full set of active weights.
    async fn set_models(&self, update: &ModelWeights) -> Result<ModelWeights>;

    async fn active_models(&self) -> ModelWeights;

    /// Start a synthesis run
    async fn synthesize(&self, job: SynthesisJob) -> Result<EngineStream>;

    /// Stop the active run, if any. Best effort.
    async fn stop(&self);
}

/// Overlay the fields set in `update` onto `current`
pub fn merge_weights(current: &ModelWeights, update: &ModelWeights) -> ModelWeights {
    ModelWeights {
        gpt_path: update.gpt_path.clone().or_else(|| current.gpt_path.clone()),
        sovits_path: update.sovits_path.clone().or_else(|| current.sovits_path.clone()),
        cnhubert_base_path: update
            .cnhubert_base_path
            .clone()
            .or_else(|| current.cnhubert_base_path.clone()),
        bert_path: update.bert_path.clone().or_else(|| current.bert_path.clone()),
    }
}
