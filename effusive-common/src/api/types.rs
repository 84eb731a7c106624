//! Wire types of the local inference API

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::audio::{decode_pcm16_base64, encode_pcm16_base64};
use crate::Result;

// ========================================
// Inference parameters
// ========================================

/// Language tag understood by the engine's text frontend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Language {
    #[default]
    #[serde(rename = "en")]
    English,
    #[serde(rename = "all_zh")]
    Mandarin,
    #[serde(rename = "all_yue")]
    Cantonese,
    #[serde(rename = "all_ja")]
    Japanese,
    #[serde(rename = "all_ko")]
    Korean,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::English,
        Language::Mandarin,
        Language::Cantonese,
        Language::Japanese,
        Language::Korean,
    ];

    /// Tag as sent on the wire
    pub fn code(self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Mandarin => "all_zh",
            Language::Cantonese => "all_yue",
            Language::Japanese => "all_ja",
            Language::Korean => "all_ko",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.code() == code)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// How the engine batches input text before synthesis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TextSplitMethod {
    /// Do not batch
    #[serde(rename = "cut0")]
    None,
    /// Batch every four sentences
    #[default]
    #[serde(rename = "cut1")]
    EveryFourSentences,
    /// Batch every 50 characters
    #[serde(rename = "cut2")]
    EveryFiftyChars,
    #[serde(rename = "cut3")]
    ChinesePunctuation,
    #[serde(rename = "cut4")]
    EnglishPunctuation,
    #[serde(rename = "cut5")]
    AllPunctuation,
}

impl TextSplitMethod {
    pub const ALL: [TextSplitMethod; 6] = [
        TextSplitMethod::None,
        TextSplitMethod::EveryFourSentences,
        TextSplitMethod::EveryFiftyChars,
        TextSplitMethod::ChinesePunctuation,
        TextSplitMethod::EnglishPunctuation,
        TextSplitMethod::AllPunctuation,
    ];

    pub fn code(self) -> &'static str {
        match self {
            TextSplitMethod::None => "cut0",
            TextSplitMethod::EveryFourSentences => "cut1",
            TextSplitMethod::EveryFiftyChars => "cut2",
            TextSplitMethod::ChinesePunctuation => "cut3",
            TextSplitMethod::EnglishPunctuation => "cut4",
            TextSplitMethod::AllPunctuation => "cut5",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.code() == code)
    }
}

impl fmt::Display for TextSplitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

fn default_top_k() -> u32 {
    5
}
fn default_one() -> f64 {
    1.0
}
fn default_batch_size() -> u32 {
    20
}
fn default_true() -> bool {
    true
}
fn default_fragment_interval() -> f64 {
    0.3
}
fn default_repetition_penalty() -> f64 {
    1.35
}
fn default_n_repetitions() -> u32 {
    1
}

/// POST /generate request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub text_lang: Language,
    /// Language of the reference audio transcript
    #[serde(default)]
    pub prompt_lang: Language,

    /// Primary reference audio, by catalog hash
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_audio_hash: Option<String>,
    /// Primary reference audio, by server-local path (when no hash is given)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_audio_path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aux_ref_audio_hashes: Vec<String>,
    /// Transcript of the primary reference; the catalog utterance if absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_text: Option<String>,

    #[serde(default = "default_top_k")]
    pub top_k: u32,
    #[serde(default = "default_one")]
    pub top_p: f64,
    #[serde(default = "default_one")]
    pub temperature: f64,
    #[serde(default = "default_repetition_penalty")]
    pub repetition_penalty: f64,

    #[serde(default)]
    pub text_split_method: TextSplitMethod,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_one")]
    pub speed_factor: f64,
    #[serde(default = "default_true")]
    pub split_bucket: bool,
    /// Pause inserted between sentences, in seconds
    #[serde(default = "default_fragment_interval")]
    pub fragment_interval: f64,
    #[serde(default = "default_true")]
    pub parallel_infer: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    /// Ignore `seed` and draw a fresh one per repetition
    #[serde(default = "default_true")]
    pub keep_random: bool,
    #[serde(default = "default_n_repetitions")]
    pub n_repetitions: u32,

    /// Speaker label used to name output files; ignored by the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub characters: Option<String>,
}

impl Default for GenerateRequest {
    fn default() -> Self {
        Self {
            text: String::new(),
            text_lang: Language::default(),
            prompt_lang: Language::default(),
            ref_audio_hash: None,
            ref_audio_path: None,
            aux_ref_audio_hashes: Vec::new(),
            prompt_text: None,
            top_k: default_top_k(),
            top_p: 1.0,
            temperature: 1.0,
            repetition_penalty: default_repetition_penalty(),
            text_split_method: TextSplitMethod::default(),
            batch_size: default_batch_size(),
            speed_factor: 1.0,
            split_bucket: true,
            fragment_interval: default_fragment_interval(),
            parallel_infer: true,
            seed: None,
            keep_random: true,
            n_repetitions: default_n_repetitions(),
            characters: None,
        }
    }
}

impl GenerateRequest {
    /// Every reference hash this request depends on, primary first
    pub fn referenced_hashes(&self) -> Vec<String> {
        let mut hashes: Vec<String> = self.ref_audio_hash.iter().cloned().collect();
        hashes.extend(self.aux_ref_audio_hashes.iter().cloned());
        hashes
    }

    /// Parallel generation batches all repetitions into one engine run
    pub fn is_parallel(&self) -> bool {
        self.parallel_infer && self.n_repetitions > 1
    }
}

// ========================================
// Streamed generation output
// ========================================

/// Audio portion of a generation stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioChunk {
    /// Sample rate in Hz
    pub sr: u32,
    /// Base64 of little-endian PCM16 mono samples
    pub audio: String,
    /// Per-sentence sample counts (parallel generation only)
    #[serde(default)]
    pub this_gen_lengths: Vec<usize>,
    #[serde(default)]
    pub parallelized: bool,
}

impl AudioChunk {
    pub fn from_samples(
        sr: u32,
        samples: &[i16],
        this_gen_lengths: Vec<usize>,
        parallelized: bool,
    ) -> Self {
        Self {
            sr,
            audio: encode_pcm16_base64(samples),
            this_gen_lengths,
            parallelized,
        }
    }

    pub fn samples(&self) -> Result<Vec<i16>> {
        decode_pcm16_base64(&self.audio)
    }
}

/// One line of the newline-delimited `/generate` response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamChunk {
    Audio(AudioChunk),
    Warning { warning: String },
}

impl StreamChunk {
    pub fn warning(message: impl Into<String>) -> Self {
        StreamChunk::Warning {
            warning: message.into(),
        }
    }

    /// Serialize as one NDJSON line, newline included
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"warning":"failed to encode chunk: {}"}}"#, e)
        });
        line.push('\n');
        line
    }

    /// Parse one NDJSON line; blank lines yield `None`
    pub fn parse_line(line: &str) -> Result<Option<Self>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(line)?))
    }
}

// ========================================
// Models
// ========================================

/// POST /set_models request body; absent fields keep the current weight
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetModelsRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpt_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sovits_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cnhubert_base_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bert_path: Option<String>,
}

impl SetModelsRequest {
    /// (field name, path) for every field that is set
    pub fn paths(&self) -> Vec<(&'static str, &str)> {
        [
            ("gpt_path", &self.gpt_path),
            ("sovits_path", &self.sovits_path),
            ("cnhubert_base_path", &self.cnhubert_base_path),
            ("bert_path", &self.bert_path),
        ]
        .into_iter()
        .filter_map(|(name, path)| path.as_deref().map(|p| (name, p)))
        .collect()
    }
}

/// Loose weights found in the engine weight folders
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LooseModels {
    pub sovits_weights: Vec<String>,
    pub gpt_weights: Vec<String>,
}

/// A model folder holding one weight of each kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderModel {
    pub model_name: String,
    pub sovits_weight: String,
    pub gpt_weight: String,
}

/// POST /find_models response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoundModels {
    pub loose_models: LooseModels,
    pub folder_models: Vec<FolderModel>,
}

/// GPT + SoVITS weight paths within a remote repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelPair {
    pub gpt_weight: String,
    pub sovits_weight: String,
}

/// POST /download_hf_models request body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadHfModelsRequest {
    /// Hugging Face repository id, e.g. `owner/name`
    pub repo: String,
    /// Model to fetch; every complete model in the repo when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
}

/// POST /download_hf_models response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadHfModelsResponse {
    pub models: Vec<FolderModel>,
}

// ========================================
// Reference audio
// ========================================

/// POST /post_ref_audio request body
///
/// Exactly one of `base64_audio_data` (remote upload) or `local_filepath`
/// (server shares the client's filesystem) should be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRefAudioRequest {
    pub audio_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64_audio_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_filepath: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub utterance: Option<String>,
}

/// POST /post_ref_audio response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRefAudioResponse {
    pub audio_hash: String,
    pub local_filepath: String,
    /// False when the hash was already cataloged
    pub created: bool,
}

/// /test_hashes request body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestHashesRequest {
    pub hashes: Vec<String>,
}

/// /test_hashes response: hash -> usable on the server
pub type TestHashesResponse = BTreeMap<String, bool>;

// ========================================
// Errors & health
// ========================================

/// Error detail in every non-success response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

/// `{"error": {"code", "message"}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// GET /health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}
