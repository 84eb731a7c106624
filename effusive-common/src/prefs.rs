//! Client preferences
//!
//! A YAML document holding UI preferences and default inference
//! parameters. It is read once at startup and rewritten after every change.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::api::{Language, TextSplitMethod};
use crate::{Error, Result};

/// Default preferences file, relative to the working directory
pub const DEFAULT_PREFS_PATH: &str = "effusive_gui_config.yaml";

/// Default inference parameters offered for each generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceDefaults {
    pub top_k: u32,
    pub top_p: f64,
    pub temperature: f64,
    pub text_split_method: TextSplitMethod,
    pub batch_size: u32,
    pub speed_factor: f64,
    pub fragment_interval: f64,
    pub repetition_penalty: f64,
    pub use_random: bool,
    pub n_repetitions: u32,
    /// Upper bound for `batch_size`; large batches tend to run out of GPU memory
    pub max_batch_size: u32,
    pub text_lang: Language,
    pub prompt_lang: Language,
}

impl Default for InferenceDefaults {
    fn default() -> Self {
        Self {
            top_k: 5,
            top_p: 1.0,
            temperature: 1.0,
            text_split_method: TextSplitMethod::EnglishPunctuation,
            batch_size: 10,
            speed_factor: 1.0,
            fragment_interval: 0.3,
            repetition_penalty: 1.35,
            use_random: true,
            n_repetitions: 3,
            max_batch_size: 20,
            text_lang: Language::English,
            prompt_lang: Language::English,
        }
    }
}

/// Whole preferences document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub enable_hi_dpi: bool,
    /// Last server the client connected to
    pub host: String,
    pub ref_audios_dir: PathBuf,
    pub outputs_dir: PathBuf,
    pub models_dir: PathBuf,
    pub database_file: PathBuf,
    /// Longest generated output filename stem
    pub output_name_max_length: usize,
    pub inference: InferenceDefaults,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            enable_hi_dpi: false,
            host: "http://localhost:9880".to_string(),
            ref_audios_dir: PathBuf::from("ref_audios"),
            outputs_dir: PathBuf::from("outputs"),
            models_dir: PathBuf::from("models"),
            database_file: PathBuf::from("effusive_client.db"),
            output_name_max_length: 50,
            inference: InferenceDefaults::default(),
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidInput(format!("{}: '{}' is not a valid number", key, value)))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err(Error::InvalidInput(format!("{}: '{}' is not a boolean", key, value))),
    }
}

fn check_range<T: PartialOrd + std::fmt::Display + Copy>(key: &str, v: T, min: T, max: T) -> Result<T> {
    // NaN must fail this check
    if !(v >= min && v <= max) {
        return Err(Error::InvalidInput(format!(
            "{} must be between {} and {}, got {}",
            key, min, max, v
        )));
    }
    Ok(v)
}

impl Preferences {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Set one key by dotted name (e.g. `inference.top_k`) with validation
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        let max_batch = self.inference.max_batch_size;
        match key {
            "enable_hi_dpi" => self.enable_hi_dpi = parse_bool(key, value)?,
            "host" => self.host = value.trim().to_string(),
            "ref_audios_dir" => self.ref_audios_dir = PathBuf::from(value),
            "outputs_dir" => self.outputs_dir = PathBuf::from(value),
            "models_dir" => self.models_dir = PathBuf::from(value),
            "database_file" => self.database_file = PathBuf::from(value),
            "output_name_max_length" => {
                self.output_name_max_length = check_range(key, parse_number(key, value)?, 1, 255)?
            }
            "inference.top_k" => self.inference.top_k = check_range(key, parse_number(key, value)?, 1, 100)?,
            "inference.top_p" => self.inference.top_p = check_range(key, parse_number(key, value)?, 0.0, 1.0)?,
            "inference.temperature" => {
                self.inference.temperature = check_range(key, parse_number(key, value)?, 0.0, 2.0)?
            }
            "inference.repetition_penalty" => {
                self.inference.repetition_penalty = check_range(key, parse_number(key, value)?, 0.0, 2.0)?
            }
            "inference.batch_size" => {
                self.inference.batch_size = check_range(key, parse_number(key, value)?, 1, max_batch)?
            }
            "inference.max_batch_size" => {
                self.inference.max_batch_size = check_range(key, parse_number(key, value)?, 1, 1000)?;
                self.inference.batch_size = self.inference.batch_size.min(self.inference.max_batch_size);
            }
            "inference.fragment_interval" => {
                self.inference.fragment_interval = check_range(key, parse_number(key, value)?, 0.01, 1.0)?
            }
            "inference.speed_factor" => {
                self.inference.speed_factor = check_range(key, parse_number(key, value)?, 0.6, 1.65)?
            }
            "inference.n_repetitions" => {
                self.inference.n_repetitions = check_range(key, parse_number(key, value)?, 1, 10)?
            }
            "inference.use_random" => self.inference.use_random = parse_bool(key, value)?,
            "inference.text_split_method" => {
                self.inference.text_split_method = TextSplitMethod::from_code(value.trim()).ok_or_else(|| {
                    Error::InvalidInput(format!("{}: unknown split method '{}'", key, value))
                })?
            }
            "inference.text_lang" | "inference.prompt_lang" => {
                let lang = Language::from_code(value.trim()).ok_or_else(|| {
                    Error::InvalidInput(format!("{}: unknown language '{}'", key, value))
                })?;
                if key == "inference.text_lang" {
                    self.inference.text_lang = lang;
                } else {
                    self.inference.prompt_lang = lang;
                }
            }
            _ => return Err(Error::InvalidInput(format!("unknown preference key '{}'", key))),
        }
        Ok(())
    }
}

/// Preferences bound to the file they are persisted in
#[derive(Debug, Clone)]
pub struct PreferencesStore {
    path: PathBuf,
    prefs: Preferences,
}

impl PreferencesStore {
    /// Read preferences, writing defaults out if the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            tracing::info!("Creating default preferences at {}", path.display());
            let store = Self {
                path,
                prefs: Preferences::default(),
            };
            store.save()?;
            return Ok(store);
        }

        let content = std::fs::read_to_string(&path)?;
        let prefs = Preferences::from_yaml_str(&content)?;
        tracing::debug!("Loaded preferences from {}", path.display());
        Ok(Self { path, prefs })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> &Preferences {
        &self.prefs
    }

    /// Apply a change and persist it immediately
    pub fn update<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Preferences) -> Result<()>,
    {
        let mut next = self.prefs.clone();
        f(&mut next)?;
        self.prefs = next;
        self.save()
    }

    /// Set one dotted key and persist it
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        self.update(|p| p.set_value(key, value))
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, self.prefs.to_yaml_string()?)?;
        Ok(())
    }
}
