//! Configuration loading and root folder resolution

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::api::SetModelsRequest;
use crate::{Error, Result};

/// Environment variable overriding the root folder
pub const ROOT_ENV_VAR: &str = "EFFUSIVE_ROOT";

/// Server configuration file name inside the root folder
pub const SERVER_CONFIG_FILE: &str = "server.toml";

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file (`root_folder` key)
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&str>, env_var_name: &str) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Ok(config_path) = locate_config_file() {
        if let Ok(toml_content) = std::fs::read_to_string(&config_path) {
            if let Ok(config) = toml::from_str::<toml::Value>(&toml_content) {
                if let Some(root_folder) = config.get("root_folder").and_then(|v| v.as_str()) {
                    return PathBuf::from(root_folder);
                }
            }
        }
    }

    // Priority 4: OS-dependent compiled default
    default_root_folder()
}

/// Get the user/system configuration file path for the platform
fn locate_config_file() -> Result<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("effusive").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Ok(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/effusive/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
    }

    Err(Error::Config("No config file found".to_string()))
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("effusive"))
        .unwrap_or_else(|| PathBuf::from("./effusive_data"))
}

/// How the server reaches the inference engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Inference worker executable
    pub command: String,
    pub args: Vec<String>,
    /// Engine model version passed to the worker
    pub version: String,
    /// Half-precision inference when the device supports it
    pub is_half: bool,
    /// Weights loaded at startup
    pub weights: SetModelsRequest,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: "python".to_string(),
            args: vec!["GPT_SoVITS/inference_worker.py".to_string()],
            version: "v2".to_string(),
            is_half: true,
            weights: SetModelsRequest::default(),
        }
    }
}

/// Server configuration (`<root>/server.toml`)
///
/// Every field is optional in the file; relative directories are resolved
/// against the root folder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Engine install directory searched for loose weights
    pub base_dir: PathBuf,
    /// One sub-directory per downloaded/folderized model
    pub models_dir: PathBuf,
    /// Where uploaded reference audio is stored
    pub ref_audio_dir: PathBuf,
    pub database_file: PathBuf,
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9880,
            base_dir: PathBuf::from("."),
            models_dir: PathBuf::from("models"),
            ref_audio_dir: PathBuf::from("ref_audios"),
            database_file: PathBuf::from("effusive_server.db"),
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load `<root>/server.toml`, falling back to defaults
    ///
    /// A missing or unparseable file is not fatal: a warning is logged and
    /// compiled defaults are used.
    pub fn load(root_folder: &Path) -> Self {
        let path = root_folder.join(SERVER_CONFIG_FILE);
        let config = match std::fs::read_to_string(&path) {
            Ok(content) => match Self::from_toml_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Ignoring invalid {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::warn!("No {} found, using defaults", path.display());
                Self::default()
            }
        };
        config.rooted_at(root_folder)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Resolve relative directories against `root`
    pub fn rooted_at(mut self, root: &Path) -> Self {
        let resolve = |p: &PathBuf| if p.is_absolute() { p.clone() } else { root.join(p) };
        self.base_dir = resolve(&self.base_dir);
        self.models_dir = resolve(&self.models_dir);
        self.ref_audio_dir = resolve(&self.ref_audio_dir);
        self.database_file = resolve(&self.database_file);
        self
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    #[serial]
    fn test_cli_arg_has_priority() {
        std::env::set_var("EFFUSIVE_TEST_ROOT_A", "/from/env");
        let resolved = resolve_root_folder(Some("/from/cli"), "EFFUSIVE_TEST_ROOT_A");
        assert_eq!(resolved, PathBuf::from("/from/cli"));
        std::env::remove_var("EFFUSIVE_TEST_ROOT_A");
    }

    #[test]
    #[serial]
    fn test_env_var_used_without_cli_arg() {
        std::env::set_var("EFFUSIVE_TEST_ROOT_B", "/from/env");
        let resolved = resolve_root_folder(None, "EFFUSIVE_TEST_ROOT_B");
        assert_eq!(resolved, PathBuf::from("/from/env"));
        std::env::remove_var("EFFUSIVE_TEST_ROOT_B");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ServerConfig::from_toml_str(
            r#"
            port = 9999

            [engine]
            command = "/opt/engine/run"

            [engine.weights]
            gpt_path = "/w/model.ckpt"
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 9999);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.engine.command, "/opt/engine/run");
        assert_eq!(config.engine.version, "v2");
        assert_eq!(config.engine.weights.gpt_path.as_deref(), Some("/w/model.ckpt"));
        assert!(config.engine.weights.sovits_path.is_none());
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        assert!(matches!(
            ServerConfig::from_toml_str("port = \"not a number\""),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_load_missing_file_uses_rooted_defaults() {
        let root = TempDir::new().unwrap();
        let config = ServerConfig::load(root.path());
        assert_eq!(config.models_dir, root.path().join("models"));
        assert_eq!(config.ref_audio_dir, root.path().join("ref_audios"));
        assert_eq!(config.bind_address(), "127.0.0.1:9880");
    }

    #[test]
    fn test_absolute_paths_are_kept() {
        let root = TempDir::new().unwrap();
        std::fs::write(
            root.path().join(SERVER_CONFIG_FILE),
            "models_dir = \"/srv/models\"\n",
        )
        .unwrap();
        let config = ServerConfig::load(root.path());
        assert_eq!(config.models_dir, PathBuf::from("/srv/models"));
        assert_eq!(config.base_dir, root.path().join("."));
    }
}
