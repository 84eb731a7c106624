//! Client session context
//!
//! Everything a client session shares: preferences, the reference catalog,
//! and where the server is. Built once at startup and passed down
//! explicitly.

use effusive_common::api::GenerateRequest;
use effusive_common::prefs::{Preferences, PreferencesStore};
use effusive_common::{Error, Result};
use std::path::Path;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::catalog::RefAudioCatalog;
use crate::client::{normalize_host, ServerClient};
use crate::output::OutputWriter;
use crate::worker::{InferenceWorker, WorkerEvent};

/// Whether `host` names this machine
pub fn is_loopback_host(host: &str) -> bool {
    let url = normalize_host(host);
    let authority = url.split("://").nth(1).unwrap_or(url.as_str());
    let hostname = if let Some(rest) = authority.strip_prefix('[') {
        rest.split(']').next().unwrap_or(rest)
    } else {
        authority.split(&[':', '/'][..]).next().unwrap_or(authority)
    };
    matches!(hostname, "localhost" | "127.0.0.1" | "0.0.0.0" | "::1")
}

pub struct ClientContext {
    prefs: PreferencesStore,
    catalog: RefAudioCatalog,
    host: String,
    /// Server reads reference files straight from this filesystem
    is_local: bool,
}

impl ClientContext {
    pub fn new(prefs: PreferencesStore, catalog: RefAudioCatalog, host: String, is_local: bool) -> Self {
        Self {
            prefs,
            catalog,
            host,
            is_local,
        }
    }

    /// Load preferences, open the catalog and import the reference folder
    ///
    /// `host` overrides the last-used server from preferences.
    pub async fn open(prefs_path: &Path, host: Option<&str>) -> Result<Self> {
        let prefs = PreferencesStore::open(prefs_path)?;
        let catalog = RefAudioCatalog::open(&prefs.get().database_file).await?;
        catalog.autoload_dir(&prefs.get().ref_audios_dir).await?;

        let host = host.map(str::to_string).unwrap_or_else(|| prefs.get().host.clone());
        let is_local = is_loopback_host(&host);
        Ok(Self::new(prefs, catalog, host, is_local))
    }

    pub fn prefs(&self) -> &Preferences {
        self.prefs.get()
    }

    pub fn prefs_store(&mut self) -> &mut PreferencesStore {
        &mut self.prefs
    }

    pub fn catalog(&self) -> &RefAudioCatalog {
        &self.catalog
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_local(&self) -> bool {
        self.is_local
    }

    pub fn set_is_local(&mut self, is_local: bool) {
        self.is_local = is_local;
    }

    /// Connect to the session's server and remember it as last used
    pub async fn connect(&mut self) -> Result<ServerClient> {
        let client = ServerClient::connect(&self.host).await?;
        if self.prefs.get().host != self.host {
            let host = self.host.clone();
            self.prefs.update(|p| {
                p.host = host;
                Ok(())
            })?;
        }
        Ok(client)
    }

    pub fn output_writer(&self) -> OutputWriter {
        OutputWriter::new(self.prefs().outputs_dir.clone(), self.prefs().output_name_max_length)
    }

    /// Request pre-filled with the preferred inference parameters
    pub fn default_request(&self) -> GenerateRequest {
        let inference = &self.prefs().inference;
        GenerateRequest {
            text_lang: inference.text_lang,
            prompt_lang: inference.prompt_lang,
            top_k: inference.top_k,
            top_p: inference.top_p,
            temperature: inference.temperature,
            repetition_penalty: inference.repetition_penalty,
            text_split_method: inference.text_split_method,
            batch_size: inference.batch_size,
            speed_factor: inference.speed_factor,
            fragment_interval: inference.fragment_interval,
            keep_random: inference.use_random,
            n_repetitions: inference.n_repetitions,
            ..Default::default()
        }
    }

    /// Fill in the reference-derived fields and start a worker
    ///
    /// A primary reference and a non-empty text are required. The transcript
    /// and speaker label come from the catalog unless already set.
    pub async fn start_generation(
        &self,
        client: ServerClient,
        request: &mut GenerateRequest,
    ) -> Result<(JoinHandle<()>, mpsc::UnboundedReceiver<WorkerEvent>)> {
        let primary = request
            .ref_audio_hash
            .clone()
            .ok_or_else(|| Error::InvalidInput("a primary reference audio is required".to_string()))?;
        if request.text.trim().is_empty() {
            return Err(Error::InvalidInput("cannot infer an empty prompt".to_string()));
        }

        let record = self
            .catalog
            .get(&primary)
            .await?
            .ok_or_else(|| Error::NotFound(format!("reference audio {} is not in the catalog", primary)))?;
        if request.prompt_text.is_none() {
            request.prompt_text = record.utterance.clone();
        }
        if request.characters.is_none() {
            request.characters = record.character.clone();
        }
        request.aux_ref_audio_hashes.sort();

        let hash_to_path = self.catalog.hash_to_path(&request.referenced_hashes()).await?;
        let worker = InferenceWorker::new(client, request.clone(), hash_to_path, self.is_local);
        Ok(worker.spawn())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_detection() {
        assert!(is_loopback_host("localhost:9880"));
        assert!(is_loopback_host("http://127.0.0.1:9880"));
        assert!(is_loopback_host("0.0.0.0:9880"));
        assert!(is_loopback_host("http://[::1]:9880"));
        assert!(!is_loopback_host("http://192.168.1.20:9880"));
        assert!(!is_loopback_host("https://tts.example.org"));
    }
}
