//! Background inference worker
//!
//! A worker owns everything one generation needs and runs on the tokio
//! runtime. It reports progress only through its event channel; the caller
//! never shares state with it. A run ends with exactly one
//! [`WorkerEvent::Finished`] or [`WorkerEvent::Error`], after which the
//! channel closes.

use base64::Engine as _;
use effusive_common::api::{GenerateRequest, PostRefAudioRequest};
use effusive_common::{Error, Result};
use futures::StreamExt;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::assembler::StreamAssembler;
use crate::client::ServerClient;

/// Progress reported by a running worker
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// Human-readable progress line
    Status(String),
    SampleRate(u32),
    /// One finished repetition
    Output { index: usize, audio: Vec<i16> },
    Error(String),
    Finished,
}

pub struct InferenceWorker {
    client: ServerClient,
    request: GenerateRequest,
    /// Local file for every hash the request references
    hash_to_path: HashMap<String, PathBuf>,
    /// Server shares this machine's filesystem; upload by path
    is_local: bool,
}

impl InferenceWorker {
    pub fn new(
        client: ServerClient,
        request: GenerateRequest,
        hash_to_path: HashMap<String, PathBuf>,
        is_local: bool,
    ) -> Self {
        Self {
            client,
            request,
            hash_to_path,
            is_local,
        }
    }

    /// Start the worker on the runtime
    pub fn spawn(self) -> (JoinHandle<()>, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(self.run(tx));
        (handle, rx)
    }

    /// Run to completion, reporting through `events`
    pub async fn run(self, events: mpsc::UnboundedSender<WorkerEvent>) {
        match self.generate(&events).await {
            Ok(()) => {
                let _ = events.send(WorkerEvent::Finished);
            }
            Err(e) => {
                warn!("Inference failed: {}", e);
                let _ = events.send(WorkerEvent::Status(e.to_string()));
                let _ = events.send(WorkerEvent::Error(e.to_string()));
            }
        }
    }

    async fn generate(&self, events: &mpsc::UnboundedSender<WorkerEvent>) -> Result<()> {
        let status = |message: String| {
            let _ = events.send(WorkerEvent::Status(message));
        };

        // 1. Which references does the server already have?
        status("Testing audio hashes".to_string());
        let hashes = self.request.referenced_hashes();
        let known = self.client.test_hashes(&hashes).await?;
        status("Finished testing audio hashes".to_string());

        // 2. Upload the rest
        for hash in hashes.iter().filter(|h| !known.get(*h).copied().unwrap_or(false)) {
            let path = self.upload(hash).await?;
            status(format!("Uploaded {}", path.display()));
        }

        // 3. Stream the generation
        status("Beginning generation".to_string());
        let mut assembler = StreamAssembler::new();
        let mut chunks = self.client.generate(&self.request).await?;
        while let Some(chunk) = chunks.next().await {
            for event in assembler.process_chunk(chunk?)? {
                let _ = events.send(event);
            }
        }

        // 4. Parallel repetitions are only complete once the stream ends
        for event in assembler.finish(self.request.n_repetitions as usize)? {
            let _ = events.send(event);
        }

        info!(n_repetitions = self.request.n_repetitions, "Generation complete");
        status("Generation complete".to_string());
        Ok(())
    }

    async fn upload(&self, hash: &str) -> Result<PathBuf> {
        let path = self
            .hash_to_path
            .get(hash)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no local file for reference audio {}", hash)))?;

        debug!(audio_hash = %hash, path = %path.display(), is_local = self.is_local, "Uploading reference audio");

        let mut request = PostRefAudioRequest {
            audio_hash: hash.to_string(),
            ..Default::default()
        };
        if self.is_local {
            request.local_filepath = Some(path.to_string_lossy().into_owned());
        } else {
            let bytes = tokio::fs::read(&path).await?;
            request.base64_audio_data = Some(base64::engine::general_purpose::STANDARD.encode(bytes));
        }

        self.client.post_ref_audio(&request).await?;
        Ok(path)
    }
}
