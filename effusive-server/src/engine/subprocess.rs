//! Inference worker process bridge
//!
//! Each synthesis job runs the configured worker command once. The worker
//! reads one JSON job from stdin and writes NDJSON audio lines to stdout:
//! `{"sr": 32000, "audio": "<base64 PCM16>", "this_gen_lengths": [..]}` or
//! `{"error": "..."}`. Model weights travel as environment variables.

use async_trait::async_trait;
use effusive_common::audio::decode_pcm16_base64;
use effusive_common::config::EngineConfig;
use effusive_common::{Error, Result};
use futures::StreamExt;
use serde::Deserialize;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::runs::RunRegistry;

use super::{merge_weights, EngineOutput, EngineStream, ModelWeights, SynthesisJob, TtsEngine};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WorkerLine {
    Audio {
        sr: u32,
        audio: String,
        #[serde(default)]
        this_gen_lengths: Option<Vec<usize>>,
    },
    Error {
        error: String,
    },
}

fn parse_worker_line(line: &str) -> Result<EngineOutput> {
    match serde_json::from_str::<WorkerLine>(line)? {
        WorkerLine::Audio {
            sr,
            audio,
            this_gen_lengths,
        } => Ok(EngineOutput {
            sample_rate: sr,
            samples: decode_pcm16_base64(&audio)?,
            sentence_lengths: this_gen_lengths,
        }),
        WorkerLine::Error { error } => Err(Error::Internal(format!("inference worker: {}", error))),
    }
}

pub struct SubprocessEngine {
    config: EngineConfig,
    weights: RwLock<ModelWeights>,
    /// Runs currently streaming
    runs: RunRegistry,
}

impl SubprocessEngine {
    pub fn new(config: EngineConfig) -> Self {
        let weights = config.weights.clone();
        Self {
            config,
            weights: RwLock::new(weights),
            runs: RunRegistry::new(),
        }
    }

    async fn command(&self) -> Command {
        let weights = self.weights.read().await.clone();
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .env("version", &self.config.version)
            .env("is_half", if self.config.is_half { "True" } else { "False" })
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        for (name, path) in weights.paths() {
            cmd.env(name, path);
        }
        cmd
    }
}

#[async_trait]
impl TtsEngine for SubprocessEngine {
    async fn set_models(&self, update: &ModelWeights) -> Result<ModelWeights> {
        let mut weights = self.weights.write().await;
        *weights = merge_weights(&weights, update);
        info!(gpt = ?weights.gpt_path, sovits = ?weights.sovits_path, "Engine weights updated");
        Ok(weights.clone())
    }

    async fn active_models(&self) -> ModelWeights {
        self.weights.read().await.clone()
    }

    async fn synthesize(&self, job: SynthesisJob) -> Result<EngineStream> {
        let mut child = self.command().await.spawn().map_err(|e| {
            Error::Internal(format!("failed to start inference worker '{}': {}", self.config.command, e))
        })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Internal("inference worker stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("inference worker stdout unavailable".to_string()))?;

        let mut payload = serde_json::to_vec(&job)?;
        payload.push(b'\n');
        stdin.write_all(&payload).await?;
        drop(stdin);

        debug!(seed = job.seed, n_repetitions = job.n_repetitions, "Inference worker started");
        let run = self.runs.register();

        let stream = async_stream::try_stream! {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                let line = tokio::select! {
                    _ = run.token().cancelled() => {
                        let _ = child.start_kill();
                        info!("Inference run stopped");
                        break;
                    }
                    line = lines.next_line() => line,
                };
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                yield parse_worker_line(&line)?;
            }

            let status = child.wait().await?;
            if !status.success() && !run.is_cancelled() {
                warn!("Inference worker exited with {}", status);
                Err::<(), Error>(Error::Internal(format!("inference worker exited with {}", status)))?;
            }
        };

        Ok(stream.boxed())
    }

    async fn stop(&self) {
        match self.runs.cancel_all() {
            0 => debug!("Stop requested with no active run"),
            n => info!(runs = n, "Stopping inference runs"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use effusive_common::audio::encode_pcm16_base64;

    #[test]
    fn test_parse_audio_line() {
        let line = format!(
            r#"{{"sr": 32000, "audio": "{}", "this_gen_lengths": [2, 1]}}"#,
            encode_pcm16_base64(&[1, 2, 3])
        );
        let output = parse_worker_line(&line).unwrap();
        assert_eq!(output.sample_rate, 32000);
        assert_eq!(output.samples, vec![1, 2, 3]);
        assert_eq!(output.sentence_lengths, Some(vec![2, 1]));
    }

    #[test]
    fn test_parse_error_line() {
        assert!(matches!(
            parse_worker_line(r#"{"error": "CUDA out of memory"}"#),
            Err(Error::Internal(msg)) if msg.contains("CUDA")
        ));
    }

    #[tokio::test]
    async fn test_set_models_merges_and_reports_active() {
        let engine = SubprocessEngine::new(EngineConfig::default());
        let active = engine
            .set_models(&ModelWeights {
                gpt_path: Some("/w/a.ckpt".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(active.gpt_path.as_deref(), Some("/w/a.ckpt"));
        assert_eq!(engine.active_models().await, active);
    }

    #[tokio::test]
    async fn test_missing_command_is_internal_error() {
        let engine = SubprocessEngine::new(EngineConfig {
            command: "/nonexistent/effusive-worker".into(),
            args: vec![],
            ..Default::default()
        });
        let job = SynthesisJob::new(
            &Default::default(),
            &crate::engine::ResolvedRefs {
                ref_audio_path: "/r.wav".into(),
                aux_ref_audio_paths: vec![],
                prompt_text: String::new(),
            },
            1,
            1,
        );
        assert!(matches!(engine.synthesize(job).await, Err(Error::Internal(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_worker_output_is_streamed() {
        let line = format!(r#"{{"sr": 16000, "audio": "{}"}}"#, encode_pcm16_base64(&[5, -5]));
        let engine = SubprocessEngine::new(EngineConfig {
            command: "sh".into(),
            args: vec!["-c".into(), format!("cat > /dev/null; echo '{}'", line)],
            ..Default::default()
        });
        let job = SynthesisJob::new(
            &Default::default(),
            &crate::engine::ResolvedRefs {
                ref_audio_path: "/r.wav".into(),
                aux_ref_audio_paths: vec![],
                prompt_text: String::new(),
            },
            1,
            1,
        );
        let outputs: Vec<_> = engine.synthesize(job).await.unwrap().collect().await;
        assert_eq!(outputs.len(), 1);
        let output = outputs.into_iter().next().unwrap().unwrap();
        assert_eq!(output.samples, vec![5, -5]);
        assert_eq!(output.sentence_lengths, None);
    }

    fn sleeping_engine() -> SubprocessEngine {
        SubprocessEngine::new(EngineConfig {
            command: "sh".into(),
            args: vec!["-c".into(), "cat > /dev/null; sleep 5".into()],
            ..Default::default()
        })
    }

    fn job() -> SynthesisJob {
        SynthesisJob::new(
            &Default::default(),
            &crate::engine::ResolvedRefs {
                ref_audio_path: "/r.wav".into(),
                aux_ref_audio_paths: vec![],
                prompt_text: String::new(),
            },
            1,
            1,
        )
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_reaches_concurrent_runs() {
        let engine = sleeping_engine();
        let first = engine.synthesize(job()).await.unwrap();
        let second = engine.synthesize(job()).await.unwrap();

        let started = std::time::Instant::now();
        let collect = futures::future::join(first.collect::<Vec<_>>(), second.collect::<Vec<_>>());
        let stopper = async {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            engine.stop().await;
        };
        let ((first, second), ()) = futures::future::join(collect, stopper).await;

        assert!(started.elapsed() < std::time::Duration::from_secs(4));
        assert!(first.is_empty());
        assert!(second.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_finished_run_does_not_linger() {
        let line = format!(r#"{{"sr": 16000, "audio": "{}"}}"#, encode_pcm16_base64(&[1]));
        let engine = SubprocessEngine::new(EngineConfig {
            command: "sh".into(),
            args: vec!["-c".into(), format!("cat > /dev/null; echo '{}'", line)],
            ..Default::default()
        });
        let outputs: Vec<_> = engine.synthesize(job()).await.unwrap().collect().await;
        assert_eq!(outputs.len(), 1);
        assert_eq!(engine.runs.active(), 0);
    }
}
