//! Generated audio files

use effusive_common::api::GenerateRequest;
use effusive_common::filename::{available_filename, sanitize_filename};
use effusive_common::{Error, Result};
use std::path::{Path, PathBuf};

/// Writes each repetition as a mono 16-bit WAV in the outputs folder
#[derive(Debug, Clone)]
pub struct OutputWriter {
    outputs_dir: PathBuf,
    max_name_len: usize,
}

impl OutputWriter {
    pub fn new(outputs_dir: impl Into<PathBuf>, max_name_len: usize) -> Self {
        Self {
            outputs_dir: outputs_dir.into(),
            max_name_len,
        }
    }

    pub fn outputs_dir(&self) -> &Path {
        &self.outputs_dir
    }

    /// File name stem for a request: `<characters>_<text>`, sanitized
    pub fn stem_for(&self, request: &GenerateRequest) -> String {
        let characters = request.characters.as_deref().unwrap_or("");
        sanitize_filename(&format!("{}_{}", characters, request.text), self.max_name_len)
    }

    /// Write one repetition; never overwrites an existing file
    pub fn write(&self, request: &GenerateRequest, audio: &[i16], sample_rate: u32) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.outputs_dir)?;
        let path = available_filename(&self.outputs_dir.join(format!("{}.wav", self.stem_for(request))));

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let wav_error = |e: hound::Error| Error::Internal(format!("failed to write {}: {}", path.display(), e));

        let mut writer = hound::WavWriter::create(&path, spec).map_err(wav_error)?;
        for &sample in audio {
            writer.write_sample(sample).map_err(wav_error)?;
        }
        writer.finalize().map_err(wav_error)?;

        tracing::info!(samples = audio.len(), sample_rate, "Wrote {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn request(characters: &str, text: &str) -> GenerateRequest {
        GenerateRequest {
            characters: Some(characters.into()),
            text: text.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_write_round_trips_through_wav_reader() {
        let dir = TempDir::new().unwrap();
        let writer = OutputWriter::new(dir.path().join("outputs"), 50);
        let audio: Vec<i16> = (0..100).map(|i| (i * 100) as i16).collect();

        let path = writer.write(&request("Twilight", "Hello there."), &audio, 32000).unwrap();
        assert_eq!(path.file_name().unwrap(), "Twilight_Hello there1.wav");

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 32000);
        assert_eq!(reader.spec().channels, 1);
        let read: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(read, audio);
    }

    #[test]
    fn test_repeated_names_do_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let writer = OutputWriter::new(dir.path(), 50);
        let req = request("Rarity", "Darling");

        let first = writer.write(&req, &[1], 16000).unwrap();
        let second = writer.write(&req, &[2], 16000).unwrap();
        assert_ne!(first, second);
        assert!(first.exists() && second.exists());
    }

    #[test]
    fn test_stem_is_sanitized_and_bounded() {
        let writer = OutputWriter::new("outputs", 20);
        let stem = writer.stem_for(&request("A/B", "What? A very long sentence indeed."));
        assert!(stem.chars().count() <= 20);
        assert!(!stem.contains('/') && !stem.contains('?'));
    }
}
