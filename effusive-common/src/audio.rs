//! PCM16 payloads and sentence/repetition bookkeeping
//!
//! Generated audio travels as base64-encoded little-endian 16-bit PCM. In
//! parallel generation the server concatenates every sentence of every
//! repetition into one payload and reports per-sentence sample counts;
//! the helpers here cut that payload back apart.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::Path;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::{Error, Result};

/// Decode little-endian PCM16 bytes
pub fn decode_pcm16(bytes: &[u8]) -> Result<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(Error::MalformedData(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// Encode samples as little-endian PCM16 bytes
pub fn encode_pcm16(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Decode a base64 PCM16 payload as carried in stream chunks
pub fn decode_pcm16_base64(text: &str) -> Result<Vec<i16>> {
    let bytes = STANDARD.decode(text.trim())?;
    decode_pcm16(&bytes)
}

/// Encode samples as a base64 PCM16 payload
pub fn encode_pcm16_base64(samples: &[i16]) -> String {
    STANDARD.encode(encode_pcm16(samples))
}

/// Split `samples` into consecutive pieces of the given lengths
///
/// Lengths summing past the end of `samples` are rejected. Samples left over
/// after the last length are dropped.
pub fn split_by_lengths(samples: &[i16], lengths: &[usize]) -> Result<Vec<Vec<i16>>> {
    let total = lengths
        .iter()
        .try_fold(0usize, |acc, &len| acc.checked_add(len))
        .ok_or_else(|| Error::MalformedData("segment lengths overflow".to_string()))?;
    if total > samples.len() {
        return Err(Error::MalformedData(format!(
            "segment lengths sum to {} but only {} samples were received",
            total,
            samples.len()
        )));
    }

    let mut pieces = Vec::with_capacity(lengths.len());
    let mut start = 0;
    for &len in lengths {
        let end = start + len;
        pieces.push(samples[start..end].to_vec());
        start = end;
    }
    Ok(pieces)
}

/// Partition a flat sentence list into `n_repetitions` equal buckets
///
/// Sentences are ordered repetition-major: the first `len / n` sentences
/// belong to repetition 0, and so on.
pub fn partition_repetitions<T: Clone>(sentences: &[T], n_repetitions: usize) -> Result<Vec<Vec<T>>> {
    if n_repetitions == 0 {
        return Err(Error::MalformedData("n_repetitions must be at least 1".to_string()));
    }
    if sentences.len() % n_repetitions != 0 {
        return Err(Error::MalformedData(format!(
            "{} sentences cannot be divided into {} repetitions",
            sentences.len(),
            n_repetitions
        )));
    }

    let per_bucket = sentences.len() / n_repetitions;
    if per_bucket == 0 {
        return Ok(vec![Vec::new(); n_repetitions]);
    }
    Ok(sentences.chunks(per_bucket).map(|c| c.to_vec()).collect())
}

/// Concatenate segments into one sample buffer
pub fn concat_segments(segments: &[Vec<i16>]) -> Vec<i16> {
    let total = segments.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(total);
    for segment in segments {
        out.extend_from_slice(segment);
    }
    out
}

/// Duration of an audio file in seconds
///
/// Uses the container frame count when available and otherwise decodes the
/// default track to count frames.
pub fn probe_duration_secs(path: &Path) -> Result<f64> {
    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| Error::MalformedData(format!("{}: {}", path.display(), e)))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::MalformedData(format!("no audio track in {}", path.display())))?;

    let track_id = track.id;
    let params = track.codec_params.clone();
    let sample_rate = params
        .sample_rate
        .ok_or_else(|| Error::MalformedData(format!("unknown sample rate in {}", path.display())))?;

    if let Some(n_frames) = params.n_frames {
        return Ok(n_frames as f64 / sample_rate as f64);
    }

    let mut decoder = symphonia::default::get_codecs()
        .make(&params, &DecoderOptions::default())
        .map_err(|e| Error::MalformedData(format!("{}: {}", path.display(), e)))?;

    let mut frames: u64 = 0;
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(Error::MalformedData(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }
        match decoder.decode(&packet) {
            Ok(buf) => frames += buf.frames() as u64,
            Err(symphonia::core::errors::Error::DecodeError(e)) => {
                tracing::debug!(path = %path.display(), error = %e, "Skipping undecodable packet");
            }
            Err(e) => return Err(Error::MalformedData(e.to_string())),
        }
    }

    Ok(frames as f64 / sample_rate as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm16_decode_little_endian() {
        let samples = decode_pcm16(&[0x01, 0x00, 0xff, 0xff, 0x00, 0x80]).unwrap();
        assert_eq!(samples, vec![1, -1, i16::MIN]);
    }

    #[test]
    fn test_pcm16_odd_length_rejected() {
        assert!(matches!(decode_pcm16(&[1, 2, 3]), Err(Error::MalformedData(_))));
    }

    #[test]
    fn test_pcm16_base64_matches_raw_bytes() {
        let samples = vec![0i16, 1000, -1000, i16::MAX];
        let text = encode_pcm16_base64(&samples);
        assert_eq!(STANDARD.decode(&text).unwrap(), encode_pcm16(&samples));
        assert_eq!(decode_pcm16_base64(&text).unwrap(), samples);
    }

    #[test]
    fn test_bad_base64_is_malformed() {
        assert!(matches!(decode_pcm16_base64("not base64!!"), Err(Error::MalformedData(_))));
    }

    #[test]
    fn test_split_reconstructs_original() {
        let samples: Vec<i16> = (0..100).collect();
        let lengths = [10, 0, 25, 65];
        let pieces = split_by_lengths(&samples, &lengths).unwrap();

        assert_eq!(pieces.len(), lengths.len());
        for (piece, len) in pieces.iter().zip(lengths) {
            assert_eq!(piece.len(), len);
        }
        assert_eq!(concat_segments(&pieces), samples);
    }

    #[test]
    fn test_split_overlong_lengths_rejected() {
        let samples = vec![0i16; 10];
        assert!(split_by_lengths(&samples, &[5, 6]).is_err());
    }

    #[test]
    fn test_split_overflowing_lengths_rejected() {
        let samples = vec![0i16; 4];
        assert!(matches!(
            split_by_lengths(&samples, &[usize::MAX, 2]),
            Err(Error::MalformedData(_))
        ));
    }

    #[test]
    fn test_split_short_lengths_drop_tail() {
        let samples: Vec<i16> = (0..10).collect();
        let pieces = split_by_lengths(&samples, &[3, 3]).unwrap();
        assert_eq!(pieces, vec![vec![0, 1, 2], vec![3, 4, 5]]);
    }

    #[test]
    fn test_partition_equal_buckets() {
        let sentences: Vec<u32> = (0..12).collect();
        for n in [1, 2, 3, 4, 6, 12] {
            let buckets = partition_repetitions(&sentences, n).unwrap();
            assert_eq!(buckets.len(), n);
            assert!(buckets.iter().all(|b| b.len() == 12 / n));
            assert_eq!(buckets.concat(), sentences);
        }
    }

    #[test]
    fn test_partition_rejects_uneven_and_zero() {
        let sentences = vec![1, 2, 3];
        assert!(partition_repetitions(&sentences, 2).is_err());
        assert!(partition_repetitions(&sentences, 0).is_err());
    }

    #[test]
    fn test_partition_empty_list() {
        let buckets = partition_repetitions::<i16>(&[], 3).unwrap();
        assert_eq!(buckets.len(), 3);
        assert!(buckets.iter().all(Vec::is_empty));
    }

    #[test]
    fn test_probe_duration_wav() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("half_second.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..8_000 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let duration = probe_duration_secs(&path).unwrap();
        assert!((duration - 0.5).abs() < 1e-6, "duration was {}", duration);
    }

    #[test]
    fn test_probe_duration_garbage_is_malformed() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("garbage.wav");
        std::fs::write(&path, b"definitely not audio").unwrap();
        assert!(probe_duration_secs(&path).is_err());
    }
}
