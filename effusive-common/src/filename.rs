//! Filename utilities
//!
//! Sanitizing generated output names, picking non-clobbering paths, and
//! reading speaker metadata out of dataset-style reference audio names.

use std::path::{Path, PathBuf};

/// Extensions accepted as reference audio
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "ogg"];

/// Characters that are never allowed in a generated filename
pub const RESERVED_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Fallback when sanitizing leaves nothing behind
pub const DEFAULT_FILENAME: &str = "default_filename";

const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

fn trim_name(s: &str) -> &str {
    s.trim_matches(|c: char| c.is_whitespace() || c == '.')
}

fn truncate_chars(s: &str, max_len: usize) -> &str {
    match s.char_indices().nth(max_len) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Map any string to a usable filename stem
///
/// The result never contains `\/:*?"<>|`, is never empty, and is at most
/// `max_len` characters long (a `max_len` of zero is treated as one).
///
/// # Examples
/// ```
/// use effusive_common::filename::sanitize_filename;
///
/// assert_eq!(sanitize_filename("Twilight_What? No!", 50), "Twilight_What_ No!");
/// assert_eq!(sanitize_filename("con", 50), "con_file");
/// assert_eq!(sanitize_filename("...", 50), "default_filename");
/// ```
pub fn sanitize_filename(input: &str, max_len: usize) -> String {
    let max_len = max_len.max(1);

    let replaced: String = input
        .chars()
        .map(|c| if RESERVED_CHARS.contains(&c) { '_' } else { c })
        .collect();

    let mut sanitized = trim_name(&replaced).to_string();

    if RESERVED_NAMES.contains(&sanitized.to_uppercase().as_str()) {
        sanitized = format!("{}_file", sanitized);
    }

    if sanitized.chars().count() > max_len {
        sanitized = trim_name(truncate_chars(&sanitized, max_len)).to_string();
    }

    if sanitized.is_empty() {
        return truncate_chars(DEFAULT_FILENAME, max_len).to_string();
    }

    sanitized
}

/// First `stem{i}.ext` (i = 1, 2, ...) next to `path` that does not exist yet
pub fn available_filename(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut i: u32 = 1;
    loop {
        let candidate = parent.join(format!("{}{}{}", stem, i, ext));
        if !candidate.exists() {
            return candidate;
        }
        i += 1;
    }
}

/// True if the path carries one of [`AUDIO_EXTENSIONS`]
pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Metadata carried in `HH_MM_SS_Character_Emotion_Noise_Transcript.ext` names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameMetadata {
    pub hour: String,
    pub minute: String,
    pub second: String,
    pub character: String,
    pub emotion: String,
    pub noise: String,
    pub transcript: String,
}

/// Parse dataset-style reference audio names
///
/// Returns `None` unless the name has all seven `_`-separated fields.
/// Transcript fields after the sixth separator are joined back together.
pub fn parse_filename_metadata(path: &Path) -> Option<FilenameMetadata> {
    let name = path.file_name()?.to_string_lossy();
    let fields: Vec<&str> = name.split('_').collect();
    if fields.len() < 7 {
        return None;
    }

    let joined = fields[6..].concat();
    let transcript = match joined.rsplit_once('.') {
        Some((stem, ext)) if !ext.is_empty() && !ext.contains(' ') => stem.to_string(),
        _ => joined,
    };

    Some(FilenameMetadata {
        hour: fields[0].to_string(),
        minute: fields[1].to_string(),
        second: fields[2].to_string(),
        character: fields[3].to_string(),
        emotion: fields[4].to_string(),
        noise: fields[5].to_string(),
        transcript,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn assert_sanitized(out: &str, max_len: usize) {
        assert!(!out.is_empty());
        assert!(out.chars().count() <= max_len.max(1), "{:?} longer than {}", out, max_len);
        assert!(!out.chars().any(|c| RESERVED_CHARS.contains(&c)), "{:?}", out);
    }

    #[test]
    fn test_sanitize_replaces_reserved_chars() {
        let out = sanitize_filename(r#"a\b/c:d*e?f"g<h>i|j"#, 200);
        assert_eq!(out, "a_b_c_d_e_f_g_h_i_j");
    }

    #[test]
    fn test_sanitize_trims_spaces_and_dots() {
        assert_eq!(sanitize_filename("  ..hello world..  ", 200), "hello world");
    }

    #[test]
    fn test_sanitize_reserved_device_names() {
        assert_eq!(sanitize_filename("NUL", 200), "NUL_file");
        assert_eq!(sanitize_filename("lpt9", 200), "lpt9_file");
        assert_eq!(sanitize_filename("CONSOLE", 200), "CONSOLE");
    }

    #[test]
    fn test_sanitize_truncates_and_retrims() {
        let out = sanitize_filename("abcd.    efgh", 6);
        assert_eq!(out, "abcd");
        assert_eq!(sanitize_filename(&"x".repeat(300), 50).len(), 50);
    }

    #[test]
    fn test_sanitize_empty_falls_back() {
        assert_eq!(sanitize_filename("", 200), DEFAULT_FILENAME);
        assert_eq!(sanitize_filename(" . . ", 200), DEFAULT_FILENAME);
        assert_eq!(sanitize_filename("", 4), "defa");
    }

    #[test]
    fn test_sanitize_multibyte_truncation() {
        let out = sanitize_filename("ありがとうございます", 3);
        assert_eq!(out, "ありが");
    }

    #[test]
    fn test_sanitize_properties_over_assorted_inputs() {
        let inputs = [
            "",
            "???",
            "Rarity_Oh, darling! What is *this*?",
            "   ",
            "...hidden",
            "con",
            "a/b/c/d/e/f/g/h/i/j/k/l/m/n/o/p",
            "\"quoted\" <angle> |pipe|",
            "日本語のテキスト: テスト",
        ];
        for input in inputs {
            for max_len in [0usize, 1, 2, 5, 16, 50, 200] {
                assert_sanitized(&sanitize_filename(input, max_len), max_len);
            }
        }
    }

    #[test]
    fn test_available_filename_increments() {
        let dir = TempDir::new().unwrap();
        let wanted = dir.path().join("Twilight_Hello.wav");

        let first = available_filename(&wanted);
        assert_eq!(first, dir.path().join("Twilight_Hello1.wav"));

        std::fs::write(&first, b"x").unwrap();
        std::fs::write(dir.path().join("Twilight_Hello2.wav"), b"x").unwrap();
        assert_eq!(available_filename(&wanted), dir.path().join("Twilight_Hello3.wav"));
    }

    #[test]
    fn test_is_audio_file() {
        assert!(is_audio_file(Path::new("a/b.WAV")));
        assert!(is_audio_file(Path::new("x.ogg")));
        assert!(!is_audio_file(Path::new("x.txt")));
        assert!(!is_audio_file(Path::new("noext")));
    }

    #[test]
    fn test_parse_filename_metadata() {
        let meta = parse_filename_metadata(Path::new(
            "/data/00_01_12_Twilight_Happy_Noisy_Hello there, Spike..flac",
        ))
        .unwrap();
        assert_eq!(meta.hour, "00");
        assert_eq!(meta.minute, "01");
        assert_eq!(meta.second, "12");
        assert_eq!(meta.character, "Twilight");
        assert_eq!(meta.emotion, "Happy");
        assert_eq!(meta.noise, "Noisy");
        assert_eq!(meta.transcript, "Hello there, Spike.");
    }

    #[test]
    fn test_parse_filename_metadata_joins_extra_fields() {
        let meta =
            parse_filename_metadata(Path::new("01_02_03_Rarity_Neutral__a_b.wav")).unwrap();
        assert_eq!(meta.noise, "");
        assert_eq!(meta.transcript, "ab");
    }

    #[test]
    fn test_parse_filename_metadata_too_few_fields() {
        assert!(parse_filename_metadata(Path::new("voice_sample.wav")).is_none());
        assert!(parse_filename_metadata(Path::new("a_b_c_d_e_f.wav")).is_none());
    }
}
