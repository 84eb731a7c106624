//! Client-side reference audio catalog
//!
//! Wraps the shared catalog tables with what the client needs on top:
//! hashing and probing local files, importing a folder, and filtering the
//! list for display.

use effusive_common::db::{self, MetadataUpdate, RefAudio};
use effusive_common::filename::{is_audio_file, parse_filename_metadata};
use effusive_common::hashing::hash_file;
use effusive_common::audio::probe_duration_secs;
use effusive_common::{Error, Result};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Minimum fuzzy score for an utterance to match a query
pub const UTTERANCE_MATCH_THRESHOLD: f64 = 0.5;

/// Display filter for [`RefAudioCatalog::list`]
#[derive(Debug, Clone, Default)]
pub struct RefAudioFilter {
    /// Exact character label
    pub character: Option<String>,
    /// Fuzzy transcript search
    pub utterance_query: Option<String>,
}

/// Similarity of `query` to `text` in `0.0..=1.0`, case-insensitive
///
/// Scores the whole text and every run of words as long as the query, and
/// keeps the best, so a short query can match inside a long transcript.
pub fn utterance_score(query: &str, text: &str) -> f64 {
    let query = query.trim().to_lowercase();
    let text = text.trim().to_lowercase();
    if query.is_empty() || text.is_empty() {
        return 0.0;
    }

    let mut best = strsim::normalized_levenshtein(&query, &text);
    let words: Vec<&str> = text.split_whitespace().collect();
    let window = query.split_whitespace().count().max(1);
    if words.len() > window {
        for run in words.windows(window) {
            best = best.max(strsim::normalized_levenshtein(&query, &run.join(" ")));
        }
    }
    best
}

#[derive(Debug, Clone)]
pub struct RefAudioCatalog {
    db: SqlitePool,
}

impl RefAudioCatalog {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn open(database_file: &Path) -> Result<Self> {
        Ok(Self::new(db::init_database_pool(database_file).await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    pub async fn get(&self, audio_hash: &str) -> Result<Option<RefAudio>> {
        db::get_ref_audio(&self.db, audio_hash).await
    }

    /// Catalog a local file
    ///
    /// Character, emotion and transcript are taken from the filename when it
    /// follows the labelled-dataset convention. New records go to the end
    /// of the list unless `list_position` is given. `undelete` brings back a
    /// previously deleted record with the same content.
    pub async fn add_file(&self, path: &Path, list_position: Option<i64>, undelete: bool) -> Result<RefAudio> {
        if !path.is_file() {
            return Err(Error::NotFound(format!("no such file: {}", path.display())));
        }
        let path = std::fs::canonicalize(path)?;

        let probe_path = path.clone();
        let (audio_hash, duration) = tokio::task::spawn_blocking(move || {
            let hash = hash_file(&probe_path)?;
            let duration = match probe_duration_secs(&probe_path) {
                Ok(secs) => Some(secs),
                Err(e) => {
                    warn!("Could not read duration of {}: {}", probe_path.display(), e);
                    None
                }
            };
            Ok::<_, Error>((hash, duration))
        })
        .await
        .map_err(|e| Error::Internal(format!("hashing task failed: {}", e)))??;

        let mut record = RefAudio::new(&audio_hash, path.to_string_lossy());
        if let Some(meta) = parse_filename_metadata(&path) {
            record.character = Some(meta.character);
            record.emotion = Some(meta.emotion);
            record.utterance = Some(meta.transcript);
        }
        record.duration_secs = duration;
        record.list_position = match list_position {
            Some(position) => Some(position),
            None => Some(db::count_ref_audio(&self.db).await?),
        };

        db::upsert_ref_audio(&self.db, &record, undelete).await?;
        self.get(&audio_hash)
            .await?
            .ok_or_else(|| Error::Internal(format!("reference audio {} vanished after insert", audio_hash)))
    }

    /// Catalog every audio file below `dir`, creating `dir` if needed
    ///
    /// Files already in the catalog keep their metadata and deleted flag.
    /// Returns how many new records were added.
    pub async fn autoload_dir(&self, dir: &Path) -> Result<usize> {
        std::fs::create_dir_all(dir)?;

        let mut files: Vec<PathBuf> = WalkDir::new(dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_audio_file(e.path()))
            .map(|e| e.into_path())
            .collect();
        files.sort();

        let mut position = db::count_ref_audio(&self.db).await?;
        let mut added = 0;
        for path in files {
            let hashed = path.clone();
            let audio_hash = tokio::task::spawn_blocking(move || hash_file(&hashed))
                .await
                .map_err(|e| Error::Internal(format!("hashing task failed: {}", e)))??;

            if let Some(existing) = self.get(&audio_hash).await? {
                debug!(audio_hash = %audio_hash, "Already cataloged: {}", existing.local_filepath);
                continue;
            }

            self.add_file(&path, Some(position), false).await?;
            position += 1;
            added += 1;
        }

        info!("Imported {} reference audio file(s) from {}", added, dir.display());
        Ok(added)
    }

    pub async fn update(&self, audio_hash: &str, update: &MetadataUpdate) -> Result<RefAudio> {
        db::update_metadata(&self.db, audio_hash, update).await
    }

    /// Hide a record from listings; generations that use it keep working
    pub async fn delete(&self, audio_hash: &str) -> Result<()> {
        db::soft_delete(&self.db, audio_hash).await
    }

    /// Listed records matching `filter`, highest list position first
    pub async fn list(&self, filter: &RefAudioFilter) -> Result<Vec<RefAudio>> {
        let mut records = db::list_ref_audio(&self.db).await?;

        if let Some(character) = filter.character.as_deref().filter(|c| !c.is_empty()) {
            records.retain(|r| r.character.as_deref() == Some(character));
        }

        if let Some(query) = filter.utterance_query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            records.retain(|r| {
                r.utterance
                    .as_deref()
                    .map(|u| utterance_score(query, u) >= UTTERANCE_MATCH_THRESHOLD)
                    .unwrap_or(false)
            });
        }

        records.sort_by_key(|r| std::cmp::Reverse(r.list_position.unwrap_or(0)));
        Ok(records)
    }

    pub async fn characters(&self) -> Result<Vec<String>> {
        db::list_characters(&self.db).await
    }

    /// Full hash for a unique prefix of one
    pub async fn resolve_prefix(&self, prefix: &str) -> Result<String> {
        let prefix = prefix.trim().to_ascii_lowercase();
        if prefix.is_empty() {
            return Err(Error::InvalidInput("empty hash".to_string()));
        }
        let matches: Vec<String> = db::list_all_ref_audio(&self.db)
            .await?
            .into_iter()
            .map(|r| r.audio_hash)
            .filter(|h| h.starts_with(&prefix))
            .collect();
        match matches.as_slice() {
            [hash] => Ok(hash.clone()),
            [] => Err(Error::NotFound(format!("no reference audio matches {}", prefix))),
            _ => Err(Error::InvalidInput(format!(
                "{} matches {} reference audios; use more characters",
                prefix,
                matches.len()
            ))),
        }
    }

    /// Local file for each hash; deleted records still resolve
    pub async fn hash_to_path(&self, hashes: &[String]) -> Result<HashMap<String, PathBuf>> {
        let mut paths = HashMap::with_capacity(hashes.len());
        for hash in hashes {
            let record = self
                .get(hash)
                .await?
                .ok_or_else(|| Error::NotFound(format!("reference audio {} is not in the catalog", hash)))?;
            paths.insert(hash.clone(), PathBuf::from(record.local_filepath));
        }
        Ok(paths)
    }
}
