//! Reference-audio records
//!
//! Records are keyed by content hash and never hard-deleted: deletion flips
//! `is_deleted` so a peer that cached "hash present" stays consistent.

use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::path::Path;

use crate::{Error, Result};

/// One catalog row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefAudio {
    /// SHA-256 of the audio bytes (lowercase hex)
    pub audio_hash: String,
    pub local_filepath: String,
    pub character: Option<String>,
    pub emotion: Option<String>,
    /// Transcript of the reference audio
    pub utterance: Option<String>,
    /// Higher positions list first
    pub list_position: Option<i64>,
    pub duration_secs: Option<f64>,
    pub is_deleted: bool,
}

impl RefAudio {
    /// Bare record as the server stores it (no speaker metadata)
    pub fn new(audio_hash: impl Into<String>, local_filepath: impl Into<String>) -> Self {
        Self {
            audio_hash: audio_hash.into(),
            local_filepath: local_filepath.into(),
            character: None,
            emotion: None,
            utterance: None,
            list_position: None,
            duration_secs: None,
            is_deleted: false,
        }
    }
}

/// Editable metadata fields; `None` leaves a field untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataUpdate {
    pub character: Option<String>,
    pub emotion: Option<String>,
    pub utterance: Option<String>,
}

/// Whether an upsert created a new row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

const SELECT_COLUMNS: &str = "SELECT audio_hash, local_filepath, character, emotion, utterance, \
     list_position, duration_secs, is_deleted FROM ref_audio";

fn row_to_ref_audio(row: &SqliteRow) -> RefAudio {
    let is_deleted: i64 = row.get("is_deleted");
    RefAudio {
        audio_hash: row.get("audio_hash"),
        local_filepath: row.get("local_filepath"),
        character: row.get("character"),
        emotion: row.get("emotion"),
        utterance: row.get("utterance"),
        list_position: row.get("list_position"),
        duration_secs: row.get("duration_secs"),
        is_deleted: is_deleted != 0,
    }
}

/// Load a record by hash, deleted or not
pub async fn get_ref_audio(pool: &SqlitePool, audio_hash: &str) -> Result<Option<RefAudio>> {
    let row = sqlx::query(&format!("{} WHERE audio_hash = ?", SELECT_COLUMNS))
        .bind(audio_hash)
        .fetch_optional(pool)
        .await?;

    Ok(row.as_ref().map(row_to_ref_audio))
}

/// Default listing: records that are not soft-deleted, highest position first
pub async fn list_ref_audio(pool: &SqlitePool) -> Result<Vec<RefAudio>> {
    let rows = sqlx::query(&format!(
        "{} WHERE is_deleted = 0 ORDER BY COALESCE(list_position, 0) DESC, audio_hash",
        SELECT_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_ref_audio).collect())
}

/// Every record including soft-deleted ones
pub async fn list_all_ref_audio(pool: &SqlitePool) -> Result<Vec<RefAudio>> {
    let rows = sqlx::query(&format!(
        "{} ORDER BY COALESCE(list_position, 0) DESC, audio_hash",
        SELECT_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_ref_audio).collect())
}

/// Number of rows, deleted included (used to place new records last)
pub async fn count_ref_audio(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ref_audio")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Insert a record, or refresh the existing row with the same hash
///
/// On conflict the filepath is replaced, metadata fields that are `Some`
/// overwrite the stored value and `None` fields keep it. The deleted flag is
/// cleared only when `undelete` is set.
pub async fn upsert_ref_audio(
    pool: &SqlitePool,
    record: &RefAudio,
    undelete: bool,
) -> Result<UpsertOutcome> {
    let existed = get_ref_audio(pool, &record.audio_hash).await?.is_some();

    sqlx::query(
        r#"
        INSERT INTO ref_audio (audio_hash, local_filepath, character, emotion, utterance,
                               list_position, duration_secs, is_deleted)
        VALUES (?, ?, ?, ?, ?, ?, ?, 0)
        ON CONFLICT(audio_hash) DO UPDATE SET
            local_filepath = excluded.local_filepath,
            character = COALESCE(excluded.character, ref_audio.character),
            emotion = COALESCE(excluded.emotion, ref_audio.emotion),
            utterance = COALESCE(excluded.utterance, ref_audio.utterance),
            list_position = COALESCE(excluded.list_position, ref_audio.list_position),
            duration_secs = COALESCE(excluded.duration_secs, ref_audio.duration_secs),
            is_deleted = CASE WHEN ? THEN 0 ELSE ref_audio.is_deleted END
        "#,
    )
    .bind(&record.audio_hash)
    .bind(&record.local_filepath)
    .bind(&record.character)
    .bind(&record.emotion)
    .bind(&record.utterance)
    .bind(record.list_position)
    .bind(record.duration_secs)
    .bind(undelete)
    .execute(pool)
    .await?;

    let outcome = if existed {
        UpsertOutcome::Updated
    } else {
        UpsertOutcome::Inserted
    };

    tracing::debug!(
        audio_hash = %record.audio_hash,
        path = %record.local_filepath,
        outcome = ?outcome,
        "Upserted reference audio"
    );

    Ok(outcome)
}

/// Edit character, emotion or utterance in place
pub async fn update_metadata(
    pool: &SqlitePool,
    audio_hash: &str,
    update: &MetadataUpdate,
) -> Result<RefAudio> {
    let result = sqlx::query(
        r#"
        UPDATE ref_audio SET
            character = COALESCE(?, character),
            emotion = COALESCE(?, emotion),
            utterance = COALESCE(?, utterance)
        WHERE audio_hash = ?
        "#,
    )
    .bind(&update.character)
    .bind(&update.emotion)
    .bind(&update.utterance)
    .bind(audio_hash)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("reference audio {}", audio_hash)));
    }

    get_ref_audio(pool, audio_hash)
        .await?
        .ok_or_else(|| Error::NotFound(format!("reference audio {}", audio_hash)))
}

/// Flag a record as deleted; the row and its hash stay resolvable
pub async fn soft_delete(pool: &SqlitePool, audio_hash: &str) -> Result<()> {
    let result = sqlx::query("UPDATE ref_audio SET is_deleted = 1 WHERE audio_hash = ?")
        .bind(audio_hash)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("reference audio {}", audio_hash)));
    }

    tracing::info!(audio_hash = %audio_hash, "Reference audio marked deleted");
    Ok(())
}

/// Report, per hash, whether the record exists and its file is on disk
///
/// Soft-deleted records still count as known.
pub async fn known_hashes(pool: &SqlitePool, hashes: &[String]) -> Result<BTreeMap<String, bool>> {
    let mut known = BTreeMap::new();
    for hash in hashes {
        let present = match get_ref_audio(pool, hash).await? {
            Some(record) => Path::new(&record.local_filepath).is_file(),
            None => false,
        };
        known.insert(hash.clone(), present);
    }
    Ok(known)
}

/// Distinct character labels of listed (non-deleted) records, sorted
pub async fn list_characters(pool: &SqlitePool) -> Result<Vec<String>> {
    let characters: Vec<String> = sqlx::query_scalar(
        "SELECT DISTINCT character FROM ref_audio \
         WHERE is_deleted = 0 AND character IS NOT NULL ORDER BY character",
    )
    .fetch_all(pool)
    .await?;
    Ok(characters)
}
