//! Reference-audio catalog database
//!
//! One SQLite table shared by client and server. The client fills in the
//! speaker metadata; the server only records hash, path and transcript.

pub mod ref_audio;

pub use ref_audio::*;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;

use crate::Result;

/// Open (or create) the catalog database and ensure its tables exist
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    tracing::debug!("Connecting to database: {}", db_path.display());

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);
    // One writer; sqlx serializes statements on the single connection
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// In-memory catalog, used by tests and throwaway sessions
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create catalog tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ref_audio (
            audio_hash TEXT PRIMARY KEY NOT NULL,
            local_filepath TEXT NOT NULL,
            character TEXT,
            emotion TEXT,
            utterance TEXT,
            list_position INTEGER,
            duration_secs REAL,
            is_deleted INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::debug!("Database tables initialized (ref_audio)");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_creates_file_and_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("nested").join("catalog.db");

        let pool = init_database_pool(&db_path).await.unwrap();
        assert!(db_path.exists());

        init_tables(&pool).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ref_audio")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
