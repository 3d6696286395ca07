//! Self-contained snapshots of the local store
//!
//! A snapshot is a plain SQLite file exchanged through cloud storage. Peers
//! only read the value columns, so snapshots written by older or newer
//! schema versions stay readable as long as those columns exist.

use crate::connection::{close, connect, DatabaseConfig};
use crate::migrations::run_migrations;
use crate::queries::resume::row_to_resume;
use crate::queries::watched::row_to_watched;
use crate::queries::{list_resume, list_watched, upsert_resume, upsert_watched};
use crate::DbPool;
use cloudsync_core::{AppError, ResumePoint, WatchedItem};
use sqlx::Row;
use std::io::Write;
use std::path::Path;
use tempfile::{NamedTempFile, TempDir};

const SQLITE_HEADER: &[u8] = b"SQLite format 3\0";

/// Rows read from a peer's snapshot
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteSnapshot {
    pub watched: Vec<WatchedItem>,
    pub resume: Vec<ResumePoint>,
}

impl RemoteSnapshot {
    /// True when the snapshot carries no rows at all
    pub fn is_empty(&self) -> bool {
        self.watched.is_empty() && self.resume.is_empty()
    }
}

/// Exports the store into a standalone database file and returns its bytes
///
/// File stores are copied with `VACUUM INTO`. An in-memory store has no file
/// for SQLite to vacuum from, so its rows are copied into a fresh store
/// instead.
pub async fn export_snapshot(pool: &DbPool) -> Result<Vec<u8>, AppError> {
    let dir = TempDir::new().map_err(|e| AppError::database("Failed to create export directory", e))?;
    let target = dir.path().join("snapshot.db");

    if is_in_memory(pool).await? {
        copy_rows_into(pool, &target).await?;
    } else {
        vacuum_into(pool, &target).await?;
    }

    let bytes = tokio::fs::read(&target)
        .await
        .map_err(|e| AppError::io_at(&target, e))?;
    log::debug!("Exported snapshot of {} bytes", bytes.len());
    Ok(bytes)
}

async fn is_in_memory(pool: &DbPool) -> Result<bool, AppError> {
    let rows = sqlx::query("PRAGMA database_list")
        .fetch_all(pool)
        .await
        .map_err(|e| AppError::database("Failed to list databases", e))?;

    for row in rows {
        let name: String = row.try_get("name").unwrap_or_default();
        if name == "main" {
            let file: Option<String> = row.try_get("file").unwrap_or_default();
            return Ok(file.map_or(true, |f| f.is_empty()));
        }
    }
    Ok(false)
}

async fn vacuum_into(pool: &DbPool, target: &Path) -> Result<(), AppError> {
    let target_str = target.to_str().ok_or_else(|| AppError::InternalError {
        message: format!("export path {} is not valid UTF-8", target.display()),
    })?;

    sqlx::query("VACUUM INTO ?")
        .bind(target_str)
        .execute(pool)
        .await
        .map_err(|e| AppError::database("Failed to export snapshot", e))?;
    Ok(())
}

async fn copy_rows_into(pool: &DbPool, target: &Path) -> Result<(), AppError> {
    let exported = connect(&DatabaseConfig::new(target).with_wal(false).with_max_connections(1)).await?;
    let result = copy_rows(pool, &exported).await;
    close(exported).await;
    result
}

async fn copy_rows(from: &DbPool, to: &DbPool) -> Result<(), AppError> {
    run_migrations(to).await?;
    for item in list_watched(from).await? {
        upsert_watched(to, &item).await?;
    }
    for point in list_resume(from).await? {
        upsert_resume(to, &point).await?;
    }
    Ok(())
}

/// Reads the rows of a downloaded snapshot
///
/// The blob is written to a temporary file and opened read-only. Tables the
/// snapshot does not have read as empty.
pub async fn read_snapshot(bytes: &[u8]) -> Result<RemoteSnapshot, AppError> {
    let mut staged = bytes.to_vec();
    // A snapshot exported from a WAL store carries the WAL flag in its
    // header; a read-only connection cannot open that without -shm.
    if staged.len() > 19 && staged.starts_with(SQLITE_HEADER) {
        staged[18] = 1;
        staged[19] = 1;
    }

    let mut file =
        NamedTempFile::new().map_err(|e| AppError::database("Failed to stage snapshot", e))?;
    file.write_all(&staged)
        .and_then(|()| file.flush())
        .map_err(|e| AppError::database("Failed to stage snapshot", e))?;

    let pool = connect(&DatabaseConfig::read_only(file.path())).await?;
    let result = read_rows(&pool).await;
    close(pool).await;
    result
}

async fn read_rows(pool: &DbPool) -> Result<RemoteSnapshot, AppError> {
    let tables: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table'")
            .fetch_all(pool)
            .await
            .map_err(|e| AppError::DatabaseCorrupted {
                details: format!("snapshot is not a readable database: {}", e),
            })?;

    let mut snapshot = RemoteSnapshot::default();

    if tables.iter().any(|t| t == "watched_items") {
        let rows = sqlx::query(
            "SELECT content_id, kind, title, play_count, last_played, last_change_at FROM watched_items",
        )
        .fetch_all(pool)
        .await
        .map_err(|e| AppError::database("Failed to read snapshot watched items", e))?;

        for row in rows {
            match row_to_watched(row) {
                Ok(item) => snapshot.watched.push(item),
                Err(e) => log::warn!("Skipping unreadable snapshot row: {}", e),
            }
        }
    }

    if tables.iter().any(|t| t == "resume_points") {
        let rows = sqlx::query(
            "SELECT file_path, content_id, kind, title, position_seconds, total_seconds, last_change_at FROM resume_points",
        )
        .fetch_all(pool)
        .await
        .map_err(|e| AppError::database("Failed to read snapshot resume points", e))?;

        for row in rows {
            match row_to_resume(row) {
                Ok(point) => snapshot.resume.push(point),
                Err(e) => log::warn!("Skipping unreadable snapshot row: {}", e),
            }
        }
    }

    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::open_in_memory;
    use cloudsync_core::{ContentId, MediaKind, Timestamp};

    #[tokio::test]
    async fn test_export_then_read() {
        let pool = open_in_memory().await.unwrap();
        let item = WatchedItem::new(ContentId::new("imdb", "tt001"), MediaKind::Movie, "Heat", 1)
            .with_last_change(Timestamp::from_millis(42));
        let point = ResumePoint::new("/movies/heat.mkv", MediaKind::Movie, 300.0, 6000.0)
            .with_last_change(Timestamp::from_millis(43));
        upsert_watched(&pool, &item).await.unwrap();
        upsert_resume(&pool, &point).await.unwrap();

        let bytes = export_snapshot(&pool).await.unwrap();
        assert!(bytes.starts_with(SQLITE_HEADER));

        let snapshot = read_snapshot(&bytes).await.unwrap();
        assert_eq!(snapshot.watched, vec![item]);
        assert_eq!(snapshot.resume, vec![point]);
    }

    #[tokio::test]
    async fn test_export_file_store() {
        let dir = TempDir::new().unwrap();
        let opened = crate::connection::open_store(dir.path().join("cloudsync.db"))
            .await
            .unwrap();
        let item = WatchedItem::new(ContentId::new("imdb", "tt002"), MediaKind::Movie, "Ronin", 3)
            .with_last_change(Timestamp::from_millis(7));
        upsert_watched(&opened.pool, &item).await.unwrap();

        let snapshot = read_snapshot(&export_snapshot(&opened.pool).await.unwrap())
            .await
            .unwrap();
        assert_eq!(snapshot.watched, vec![item]);
        assert!(snapshot.resume.is_empty());
        close(opened.pool).await;
    }

    #[tokio::test]
    async fn test_export_memory_store_twice() {
        let pool = open_in_memory().await.unwrap();
        assert!(is_in_memory(&pool).await.unwrap());
        let item = WatchedItem::new(ContentId::new("imdb", "tt001"), MediaKind::Movie, "Heat", 1);
        upsert_watched(&pool, &item).await.unwrap();

        let first = read_snapshot(&export_snapshot(&pool).await.unwrap()).await.unwrap();
        let second = read_snapshot(&export_snapshot(&pool).await.unwrap()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.watched.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_tables_read_as_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bare.db");
        let pool = connect(&DatabaseConfig::new(&path).with_wal(false)).await.unwrap();
        sqlx::query("CREATE TABLE unrelated (x INTEGER)")
            .execute(&pool)
            .await
            .unwrap();
        close(pool).await;

        let bytes = std::fs::read(&path).unwrap();
        let snapshot = read_snapshot(&bytes).await.unwrap();
        assert!(snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_garbage_is_rejected() {
        let result = read_snapshot(b"definitely not a database").await;
        assert!(result.is_err());
    }
}
