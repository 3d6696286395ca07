//! Resume point operations

use crate::queries::upload::mark_changed;
use crate::DbPool;
use cloudsync_core::types::POSITION_TOLERANCE_SECS;
use cloudsync_core::{AppError, ContentId, MediaKind, ResumePoint, Timestamp};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

const SELECT_RESUME: &str = "SELECT file_path, content_id, kind, title, position_seconds, total_seconds, last_change_at FROM resume_points";

/// Gets the resume point of a file
pub async fn get_resume(pool: &DbPool, file_path: &str) -> Result<Option<ResumePoint>, AppError> {
    let row = sqlx::query(&format!("{} WHERE file_path = ?", SELECT_RESUME))
        .bind(file_path)
        .fetch_optional(pool)
        .await
        .map_err(|e| AppError::database("Failed to fetch resume point", e))?;

    row.map(row_to_resume).transpose()
}

/// Finds the resume point recorded for a content identity
pub async fn find_resume_by_content(
    pool: &DbPool,
    id: &ContentId,
) -> Result<Option<ResumePoint>, AppError> {
    let row = sqlx::query(&format!(
        "{} WHERE content_id = ? ORDER BY last_change_at DESC LIMIT 1",
        SELECT_RESUME
    ))
    .bind(id.as_str())
    .fetch_optional(pool)
    .await
    .map_err(|e| AppError::database("Failed to fetch resume point", e))?;

    row.map(row_to_resume).transpose()
}

/// Lists every resume point
pub async fn list_resume(pool: &DbPool) -> Result<Vec<ResumePoint>, AppError> {
    let rows = sqlx::query(&format!("{} ORDER BY file_path", SELECT_RESUME))
        .fetch_all(pool)
        .await
        .map_err(|e| AppError::database("Failed to list resume points", e))?;

    rows.into_iter().map(row_to_resume).collect()
}

/// Counts resume points
pub async fn count_resume(pool: &DbPool) -> Result<i64, AppError> {
    sqlx::query_scalar("SELECT COUNT(*) FROM resume_points")
        .fetch_one(pool)
        .await
        .map_err(|e| AppError::database("Failed to count resume points", e))
}

/// Inserts or replaces the merged value of a resume point
pub async fn upsert_resume(pool: &DbPool, point: &ResumePoint) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO resume_points (file_path, content_id, kind, title, position_seconds, total_seconds, last_change_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(file_path) DO UPDATE SET
            content_id = COALESCE(excluded.content_id, resume_points.content_id),
            kind = excluded.kind,
            title = excluded.title,
            position_seconds = excluded.position_seconds,
            total_seconds = excluded.total_seconds,
            last_change_at = excluded.last_change_at
        "#,
    )
    .bind(&point.file_path)
    .bind(point.content_id.as_ref().map(|id| id.as_str()))
    .bind(point.kind.as_str())
    .bind(&point.title)
    .bind(point.position_seconds)
    .bind(point.total_seconds)
    .bind(point.last_change_at.as_millis())
    .execute(pool)
    .await
    .map_err(|e| AppError::database("Failed to upsert resume point", e))?;

    Ok(())
}

/// Records the position now present on the host
pub async fn record_host_resume(pool: &DbPool, point: &ResumePoint) -> Result<(), AppError> {
    sqlx::query("UPDATE resume_points SET host_position_seconds = ? WHERE file_path = ?")
        .bind(point.position_seconds)
        .bind(&point.file_path)
        .execute(pool)
        .await
        .map_err(|e| AppError::database("Failed to record host resume point", e))?;

    Ok(())
}

/// Folds one host resume observation into the store
///
/// Same rules as watched items: a change is a position that moved away from
/// the last recorded host position.
pub async fn observe_host_resume(pool: &DbPool, host: &ResumePoint) -> Result<bool, AppError> {
    if !host.is_meaningful() {
        return Ok(false);
    }

    let row = sqlx::query(
        "SELECT position_seconds, host_position_seconds FROM resume_points WHERE file_path = ?",
    )
    .bind(&host.file_path)
    .fetch_optional(pool)
    .await
    .map_err(|e| AppError::database("Failed to fetch resume point", e))?;

    let Some(row) = row else {
        let point = host.clone().with_last_change(Timestamp::now());
        upsert_resume(pool, &point).await?;
        record_host_resume(pool, &point).await?;
        mark_changed(pool).await?;
        return Ok(true);
    };

    let recorded: Option<f64> = row
        .try_get("host_position_seconds")
        .map_err(|e| AppError::database("Missing host position", e))?;

    let Some(recorded) = recorded else {
        record_host_resume(pool, host).await?;
        return Ok(false);
    };

    if (recorded - host.position_seconds).abs() < POSITION_TOLERANCE_SECS {
        return Ok(false);
    }

    let position: f64 = row
        .try_get("position_seconds")
        .map_err(|e| AppError::database("Missing position", e))?;

    if (position - host.position_seconds).abs() < POSITION_TOLERANCE_SECS {
        record_host_resume(pool, host).await?;
        return Ok(false);
    }

    let point = host.clone().with_last_change(Timestamp::now());
    upsert_resume(pool, &point).await?;
    record_host_resume(pool, &point).await?;
    mark_changed(pool).await?;
    Ok(true)
}

/// Lists resume points whose merged position has not reached the host yet
pub async fn pending_host_resume(pool: &DbPool) -> Result<Vec<ResumePoint>, AppError> {
    let rows = sqlx::query(&format!(
        r#"{} WHERE position_seconds > 0
            AND (host_position_seconds IS NULL OR ABS(host_position_seconds - position_seconds) >= ?)
        ORDER BY file_path"#,
        SELECT_RESUME
    ))
    .bind(POSITION_TOLERANCE_SECS)
    .fetch_all(pool)
    .await
    .map_err(|e| AppError::database("Failed to list pending resume points", e))?;

    rows.into_iter().map(row_to_resume).collect()
}

pub(crate) fn row_to_resume(row: SqliteRow) -> Result<ResumePoint, AppError> {
    let file_path: String = row
        .try_get("file_path")
        .map_err(|e| AppError::database("Missing file path", e))?;
    let content_id: Option<String> = row
        .try_get("content_id")
        .map_err(|e| AppError::database("Missing content ID", e))?;

    let kind_str: String = row
        .try_get("kind")
        .map_err(|e| AppError::database("Missing kind", e))?;
    let kind: MediaKind = kind_str
        .parse()
        .map_err(|details| AppError::DatabaseCorrupted { details })?;

    let position_seconds: f64 = row
        .try_get("position_seconds")
        .map_err(|e| AppError::database("Missing position", e))?;
    let total_seconds: f64 = row
        .try_get("total_seconds")
        .map_err(|e| AppError::database("Missing total", e))?;
    let last_change_at: i64 = row
        .try_get("last_change_at")
        .map_err(|e| AppError::database("Missing last_change_at", e))?;

    Ok(ResumePoint {
        file_path,
        content_id: content_id.as_deref().and_then(ContentId::parse),
        kind,
        title: row.try_get("title").unwrap_or_default(),
        position_seconds,
        total_seconds,
        last_change_at: Timestamp::from_millis(last_change_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::open_in_memory;

    fn point(position: f64) -> ResumePoint {
        ResumePoint::new("smb://nas/movies/heat.mkv", MediaKind::Movie, position, 10_200.0)
            .with_content_id(ContentId::new("imdb", "tt0113277"))
            .with_title("Heat")
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let pool = open_in_memory().await.unwrap();
        let p = point(300.0).with_last_change(Timestamp::from_millis(10));

        upsert_resume(&pool, &p).await.unwrap();
        assert_eq!(get_resume(&pool, &p.file_path).await.unwrap().unwrap(), p);

        let by_id = find_resume_by_content(&pool, &ContentId::new("imdb", "tt0113277"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_id.file_path, p.file_path);
    }

    #[tokio::test]
    async fn test_upsert_keeps_known_identity() {
        let pool = open_in_memory().await.unwrap();
        upsert_resume(&pool, &point(300.0)).await.unwrap();

        let anonymous = ResumePoint::new("smb://nas/movies/heat.mkv", MediaKind::Movie, 400.0, 10_200.0);
        upsert_resume(&pool, &anonymous).await.unwrap();

        let stored = get_resume(&pool, &anonymous.file_path).await.unwrap().unwrap();
        assert_eq!(stored.position_seconds, 400.0);
        assert!(stored.content_id.is_some());
    }

    #[tokio::test]
    async fn test_zero_position_is_not_observed() {
        let pool = open_in_memory().await.unwrap();
        assert!(!observe_host_resume(&pool, &point(0.0)).await.unwrap());
        assert_eq!(count_resume(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_observation_within_tolerance() {
        let pool = open_in_memory().await.unwrap();
        assert!(observe_host_resume(&pool, &point(300.0)).await.unwrap());
        assert!(!observe_host_resume(&pool, &point(300.3)).await.unwrap());
        assert!(observe_host_resume(&pool, &point(900.0)).await.unwrap());
        assert_eq!(
            get_resume(&pool, &point(0.0).file_path).await.unwrap().unwrap().position_seconds,
            900.0
        );
    }

    #[tokio::test]
    async fn test_pending_push() {
        let pool = open_in_memory().await.unwrap();
        observe_host_resume(&pool, &point(300.0)).await.unwrap();
        assert!(pending_host_resume(&pool).await.unwrap().is_empty());

        upsert_resume(&pool, &point(1200.0).with_last_change(Timestamp::now()))
            .await
            .unwrap();
        let pending = pending_host_resume(&pool).await.unwrap();
        assert_eq!(pending.len(), 1);

        record_host_resume(&pool, &pending[0]).await.unwrap();
        assert!(pending_host_resume(&pool).await.unwrap().is_empty());
    }
}
