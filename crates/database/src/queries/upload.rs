//! Upload bookkeeping
//!
//! Every local change bumps a counter. An upload records the counter value
//! it was exported at, so a change made while the upload was in flight still
//! leaves the store marked for the next one.

use crate::DbPool;
use cloudsync_core::AppError;
use sqlx::Row;

/// Change counters of the local store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadState {
    /// Local changes recorded so far
    pub changes: i64,
    /// Value of `changes` the last successful upload carried
    pub uploaded: i64,
}

impl UploadState {
    /// True while some local change has not reached the remote snapshot
    pub fn needs_upload(&self) -> bool {
        self.changes > self.uploaded
    }
}

/// Records one local change the remote snapshot does not carry yet
pub async fn mark_changed(pool: &DbPool) -> Result<(), AppError> {
    sqlx::query("UPDATE upload_state SET changes = changes + 1 WHERE id = 1")
        .execute(pool)
        .await
        .map_err(|e| AppError::database("Failed to record local change", e))?;
    Ok(())
}

/// Reads the counters
pub async fn upload_state(pool: &DbPool) -> Result<UploadState, AppError> {
    let row = sqlx::query("SELECT changes, uploaded FROM upload_state WHERE id = 1")
        .fetch_optional(pool)
        .await
        .map_err(|e| AppError::database("Failed to read upload state", e))?;

    let Some(row) = row else {
        return Ok(UploadState::default());
    };
    Ok(UploadState {
        changes: row
            .try_get("changes")
            .map_err(|e| AppError::database("Missing change counter", e))?,
        uploaded: row
            .try_get("uploaded")
            .map_err(|e| AppError::database("Missing upload counter", e))?,
    })
}

/// Records that a snapshot exported at `changes` was uploaded
pub async fn mark_uploaded(pool: &DbPool, changes: i64) -> Result<(), AppError> {
    sqlx::query("UPDATE upload_state SET uploaded = MAX(uploaded, ?) WHERE id = 1")
        .bind(changes)
        .execute(pool)
        .await
        .map_err(|e| AppError::database("Failed to record upload", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::open_in_memory;

    #[tokio::test]
    async fn test_fresh_store_is_clean() {
        let pool = open_in_memory().await.unwrap();
        assert!(!upload_state(&pool).await.unwrap().needs_upload());
    }

    #[tokio::test]
    async fn test_upload_clears_changes() {
        let pool = open_in_memory().await.unwrap();
        mark_changed(&pool).await.unwrap();
        mark_changed(&pool).await.unwrap();

        let state = upload_state(&pool).await.unwrap();
        assert_eq!(state.changes, 2);
        assert!(state.needs_upload());

        mark_uploaded(&pool, state.changes).await.unwrap();
        assert!(!upload_state(&pool).await.unwrap().needs_upload());
    }

    #[tokio::test]
    async fn test_change_during_upload_stays_pending() {
        let pool = open_in_memory().await.unwrap();
        mark_changed(&pool).await.unwrap();
        let exported_at = upload_state(&pool).await.unwrap().changes;

        mark_changed(&pool).await.unwrap();
        mark_uploaded(&pool, exported_at).await.unwrap();
        assert!(upload_state(&pool).await.unwrap().needs_upload());

        // an older upload finishing late does not move the marker back
        mark_uploaded(&pool, 0).await.unwrap();
        assert_eq!(upload_state(&pool).await.unwrap().uploaded, exported_at);
    }
}
