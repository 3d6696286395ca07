//! Watched item operations

use crate::queries::upload::mark_changed;
use crate::DbPool;
use cloudsync_core::{AppError, ContentId, MediaKind, Timestamp, WatchedItem};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

const SELECT_WATCHED: &str =
    "SELECT content_id, kind, title, play_count, last_played, last_change_at FROM watched_items";

/// Gets a watched item by content identity
pub async fn get_watched(pool: &DbPool, id: &ContentId) -> Result<Option<WatchedItem>, AppError> {
    let row = sqlx::query(&format!("{} WHERE content_id = ?", SELECT_WATCHED))
        .bind(id.as_str())
        .fetch_optional(pool)
        .await
        .map_err(|e| AppError::database("Failed to fetch watched item", e))?;

    row.map(row_to_watched).transpose()
}

/// Lists every watched item
pub async fn list_watched(pool: &DbPool) -> Result<Vec<WatchedItem>, AppError> {
    let rows = sqlx::query(&format!("{} ORDER BY content_id", SELECT_WATCHED))
        .fetch_all(pool)
        .await
        .map_err(|e| AppError::database("Failed to list watched items", e))?;

    rows.into_iter().map(row_to_watched).collect()
}

/// Counts watched items
pub async fn count_watched(pool: &DbPool) -> Result<i64, AppError> {
    sqlx::query_scalar("SELECT COUNT(*) FROM watched_items")
        .fetch_one(pool)
        .await
        .map_err(|e| AppError::database("Failed to count watched items", e))
}

/// Inserts or replaces the merged value of a watched item
///
/// The recorded host value is left untouched.
pub async fn upsert_watched(pool: &DbPool, item: &WatchedItem) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO watched_items (content_id, kind, title, play_count, last_played, last_change_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(content_id) DO UPDATE SET
            kind = excluded.kind,
            title = excluded.title,
            play_count = excluded.play_count,
            last_played = excluded.last_played,
            last_change_at = excluded.last_change_at
        "#,
    )
    .bind(item.id.as_str())
    .bind(item.kind.as_str())
    .bind(&item.title)
    .bind(i64::from(item.play_count))
    .bind(&item.last_played)
    .bind(item.last_change_at.as_millis())
    .execute(pool)
    .await
    .map_err(|e| AppError::database("Failed to upsert watched item", e))?;

    Ok(())
}

/// Records the value now present on the host
pub async fn record_host_watched(pool: &DbPool, item: &WatchedItem) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE watched_items SET host_play_count = ?, host_last_played = ? WHERE content_id = ?",
    )
    .bind(i64::from(item.play_count))
    .bind(&item.last_played)
    .bind(item.id.as_str())
    .execute(pool)
    .await
    .map_err(|e| AppError::database("Failed to record host watched state", e))?;

    Ok(())
}

/// Folds one host observation into the store
///
/// Returns true when the observation was a local change: the host value
/// differs from the one last recorded for it. The row then takes the host
/// value and is stamped now. A row that has never been seen on the host only
/// records the observation, so a value merged from a peer is not overwritten
/// before it has been pushed.
pub async fn observe_host_watched(pool: &DbPool, host: &WatchedItem) -> Result<bool, AppError> {
    let row = sqlx::query(
        "SELECT play_count, last_played, host_play_count, host_last_played FROM watched_items WHERE content_id = ?",
    )
    .bind(host.id.as_str())
    .fetch_optional(pool)
    .await
    .map_err(|e| AppError::database("Failed to fetch watched item", e))?;

    let Some(row) = row else {
        let item = host.clone().with_last_change(Timestamp::now());
        upsert_watched(pool, &item).await?;
        record_host_watched(pool, &item).await?;
        mark_changed(pool).await?;
        return Ok(true);
    };

    let host_count: Option<i64> = row
        .try_get("host_play_count")
        .map_err(|e| AppError::database("Missing host play count", e))?;
    let host_last: Option<String> = row
        .try_get("host_last_played")
        .map_err(|e| AppError::database("Missing host last played", e))?;

    let Some(host_count) = host_count else {
        record_host_watched(pool, host).await?;
        return Ok(false);
    };

    if host_count == i64::from(host.play_count) && host_last == host.last_played {
        return Ok(false);
    }

    let count: i64 = row
        .try_get("play_count")
        .map_err(|e| AppError::database("Missing play count", e))?;
    let last_played: Option<String> = row
        .try_get("last_played")
        .map_err(|e| AppError::database("Missing last played", e))?;

    if count == i64::from(host.play_count) && last_played == host.last_played {
        record_host_watched(pool, host).await?;
        return Ok(false);
    }

    let item = host.clone().with_last_change(Timestamp::now());
    upsert_watched(pool, &item).await?;
    record_host_watched(pool, &item).await?;
    mark_changed(pool).await?;
    Ok(true)
}

/// Lists rows whose merged value has not reached the host yet
pub async fn pending_host_watched(pool: &DbPool) -> Result<Vec<WatchedItem>, AppError> {
    let rows = sqlx::query(&format!(
        r#"{} WHERE host_play_count IS NULL
            OR host_play_count != play_count
            OR COALESCE(host_last_played, '') != COALESCE(last_played, '')
        ORDER BY content_id"#,
        SELECT_WATCHED
    ))
    .fetch_all(pool)
    .await
    .map_err(|e| AppError::database("Failed to list pending watched items", e))?;

    rows.into_iter().map(row_to_watched).collect()
}

pub(crate) fn row_to_watched(row: SqliteRow) -> Result<WatchedItem, AppError> {
    let id_str: String = row
        .try_get("content_id")
        .map_err(|e| AppError::database("Missing content ID", e))?;
    let id = ContentId::parse(&id_str).ok_or_else(|| AppError::DatabaseCorrupted {
        details: format!("invalid content id '{}'", id_str),
    })?;

    let kind_str: String = row
        .try_get("kind")
        .map_err(|e| AppError::database("Missing kind", e))?;
    let kind: MediaKind = kind_str
        .parse()
        .map_err(|details| AppError::DatabaseCorrupted { details })?;

    let play_count: i64 = row
        .try_get("play_count")
        .map_err(|e| AppError::database("Missing play count", e))?;
    let last_change_at: i64 = row
        .try_get("last_change_at")
        .map_err(|e| AppError::database("Missing last_change_at", e))?;

    Ok(WatchedItem {
        id,
        kind,
        title: row.try_get("title").unwrap_or_default(),
        play_count: u32::try_from(play_count.max(0)).unwrap_or(u32::MAX),
        last_played: row.try_get("last_played").ok().flatten(),
        last_change_at: Timestamp::from_millis(last_change_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::open_in_memory;

    fn heat(count: u32) -> WatchedItem {
        WatchedItem::new(ContentId::new("imdb", "tt0113277"), MediaKind::Movie, "Heat", count)
            .with_last_played("2024-03-01 20:15:00")
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let pool = open_in_memory().await.unwrap();
        let item = heat(1).with_last_change(Timestamp::from_millis(1000));

        upsert_watched(&pool, &item).await.unwrap();
        let stored = get_watched(&pool, &item.id).await.unwrap().unwrap();
        assert_eq!(stored, item);

        let updated = heat(2).with_last_change(Timestamp::from_millis(2000));
        upsert_watched(&pool, &updated).await.unwrap();
        assert_eq!(get_watched(&pool, &item.id).await.unwrap().unwrap().play_count, 2);
        assert_eq!(count_watched(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_first_observation_is_a_change() {
        let pool = open_in_memory().await.unwrap();

        assert!(observe_host_watched(&pool, &heat(1)).await.unwrap());
        let stored = get_watched(&pool, &heat(1).id).await.unwrap().unwrap();
        assert!(!stored.last_change_at.is_unset());
        assert!(pending_host_watched(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_observation_is_not_a_change() {
        let pool = open_in_memory().await.unwrap();
        observe_host_watched(&pool, &heat(1)).await.unwrap();
        let first = get_watched(&pool, &heat(1).id).await.unwrap().unwrap();

        assert!(!observe_host_watched(&pool, &heat(1)).await.unwrap());
        let second = get_watched(&pool, &heat(1).id).await.unwrap().unwrap();
        assert_eq!(first.last_change_at, second.last_change_at);
    }

    #[tokio::test]
    async fn test_host_change_replaces_value() {
        let pool = open_in_memory().await.unwrap();
        observe_host_watched(&pool, &heat(1)).await.unwrap();

        assert!(observe_host_watched(&pool, &heat(2)).await.unwrap());
        assert_eq!(get_watched(&pool, &heat(1).id).await.unwrap().unwrap().play_count, 2);
    }

    #[tokio::test]
    async fn test_merged_value_survives_until_pushed() {
        let pool = open_in_memory().await.unwrap();
        let remote = heat(3).with_last_change(Timestamp::from_millis(5000));
        upsert_watched(&pool, &remote).await.unwrap();

        // Host still shows its older value
        assert!(!observe_host_watched(&pool, &heat(1)).await.unwrap());
        let pending = pending_host_watched(&pool).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].play_count, 3);

        record_host_watched(&pool, &pending[0]).await.unwrap();
        assert!(pending_host_watched(&pool).await.unwrap().is_empty());
        assert!(!observe_host_watched(&pool, &heat(3)).await.unwrap());
    }

    #[tokio::test]
    async fn test_host_changes_mark_store_for_upload() {
        use crate::queries::upload::{mark_uploaded, upload_state};

        let pool = open_in_memory().await.unwrap();
        observe_host_watched(&pool, &heat(1)).await.unwrap();
        let state = upload_state(&pool).await.unwrap();
        assert!(state.needs_upload());
        mark_uploaded(&pool, state.changes).await.unwrap();

        // a repeat observation is not a change
        observe_host_watched(&pool, &heat(1)).await.unwrap();
        assert!(!upload_state(&pool).await.unwrap().needs_upload());

        observe_host_watched(&pool, &heat(2)).await.unwrap();
        assert!(upload_state(&pool).await.unwrap().needs_upload());
    }

    #[tokio::test]
    async fn test_missing_row() {
        let pool = open_in_memory().await.unwrap();
        let id = ContentId::new("tmdb", "949");
        assert!(get_watched(&pool, &id).await.unwrap().is_none());
        assert!(list_watched(&pool).await.unwrap().is_empty());
    }
}
