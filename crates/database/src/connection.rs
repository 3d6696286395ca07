//! Database connection management

use crate::migrations::{run_migrations, verify_integrity};
use cloudsync_core::AppError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::{Path, PathBuf};

/// Database connection pool
pub type DbPool = Pool<Sqlite>;

/// File name of the local store inside the data directory
pub const STORE_FILE: &str = "cloudsync.db";

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    pub path: PathBuf,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Enable Write-Ahead Logging (WAL) mode
    pub enable_wal: bool,
    /// Create database if it doesn't exist
    pub create_if_missing: bool,
    /// Open without write access
    pub read_only: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(STORE_FILE),
            max_connections: 4,
            enable_wal: true,
            create_if_missing: true,
            read_only: false,
        }
    }
}

impl DatabaseConfig {
    /// Creates a new configuration with a custom path
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Configuration for reading a downloaded snapshot
    pub fn read_only(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_connections: 1,
            enable_wal: false,
            create_if_missing: false,
            read_only: true,
        }
    }

    /// Sets the maximum number of connections
    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Enables or disables WAL mode
    pub fn with_wal(mut self, enable: bool) -> Self {
        self.enable_wal = enable;
        self
    }
}

/// Establishes a connection pool to the database
pub async fn connect(config: &DatabaseConfig) -> Result<DbPool, AppError> {
    let mut options = SqliteConnectOptions::new()
        .filename(&config.path)
        .create_if_missing(config.create_if_missing)
        .read_only(config.read_only);

    if config.enable_wal && !config.read_only {
        options = options
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
    }

    SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await
        .map_err(|e| AppError::database("Failed to connect to database", e))
}

/// An opened local store
#[derive(Debug)]
pub struct OpenedStore {
    pub pool: DbPool,
    /// True when the previous file failed its integrity check and was replaced
    pub recreated: bool,
}

/// Opens the local store, recreating it if it is corrupt
///
/// The integrity check runs once here. A damaged file is removed together
/// with its `-wal` and `-shm` siblings and an empty store is created; the
/// caller is told through `recreated` so it can warn the user once.
pub async fn open_store(path: impl AsRef<Path>) -> Result<OpenedStore, AppError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::io_at(parent, e))?;
        }
    }

    let config = DatabaseConfig::new(path);
    let mut recreated = false;

    let pool = if database_exists(path) {
        match connect(&config).await {
            Ok(pool) => match verify_integrity(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    log::warn!("Local store at {} is damaged: {}", path.display(), e);
                    close(pool).await;
                    None
                }
            },
            Err(e) => {
                log::warn!("Local store at {} cannot be opened: {}", path.display(), e);
                None
            }
        }
    } else {
        None
    };

    let pool = match pool {
        Some(pool) => pool,
        None => {
            if database_exists(path) {
                remove_database_files(path)?;
                recreated = true;
            }
            connect(&config).await?
        }
    };

    run_migrations(&pool).await?;
    Ok(OpenedStore { pool, recreated })
}

/// Opens an empty store that lives only in memory
///
/// Used for dry runs and tests; the single connection is kept alive for the
/// lifetime of the pool.
pub async fn open_in_memory() -> Result<DbPool, AppError> {
    let options = SqliteConnectOptions::new()
        .in_memory(true)
        .journal_mode(SqliteJournalMode::Memory);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .map_err(|e| AppError::database("Failed to open in-memory database", e))?;

    run_migrations(&pool).await?;
    Ok(pool)
}

/// Closes the database connection pool
pub async fn close(pool: DbPool) {
    pool.close().await;
}

/// Checks if the database file exists
pub fn database_exists(path: impl AsRef<Path>) -> bool {
    path.as_ref().exists()
}

/// Removes a database file and its WAL/SHM siblings
pub fn remove_database_files(path: &Path) -> Result<(), AppError> {
    for suffix in ["", "-wal", "-shm"] {
        let mut candidate = path.as_os_str().to_owned();
        candidate.push(suffix);
        let candidate = PathBuf::from(candidate);
        match std::fs::remove_file(&candidate) {
            Ok(()) => log::debug!("Removed {}", candidate.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(AppError::io_at(candidate, e)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_store_creates_database() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join(STORE_FILE);

        let opened = open_store(&path).await.unwrap();

        assert!(database_exists(&path));
        assert!(!opened.recreated);
        close(opened.pool).await;
    }

    #[tokio::test]
    async fn test_open_store_uses_wal() {
        let dir = TempDir::new().unwrap();
        let opened = open_store(dir.path().join(STORE_FILE)).await.unwrap();

        let result: (String,) = sqlx::query_as("PRAGMA journal_mode;")
            .fetch_one(&opened.pool)
            .await
            .unwrap();

        assert_eq!(result.0.to_lowercase(), "wal");
        close(opened.pool).await;
    }

    #[tokio::test]
    async fn test_corrupt_store_is_recreated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(STORE_FILE);
        std::fs::write(&path, vec![0x42u8; 8192]).unwrap();
        std::fs::write(dir.path().join("cloudsync.db-wal"), b"junk").unwrap();

        let opened = open_store(&path).await.unwrap();
        assert!(opened.recreated);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM watched_items")
            .fetch_one(&opened.pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
        close(opened.pool).await;
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(STORE_FILE);

        let opened = open_store(&path).await.unwrap();
        sqlx::query("INSERT INTO watched_items (content_id, kind, play_count) VALUES ('imdb:tt001', 'movie', 1)")
            .execute(&opened.pool)
            .await
            .unwrap();
        close(opened.pool).await;

        let reopened = open_store(&path).await.unwrap();
        assert!(!reopened.recreated);
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM watched_items")
            .fetch_one(&reopened.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
        close(reopened.pool).await;
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let pool = open_in_memory().await.unwrap();
        sqlx::query("SELECT 1;").execute(&pool).await.unwrap();
        close(pool).await;
    }

    #[test]
    fn test_config_builder() {
        let config = DatabaseConfig::new("test.db")
            .with_max_connections(20)
            .with_wal(false);

        assert_eq!(config.path, PathBuf::from("test.db"));
        assert_eq!(config.max_connections, 20);
        assert!(!config.enable_wal);
        assert!(config.create_if_missing);

        let snapshot = DatabaseConfig::read_only("remote.db");
        assert!(snapshot.read_only);
        assert!(!snapshot.create_if_missing);
    }

    #[test]
    fn test_remove_missing_files_is_ok() {
        let dir = TempDir::new().unwrap();
        remove_database_files(&dir.path().join("nothing.db")).unwrap();
    }
}
