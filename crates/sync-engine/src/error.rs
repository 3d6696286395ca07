// crates/sync-engine/src/error.rs
//! Error types for sync operations

use cloudsync_core::AppError;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during synchronization
#[derive(Debug, Error)]
pub enum SyncError {
    /// Invalid sync data
    #[error("Invalid sync data: {0}")]
    InvalidData(String),

    /// Another snapshot cycle is running
    #[error("Sync already in progress")]
    InProgress,

    /// Local store, host or transport failure
    #[error(transparent)]
    App(#[from] AppError),

    /// Local file could not be read or written
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration cannot drive a sync
    #[error("Configuration error: {0}")]
    Config(String),

    /// Custom error
    #[error("{0}")]
    Custom(String),
}

impl SyncError {
    /// Wraps an I/O error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SyncError::InvalidData("truncated envelope".to_string());
        assert!(err.to_string().contains("Invalid sync data"));
    }

    #[test]
    fn test_in_progress_error() {
        assert!(SyncError::InProgress.to_string().contains("already in progress"));
    }

    #[test]
    fn test_app_error_is_transparent() {
        let err: SyncError = AppError::BrokerError {
            message: "refused".to_string(),
        }
        .into();
        assert_eq!(err.to_string(), "Broker error: refused");
    }

    #[test]
    fn test_io_error_names_path() {
        let err = SyncError::io(
            "/data/favourites.xml",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("/data/favourites.xml"));
    }
}
