//! Error types and recovery strategies for CloudSync
//!
//! This module provides the shared error type with three severity tiers:
//! - **Recoverable**: Can be retried on the next cycle (network timeouts, etc.)
//! - **Degraded**: Feature disabled but sync continues (host refresh unsupported, etc.)
//! - **Fatal**: Requires user intervention (corrupted store that cannot be recreated, etc.)
//!
//! Each error includes a recovery action to guide automatic error handling.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Recovery actions that can be taken when an error occurs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Retry the operation immediately (e.g., transient network glitch)
    RetryImmediate,
    /// Retry with exponential backoff (e.g., broker temporarily unavailable)
    RetryWithBackoff,
    /// Leave it to the next scheduled sync cycle
    RetryNextCycle,
    /// Disable the failing feature and continue
    DisableFeature,
    /// Discard the local store and recreate it
    RecreateStore,
    /// No automatic recovery - user intervention required
    UserIntervention,
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetryImmediate => write!(f, "Retrying immediately"),
            Self::RetryWithBackoff => write!(f, "Retrying with backoff"),
            Self::RetryNextCycle => write!(f, "Retrying on next sync cycle"),
            Self::DisableFeature => write!(f, "Disabling feature"),
            Self::RecreateStore => write!(f, "Recreating local store"),
            Self::UserIntervention => write!(f, "User intervention required"),
        }
    }
}

/// Error severity classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Error can be automatically recovered from
    Recoverable,
    /// Feature degraded but sync can continue
    Degraded,
    /// Critical error requiring user action
    Fatal,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recoverable => write!(f, "Recoverable"),
            Self::Degraded => write!(f, "Degraded"),
            Self::Fatal => write!(f, "Fatal"),
        }
    }
}

/// Main error type for CloudSync
#[derive(Error, Debug)]
pub enum AppError {
    // ===== Network Errors =====
    /// Network request failed
    #[error("Network error: {message}")]
    NetworkError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Network timeout
    #[error("Network timeout after {seconds}s: {operation}")]
    NetworkTimeout { operation: String, seconds: u64 },

    /// Connection lost during operation
    #[error("Connection lost: {message}")]
    ConnectionLost { message: String },

    /// Invalid URL provided
    #[error("Invalid URL: {url}")]
    InvalidUrl { url: String },

    // ===== Local Store Errors =====
    /// Database operation failed
    #[error("Database error: {message}")]
    DatabaseError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Database failed its integrity check
    #[error("Database corrupted: {details}")]
    DatabaseCorrupted { details: String },

    /// Database migration failed
    #[error("Migration failed: {version} - {reason}")]
    MigrationFailed { version: String, reason: String },

    /// Record not found in database
    #[error("Record not found: {entity} with {identifier}")]
    RecordNotFound { entity: String, identifier: String },

    // ===== File System Errors =====
    /// File not found
    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    /// Permission denied for file operation
    #[error("Permission denied: {operation} on {path}")]
    PermissionDenied { operation: String, path: PathBuf },

    /// General I/O error
    #[error("I/O error: {message}")]
    IoError {
        message: String,
        #[source]
        source: io::Error,
    },

    // ===== Host Errors =====
    /// Host application cannot be reached
    #[error("Host unavailable: {reason}")]
    HostUnavailable { reason: String },

    /// Host rejected or failed a request
    #[error("Host request {method} failed: {message}")]
    HostRequestFailed { method: String, message: String },

    /// Host has no item with the given identity
    #[error("Host item not found: {kind} {identifier}")]
    HostItemNotFound { kind: String, identifier: String },

    // ===== Favorites Errors =====
    /// Favorites file could not be parsed
    #[error("Favorites parse error: {reason}")]
    FavoritesParseError { reason: String },

    /// Favorite action is not acceptable
    #[error("Invalid favorite action: {action}")]
    InvalidFavoriteAction { action: String },

    // ===== Configuration Errors =====
    /// Invalid configuration
    #[error("Invalid configuration: {setting} = '{value}' ({reason})")]
    InvalidConfiguration {
        setting: String,
        value: String,
        reason: String,
    },

    // ===== Sync Transport Errors =====
    /// Cloud storage cannot be used
    #[error("Storage '{provider}' unavailable: {reason}")]
    StorageUnavailable { provider: String, reason: String },

    /// Sync authentication failed
    #[error("Sync authentication failed: {provider}")]
    SyncAuthFailed { provider: String },

    /// Broker publish/subscribe failure
    #[error("Broker error: {message}")]
    BrokerError { message: String },

    /// Payload could not be encoded or decoded
    #[error("Serialization error: {message}")]
    SerializationError { message: String },

    // ===== Generic Errors =====
    /// Generic internal error
    #[error("Internal error: {message}")]
    InternalError { message: String },

    /// Operation cancelled
    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    /// Invalid argument provided
    #[error("Invalid argument: {argument} - {reason}")]
    InvalidArgument { argument: String, reason: String },
}

impl AppError {
    /// Returns the severity level of this error
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::NetworkError { .. }
            | Self::NetworkTimeout { .. }
            | Self::ConnectionLost { .. }
            | Self::BrokerError { .. }
            | Self::HostUnavailable { .. } => ErrorSeverity::Recoverable,

            Self::HostRequestFailed { .. }
            | Self::HostItemNotFound { .. }
            | Self::FavoritesParseError { .. }
            | Self::InvalidFavoriteAction { .. }
            | Self::StorageUnavailable { .. }
            | Self::SerializationError { .. } => ErrorSeverity::Degraded,

            Self::DatabaseCorrupted { .. }
            | Self::MigrationFailed { .. }
            | Self::SyncAuthFailed { .. }
            | Self::InvalidConfiguration { .. } => ErrorSeverity::Fatal,

            _ => ErrorSeverity::Degraded,
        }
    }

    /// Returns the recommended recovery action for this error
    pub fn recovery_action(&self) -> RecoveryAction {
        match self {
            Self::ConnectionLost { .. } => RecoveryAction::RetryImmediate,

            Self::BrokerError { .. } | Self::HostUnavailable { .. } => {
                RecoveryAction::RetryWithBackoff
            }

            Self::NetworkError { .. }
            | Self::NetworkTimeout { .. }
            | Self::StorageUnavailable { .. } => RecoveryAction::RetryNextCycle,

            Self::DatabaseCorrupted { .. } | Self::MigrationFailed { .. } => {
                RecoveryAction::RecreateStore
            }

            Self::HostRequestFailed { .. }
            | Self::FavoritesParseError { .. }
            | Self::InvalidFavoriteAction { .. } => RecoveryAction::DisableFeature,

            _ => RecoveryAction::UserIntervention,
        }
    }

    /// Returns a user-friendly error message suitable for a one-time notice
    pub fn user_message(&self) -> String {
        match self {
            Self::NetworkError { .. } | Self::NetworkTimeout { .. } => {
                "Cannot reach cloud storage. Sync will retry on the next cycle.".to_string()
            }
            Self::ConnectionLost { .. } | Self::BrokerError { .. } => {
                "Lost connection to the sync broker. Reconnecting...".to_string()
            }
            Self::DatabaseCorrupted { .. } => {
                "The local sync database was damaged and has been reset. It will be rebuilt from the cloud copy.".to_string()
            }
            Self::SyncAuthFailed { provider } => {
                format!("{} rejected the sync credentials. Please check your access token.", provider)
            }
            Self::HostUnavailable { .. } => {
                "The media center is not reachable. Is remote control enabled?".to_string()
            }
            Self::InvalidConfiguration { setting, .. } => {
                format!("Invalid setting: {}. Please check your configuration.", setting)
            }
            Self::StorageUnavailable { provider, .. } => {
                format!("{} is currently unavailable.", provider)
            }
            _ => "An unexpected sync error occurred.".to_string(),
        }
    }

    /// Returns true if this error should be logged at ERROR level
    pub fn is_critical(&self) -> bool {
        self.severity() == ErrorSeverity::Fatal
    }

    /// Returns true if this error can be automatically retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.recovery_action(),
            RecoveryAction::RetryImmediate
                | RecoveryAction::RetryWithBackoff
                | RecoveryAction::RetryNextCycle
        )
    }

    /// Helper to create a network error from any error type
    pub fn network<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::NetworkError {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Helper to create a database error from any error type
    pub fn database<E: std::error::Error + Send + Sync + 'static>(
        message: impl Into<String>,
        source: E,
    ) -> Self {
        Self::DatabaseError {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Helper to create a host request error
    pub fn host(method: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HostRequestFailed {
            method: method.into(),
            message: message.into(),
        }
    }

    /// Helper to create an I/O error that remembers which path failed
    pub fn io_at(path: impl Into<PathBuf>, err: io::Error) -> Self {
        let path = path.into();
        match err.kind() {
            io::ErrorKind::NotFound => Self::FileNotFound { path },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                operation: "file operation".to_string(),
                path,
            },
            _ => Self::IoError {
                message: format!("{}: {}", path.display(), err),
                source: err,
            },
        }
    }
}

/// Convenience type alias for Results using AppError
pub type Result<T> = std::result::Result<T, AppError>;

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::FileNotFound {
                path: PathBuf::from("unknown"),
            },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied {
                operation: "file operation".to_string(),
                path: PathBuf::from("unknown"),
            },
            _ => Self::IoError {
                message: err.to_string(),
                source: err,
            },
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError {
            message: err.to_string(),
        }
    }
}
