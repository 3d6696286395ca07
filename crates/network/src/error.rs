// crates/network/src/error.rs
//! Error types for network operations

use cloudsync_core::AppError;
use thiserror::Error;

/// Result type for network operations
pub type NetworkResult<T> = Result<T, NetworkError>;

/// Errors that can occur during network operations
#[derive(Debug, Error)]
pub enum NetworkError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The server answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// A JSON-RPC call returned an error object
    #[error("{method} failed with code {code}: {message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },

    /// Response body was not what the API documents
    #[error("Unexpected response from {method}: {reason}")]
    UnexpectedResponse { method: String, reason: String },

    /// Broker client error
    #[error("Broker error: {0}")]
    Broker(String),

    /// No broker session is up
    #[error("Not connected to broker")]
    NotConnected,

    /// Timeout
    #[error("Operation timed out")]
    Timeout,

    /// Resilience error
    #[error("Resilience error: {0}")]
    Resilience(#[from] cloudsync_resilience::ResilienceError),

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl NetworkError {
    /// Returns true if the error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            NetworkError::Timeout | NetworkError::NotConnected | NetworkError::Http(_) => true,
            NetworkError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns the HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            NetworkError::Status { status, .. } => Some(*status),
            NetworkError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Returns true if the error is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        matches!(self.status(), Some(400..=499))
    }

    /// Returns true if the error is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        matches!(self.status(), Some(500..=599))
    }

    /// Returns true if the server rejected the credentials
    pub fn is_unauthorized(&self) -> bool {
        matches!(self.status(), Some(401 | 403))
    }
}

impl From<NetworkError> for AppError {
    fn from(err: NetworkError) -> Self {
        match err {
            NetworkError::Timeout => AppError::NetworkTimeout {
                operation: "request".to_string(),
                seconds: 0,
            },
            NetworkError::Resilience(cloudsync_resilience::ResilienceError::Timeout(d)) => {
                AppError::NetworkTimeout {
                    operation: "request".to_string(),
                    seconds: d.as_secs(),
                }
            }
            NetworkError::InvalidUrl(url) => AppError::InvalidUrl { url },
            NetworkError::Rpc {
                method,
                code,
                message,
            } => AppError::HostRequestFailed {
                method,
                message: format!("{} (code {})", message, code),
            },
            NetworkError::UnexpectedResponse { method, reason } => {
                AppError::HostRequestFailed {
                    method,
                    message: reason,
                }
            }
            NetworkError::Broker(message) => AppError::BrokerError { message },
            NetworkError::NotConnected => AppError::ConnectionLost {
                message: "broker session is down".to_string(),
            },
            NetworkError::Json(e) => AppError::SerializationError {
                message: e.to_string(),
            },
            NetworkError::Http(e) if e.is_timeout() => AppError::NetworkTimeout {
                operation: e
                    .url()
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| "request".to_string()),
                seconds: 0,
            },
            other => AppError::NetworkError {
                message: other.to_string(),
                source: Some(Box::new(other)),
            },
        }
    }
}
