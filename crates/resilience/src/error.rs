// crates/resilience/src/error.rs
//! Error types for resilience operations

use thiserror::Error;

/// Result type for resilience operations
pub type ResilienceResult<T> = Result<T, ResilienceError>;

/// Errors that can occur in resilience operations
#[derive(Debug, Error)]
pub enum ResilienceError {
    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// All retry attempts exhausted
    #[error("All {attempts} retry attempts exhausted: {last_error}")]
    RetriesExhausted { attempts: usize, last_error: String },

    /// Circuit breaker is open
    #[error(
        "Circuit breaker is open (failures: {failures}, last failure: {last_failure_ago:?} ago)"
    )]
    CircuitBreakerOpen {
        failures: usize,
        last_failure_ago: std::time::Duration,
    },

    /// Operation failed inside a guarded call
    #[error("{0}")]
    Failed(String),
}

impl ResilienceError {
    /// Returns true for errors that say nothing about the remote side
    pub fn is_local_guard(&self) -> bool {
        matches!(self, Self::CircuitBreakerOpen { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_error() {
        let err = ResilienceError::Timeout(std::time::Duration::from_secs(5));
        assert!(err.to_string().contains("timed out"));
        assert!(err.to_string().contains("5s"));
    }

    #[test]
    fn test_retries_exhausted_error() {
        let err = ResilienceError::RetriesExhausted {
            attempts: 3,
            last_error: "connection refused".to_string(),
        };
        assert!(err.to_string().contains("3"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_circuit_breaker_error() {
        let err = ResilienceError::CircuitBreakerOpen {
            failures: 5,
            last_failure_ago: std::time::Duration::from_secs(10),
        };
        assert!(err.to_string().contains("Circuit breaker"));
        assert!(err.is_local_guard());
        assert!(!ResilienceError::Failed("x".into()).is_local_guard());
    }
}
