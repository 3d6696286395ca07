// crates/resilience/src/lib.rs
//! Resilience patterns for talking to unreliable peers
//!
//! - Exponential backoff, both for retries and for broker reconnects
//! - Async timeouts around transport calls
//! - Circuit breaker for collaborators that stay down
//!
//! # Example
//!
//! ```rust
//! use cloudsync_resilience::{Backoff, CircuitBreaker, CircuitBreakerConfig, RetryPolicy};
//! use std::time::Duration;
//!
//! // Reconnect delays: 1s, 2s, 4s ... capped at 60s
//! let mut backoff = Backoff::new(
//!     RetryPolicy::unbounded()
//!         .with_initial_delay(Duration::from_secs(1))
//!         .with_max_delay(Duration::from_secs(60))
//!         .with_jitter(false),
//! );
//! assert_eq!(backoff.next_delay(), Duration::from_secs(1));
//!
//! // Circuit breaker
//! let cb = CircuitBreaker::new(CircuitBreakerConfig::new(5, Duration::from_secs(60)));
//! assert!(cb.can_proceed().is_ok());
//! ```

mod circuit_breaker;
mod error;
mod retry;
mod timeout;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use error::{ResilienceError, ResilienceResult};
pub use retry::{with_retry, Backoff, RetryPolicy};
pub use timeout::{with_timeout, Timeout};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_exports_accessible() {
        let _: RetryPolicy = RetryPolicy::default();
        let _: Backoff = Backoff::new(RetryPolicy::default());
        let _: CircuitBreakerConfig = CircuitBreakerConfig::default();
        let _: CircuitBreaker = CircuitBreaker::new(CircuitBreakerConfig::default());
        let _: Timeout = Timeout::new(std::time::Duration::from_secs(5));
    }
}
