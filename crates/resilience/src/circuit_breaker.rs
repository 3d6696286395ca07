// crates/resilience/src/circuit_breaker.rs
//! Circuit breaker pattern implementation

use crate::error::{ResilienceError, ResilienceResult};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, requests are rejected
    Open,
    /// Circuit is half-open, testing if service recovered
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of failures before opening the circuit
    failure_threshold: usize,
    /// How long the circuit stays open before a trial request is let through
    cooldown: Duration,
    /// Number of successful requests needed to close from half-open
    success_threshold: usize,
}

impl CircuitBreakerConfig {
    /// Creates a new configuration
    pub fn new(failure_threshold: usize, cooldown: Duration) -> Self {
        Self {
            failure_threshold,
            cooldown,
            success_threshold: 2,
        }
    }

    /// Sets the success threshold
    pub fn with_success_threshold(mut self, threshold: usize) -> Self {
        self.success_threshold = threshold;
        self
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}

/// Circuit breaker state
#[derive(Debug)]
struct CircuitBreakerState {
    state: CircuitState,
    failure_count: usize,
    success_count: usize,
    last_failure_time: Option<Instant>,
}

/// Circuit breaker implementation
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Arc<Mutex<CircuitBreakerState>>,
}

impl CircuitBreaker {
    /// Creates a new circuit breaker
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(CircuitBreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
            })),
        }
    }

    /// Gets the current state
    pub fn state(&self) -> CircuitState {
        self.state.lock().map(|s| s.state).unwrap_or(CircuitState::Open)
    }

    /// Records a successful operation
    pub fn record_success(&self) {
        if let Ok(mut state) = self.state.lock() {
            match state.state {
                CircuitState::HalfOpen => {
                    state.success_count += 1;
                    if state.success_count >= self.config.success_threshold {
                        state.state = CircuitState::Closed;
                        state.failure_count = 0;
                        state.success_count = 0;
                    }
                }
                CircuitState::Closed => {
                    state.failure_count = 0;
                }
                CircuitState::Open => {}
            }
        }
    }

    /// Records a failed operation
    ///
    /// A failed trial request in half-open state reopens the circuit at once.
    pub fn record_failure(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.failure_count += 1;
            state.last_failure_time = Some(Instant::now());
            state.success_count = 0;

            if state.state == CircuitState::HalfOpen
                || state.failure_count >= self.config.failure_threshold
            {
                if state.state != CircuitState::Open {
                    log::warn!(
                        "Circuit opened after {} consecutive failures",
                        state.failure_count
                    );
                }
                state.state = CircuitState::Open;
            }
        }
    }

    /// Checks if a request can proceed
    pub fn can_proceed(&self) -> ResilienceResult<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| ResilienceError::Failed("circuit breaker lock poisoned".to_string()))?;

        match state.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                if let Some(last_failure) = state.last_failure_time {
                    if last_failure.elapsed() >= self.config.cooldown {
                        state.state = CircuitState::HalfOpen;
                        state.success_count = 0;
                        Ok(())
                    } else {
                        Err(ResilienceError::CircuitBreakerOpen {
                            failures: state.failure_count,
                            last_failure_ago: last_failure.elapsed(),
                        })
                    }
                } else {
                    Err(ResilienceError::CircuitBreakerOpen {
                        failures: state.failure_count,
                        last_failure_ago: Duration::from_secs(0),
                    })
                }
            }
        }
    }

    /// Executes an async operation through the circuit breaker
    pub async fn call<F, T, E>(&self, operation: F) -> ResilienceResult<T>
    where
        F: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.can_proceed()?;

        match operation.await {
            Ok(result) => {
                self.record_success();
                Ok(result)
            }
            Err(e) => {
                self.record_failure();
                Err(ResilienceError::Failed(e.to_string()))
            }
        }
    }

    /// Resets the circuit breaker to closed state
    pub fn reset(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.state = CircuitState::Closed;
            state.failure_count = 0;
            state.success_count = 0;
            state.last_failure_time = None;
        }
    }
}
