// crates/network/src/client.rs
//! HTTP client wrapper with resilience

use crate::error::{NetworkError, NetworkResult};
use reqwest::{Client as ReqwestClient, RequestBuilder, Response};
use serde::Serialize;
use std::time::Duration;
use cloudsync_resilience::{CircuitBreaker, CircuitBreakerConfig, RetryPolicy};

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Request timeout
    pub timeout: Duration,
    /// User agent string
    pub user_agent: String,
    /// Maximum redirects to follow
    pub max_redirects: usize,
    /// Retry policy
    pub retry_policy: Option<RetryPolicy>,
    /// Circuit breaker config
    pub circuit_breaker_config: Option<CircuitBreakerConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: format!("CloudSync/{}", env!("CARGO_PKG_VERSION")),
            max_redirects: 10,
            retry_policy: Some(RetryPolicy::new(3).with_initial_delay(Duration::from_millis(100))),
            circuit_breaker_config: Some(CircuitBreakerConfig::new(5, Duration::from_secs(60))),
        }
    }
}

impl ClientConfig {
    /// Configuration for calls that must not be repeated within a sync cycle
    pub fn single_attempt(timeout: Duration) -> Self {
        Self {
            timeout,
            retry_policy: None,
            ..Default::default()
        }
    }

    /// Sets the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// HTTP client with resilience features
#[derive(Clone)]
pub struct Client {
    inner: ReqwestClient,
    config: ClientConfig,
    circuit_breaker: Option<CircuitBreaker>,
}

impl Client {
    /// Creates a new client with default configuration
    pub fn new() -> NetworkResult<Self> {
        Self::with_config(ClientConfig::default())
    }

    /// Creates a new client with custom configuration
    pub fn with_config(config: ClientConfig) -> NetworkResult<Self> {
        let client = ReqwestClient::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(NetworkError::Http)?;

        let circuit_breaker = config
            .circuit_breaker_config
            .as_ref()
            .map(|cfg| CircuitBreaker::new(cfg.clone()));

        Ok(Self {
            inner: client,
            config,
            circuit_breaker,
        })
    }

    /// Returns the configured request timeout
    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    /// Performs a GET request
    pub async fn get(&self, url: &str) -> NetworkResult<Response> {
        self.send(|http| http.get(url)).await
    }

    /// Performs a POST request with a JSON body
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
    ) -> NetworkResult<Response> {
        self.send(|http| http.post(url).json(body)).await
    }

    /// Sends a request built by `build`, rebuilding it for every attempt
    ///
    /// Any non-success status becomes `NetworkError::Status` with the body
    /// text, so callers can inspect API error payloads.
    pub async fn send<F>(&self, build: F) -> NetworkResult<Response>
    where
        F: Fn(&ReqwestClient) -> RequestBuilder,
    {
        self.request(|| build(&self.inner).send()).await
    }

    /// Internal request handler with resilience
    async fn request<F, Fut>(&self, request_fn: F) -> NetworkResult<Response>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<Response, reqwest::Error>>,
    {
        // Check circuit breaker
        if let Some(cb) = &self.circuit_breaker {
            cb.can_proceed()?;
        }

        let mut attempts = 0;
        let max_attempts = self
            .config
            .retry_policy
            .as_ref()
            .map(|p| p.max_attempts())
            .unwrap_or(1);

        loop {
            attempts += 1;

            match request_fn().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        if let Some(cb) = &self.circuit_breaker {
                            cb.record_success();
                        }
                        return Ok(response);
                    }

                    let body = response.text().await.unwrap_or_default();
                    let error = NetworkError::Status {
                        status: status.as_u16(),
                        body,
                    };

                    // A 4xx answer means the service is reachable
                    if status.is_client_error() {
                        if let Some(cb) = &self.circuit_breaker {
                            cb.record_success();
                        }
                        return Err(error);
                    }

                    if let Some(cb) = &self.circuit_breaker {
                        cb.record_failure();
                    }

                    if attempts < max_attempts {
                        if let Some(policy) = &self.config.retry_policy {
                            let delay = policy.delay_for_attempt(attempts);
                            log::debug!("HTTP {} on attempt {}, retrying in {:?}", status, attempts, delay);
                            tokio::time::sleep(delay).await;
                        }
                        continue;
                    }

                    return Err(error);
                }
                Err(e) => {
                    if let Some(cb) = &self.circuit_breaker {
                        cb.record_failure();
                    }

                    if attempts < max_attempts {
                        if let Some(policy) = &self.config.retry_policy {
                            let delay = policy.delay_for_attempt(attempts);
                            log::debug!("Request failed on attempt {}: {}, retrying in {:?}", attempts, e, delay);
                            tokio::time::sleep(delay).await;
                        }
                        continue;
                    }

                    if e.is_timeout() {
                        return Err(NetworkError::Timeout);
                    }
                    return Err(NetworkError::Http(e));
                }
            }
        }
    }
}
