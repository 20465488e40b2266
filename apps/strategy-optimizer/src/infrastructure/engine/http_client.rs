//! HTTP client wrapper with retry logic.

use std::time::Duration;

use rand::Rng;
use reqwest::{Client, Method, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::api_types::EngineErrorResponse;
use crate::application::ports::EngineError;
use crate::config::{EngineConfig, RetryConfig};

/// Whether a failed request may be sent again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Replay {
    /// Safe to repeat: transport failures, 408, 429 and 5xx are retried.
    Always,
    /// Creates something on the engine. Retried only when the engine cannot
    /// have acted on it: connection refused, 429 or 503.
    IfUnprocessed,
}

impl Replay {
    fn retries_transport_error(self, err: &reqwest::Error) -> bool {
        match self {
            Self::Always => true,
            Self::IfUnprocessed => err.is_connect(),
        }
    }

    const fn retries_status(self, status: StatusCode) -> bool {
        match categorize_status(status) {
            ErrorCategory::RateLimited => true,
            ErrorCategory::Retryable => match self {
                Self::Always => true,
                Self::IfUnprocessed => status.as_u16() == 503,
            },
            ErrorCategory::NonRetryable => false,
        }
    }
}

/// HTTP client for the backtest engine API with retry logic.
///
/// Paths are given as segments and percent-encoded onto the base URL.
#[derive(Debug, Clone)]
pub struct EngineHttpClient {
    client: Client,
    base_url: Url,
    api_token: Option<String>,
    retry_config: RetryConfig,
}

impl EngineHttpClient {
    /// Create a new HTTP client from config.
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            EngineError::Network(format!("invalid engine base url {}: {e}", config.base_url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(EngineError::Network(format!(
                "engine base url {} cannot take a path",
                config.base_url
            )));
        }

        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| EngineError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            api_token: config.bearer_token().map(str::to_string),
            retry_config: config.retry.clone(),
        })
    }

    /// Make a GET request.
    pub async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, EngineError> {
        self.request(Method::GET, segments, None::<&()>, Replay::Always)
            .await
    }

    /// Make an idempotent POST request with an optional JSON body.
    pub async fn post<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        segments: &[&str],
        body: Option<&B>,
    ) -> Result<T, EngineError> {
        self.request(Method::POST, segments, body, Replay::Always)
            .await
    }

    /// Make a POST request that creates a resource.
    ///
    /// Not repeated once the engine may have received it, so a lost response
    /// never creates a second resource.
    pub async fn create<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> Result<T, EngineError> {
        self.request(Method::POST, segments, Some(body), Replay::IfUnprocessed)
            .await
    }

    fn url_for(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // Checked in `new`: the base URL can take a path.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Internal request implementation with retry logic.
    async fn request<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<&B>,
        replay: Replay,
    ) -> Result<T, EngineError> {
        let url = self.url_for(segments);
        let mut backoff = ExponentialBackoff::new(&self.retry_config);

        loop {
            let mut request = self.client.request(method.clone(), url.clone());
            if let Some(token) = &self.api_token {
                request = request.bearer_auth(token);
            }
            if let Some(b) = body {
                request = request.json(b);
            }

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    if !replay.retries_transport_error(&e) {
                        return Err(EngineError::Network(e.to_string()));
                    }
                    if let Some(delay) = backoff.next_backoff() {
                        tracing::warn!(
                            error = %e,
                            %url,
                            delay_ms = delay.as_millis(),
                            attempt = backoff.attempt,
                            "Engine unreachable, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    if backoff.attempt <= 1 {
                        return Err(EngineError::Network(e.to_string()));
                    }
                    return Err(EngineError::MaxRetriesExceeded {
                        attempts: backoff.attempt,
                    });
                }
            };

            let status = response.status();

            if status.is_success() {
                let text = response
                    .text()
                    .await
                    .map_err(|e| EngineError::Network(e.to_string()))?;
                let text = if text.trim().is_empty() { "null" } else { &text };
                return serde_json::from_str(text).map_err(|e| EngineError::Decode(e.to_string()));
            }

            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());

            let error_body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<EngineErrorResponse>(&error_body)
                .map_or(error_body, |err| err.message);

            if !replay.retries_status(status) {
                return Err(EngineError::Http {
                    status: status.as_u16(),
                    message,
                });
            }

            let delay = backoff.next_backoff().map(|delay| {
                retry_after
                    .map(Duration::from_secs)
                    .map_or(delay, |hint| hint.min(backoff.max_backoff))
            });
            if let Some(delay) = delay {
                tracing::warn!(
                    status = status.as_u16(),
                    %message,
                    %url,
                    delay_ms = delay.as_millis(),
                    attempt = backoff.attempt,
                    "Retryable engine error, retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }
            if backoff.attempt <= 1 {
                return Err(EngineError::Http {
                    status: status.as_u16(),
                    message,
                });
            }
            return Err(EngineError::MaxRetriesExceeded {
                attempts: backoff.attempt,
            });
        }
    }
}

/// Error category for determining retry behavior.
enum ErrorCategory {
    RateLimited,
    Retryable,
    NonRetryable,
}

/// Categorize HTTP status code for retry handling.
const fn categorize_status(status: StatusCode) -> ErrorCategory {
    match status.as_u16() {
        429 => ErrorCategory::RateLimited,
        408 | 500..=599 => ErrorCategory::Retryable,
        _ => ErrorCategory::NonRetryable,
    }
}

/// Exponential backoff calculator with proportional jitter.
///
/// `attempt` counts requests made so far; `max_retries` retries follow the
/// first request.
struct ExponentialBackoff {
    attempt: u32,
    max_retries: u32,
    current_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
    jitter: f64,
}

impl ExponentialBackoff {
    fn new(config: &RetryConfig) -> Self {
        Self {
            attempt: 0,
            max_retries: config.max_retries,
            current_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            multiplier: config.multiplier.max(1.0),
            jitter: config.jitter.clamp(0.0, 1.0),
        }
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt > self.max_retries {
            return None;
        }

        let backoff = self.current_backoff;
        self.current_backoff = Duration::from_secs_f64(
            (self.current_backoff.as_secs_f64() * self.multiplier)
                .min(self.max_backoff.as_secs_f64()),
        );

        Some(self.jittered(backoff))
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let factor = rand::rng().random_range(-self.jitter..=self.jitter);
        Duration::from_secs_f64((delay.as_secs_f64() * (1.0 + factor)).max(0.0))
    }
}
