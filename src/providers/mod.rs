//! External service boundary: recommendation backend, calendar, and
//! document store.
//!
//! The engine and negotiator only see the traits defined here; concrete
//! clients (Google Calendar and Docs via direct HTTP) live in submodules.
//! Tests substitute in-memory fakes.

pub mod google;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{BusyInterval, CreatedDocument, CreatedEvent, SuggestedAction, SuggestionContext};

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Token expired or revoked")]
    AuthExpired,
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    /// The destination time is no longer free. The load-bearing
    /// discriminator the negotiator branches on.
    #[error("{message}")]
    Conflict { message: String },
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProviderError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ProviderError::Conflict { .. })
    }
}

/// Produces ranked suggestion candidates from behavioral context.
#[async_trait]
pub trait RecommendationService: Send + Sync {
    async fn select_next_actions(
        &self,
        context: &SuggestionContext,
    ) -> Result<Vec<SuggestedAction>, ProviderError>;
}

/// Read and write access to the user's calendar.
#[async_trait]
pub trait CalendarService: Send + Sync {
    /// Busy intervals overlapping `[window_start, window_end)`. Callers
    /// must fetch fresh before every conflict check.
    async fn list_busy_intervals(
        &self,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>, ProviderError>;

    async fn create_event(
        &self,
        start: DateTime<Utc>,
        duration_minutes: u32,
        title: &str,
        description: &str,
    ) -> Result<CreatedEvent, ProviderError>;
}

/// Journal document storage.
#[async_trait]
pub trait DocumentService: Send + Sync {
    async fn create_journal_document(
        &self,
        title: &str,
        prompt: &str,
    ) -> Result<CreatedDocument, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            max_backoff_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryDecision {
    Retryable,
    NonRetryable,
}

fn retry_decision_for_status(status: reqwest::StatusCode) -> RetryDecision {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        RetryDecision::Retryable
    } else {
        RetryDecision::NonRetryable
    }
}

fn retry_delay(
    attempt: u32,
    policy: &RetryPolicy,
    retry_after: Option<&reqwest::header::HeaderValue>,
) -> Duration {
    if let Some(value) = retry_after.and_then(|v| v.to_str().ok()) {
        if let Ok(secs) = value.parse::<u64>() {
            return Duration::from_secs(secs.min(30));
        }
    }

    let exponent = 2u64.saturating_pow(attempt.saturating_sub(1));
    let base = policy
        .initial_backoff_ms
        .saturating_mul(exponent)
        .min(policy.max_backoff_ms);
    let jitter = (std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0))
        % 150;
    Duration::from_millis(base.saturating_add(jitter))
}

/// Send with exponential backoff on 429/408/5xx and transport errors.
/// Honors Retry-After when present, capped at 30 seconds.
pub async fn send_with_retry(
    request: reqwest::RequestBuilder,
    policy: &RetryPolicy,
) -> Result<reqwest::Response, ProviderError> {
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        let Some(cloned) = request.try_clone() else {
            return request.send().await.map_err(ProviderError::Http);
        };

        match cloned.send().await {
            Ok(response) => {
                let status = response.status();
                let decision = retry_decision_for_status(status);
                if decision == RetryDecision::Retryable && attempt < attempts {
                    let delay = retry_delay(
                        attempt,
                        policy,
                        response.headers().get(reqwest::header::RETRY_AFTER),
                    );
                    log::warn!(
                        "provider retry {}/{} after status {} (sleep {:?})",
                        attempt,
                        attempts,
                        status,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Ok(response);
            }
            Err(err) => {
                let retryable_transport = err.is_timeout() || err.is_connect();
                if retryable_transport && attempt < attempts {
                    let delay = retry_delay(attempt, policy, None);
                    log::warn!(
                        "provider retry {}/{} after transport error: {} (sleep {:?})",
                        attempt,
                        attempts,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Err(ProviderError::Http(err));
            }
        }
    }

    Err(ProviderError::Unavailable(
        "request exhausted retries".to_string(),
    ))
}
