//! Error types for collector operations
//!
//! This module defines the collector-wide error taxonomy with retry
//! classification. Transient network failures are the only errors the
//! backoff helper will retry; everything else surfaces to the task
//! callback or the pool.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for collector operations
pub type CollectorResult<T> = Result<T, CollectorError>;

/// Error types for collector operations
#[derive(Debug, Error)]
pub enum CollectorError {
    /// HTTP transport failure (timeouts, connection errors)
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status from a backend or portal endpoint
    #[error("HTTP status {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// Malformed input: empty account, ill-formed dates, unknown task name
    #[error("invalid input: {0}")]
    Validation(String),

    /// All browser slots full and all contexts occupied
    #[error("browser pool saturated: {0}")]
    PoolSaturated(String),

    /// Context or browser process died ("target closed" and friends)
    #[error("browser context lost: {0}")]
    ContextDeath(String),

    /// Download completed but the file is empty, truncated, or not a spreadsheet
    #[error("downloaded artifact invalid: {0}")]
    ArtifactInvalid(String),

    /// The account's cookies no longer authenticate against the portal
    #[error("login state invalid for account {account}: {detail}")]
    AuthInvalid { account: String, detail: String },

    /// Host resource pressure is critical; caller must back off the pool
    #[error("host resources critical")]
    ResourceCritical,

    /// Browser protocol failure
    #[error("browser protocol error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for CollectorError {
    fn from(error: anyhow::Error) -> Self {
        // {:#} preserves the full context chain
        CollectorError::Other(format!("{error:#}"))
    }
}

impl CollectorError {
    /// Check if the error is a transient network failure worth retrying.
    ///
    /// Matches the recoverable set: connect/read timeouts, connection
    /// errors, HTTP 5xx and HTTP 429. Auth invalidation, validation and
    /// pool errors are never retried by backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            CollectorError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            CollectorError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Check if the error indicates the hosting browser process is gone
    /// and the slot should be rebuilt before another attempt.
    #[must_use]
    pub fn is_target_closed(&self) -> bool {
        match self {
            CollectorError::ContextDeath(_) => true,
            CollectorError::Cdp(e) => {
                let msg = e.to_string().to_lowercase();
                msg.contains("target closed")
                    || msg.contains("session closed")
                    || msg.contains("connection closed")
                    || msg.contains("browser closed")
            }
            _ => false,
        }
    }

    /// Whether a task failing with this error should ask the coordinator
    /// to add a retry (`retry_add=1`). A dead cookie is not worth retrying.
    #[must_use]
    pub fn retry_add(&self) -> u8 {
        match self {
            CollectorError::AuthInvalid { .. } => 0,
            _ => 1,
        }
    }
}

/// Retry configuration for transient network failures
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (first try included)
    pub max_attempts: u32,
    /// Initial retry delay
    pub initial_delay: Duration,
    /// Backoff multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Maximum retry delay
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// Calculate the base delay for a given attempt number (1-based),
    /// before jitter is applied. Capped at `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let delay_ms = (self.initial_delay.as_millis() as f64 * multiplier) as u64;
        let delay = Duration::from_millis(delay_ms);

        if delay > self.max_delay {
            self.max_delay
        } else {
            delay
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_retryable_set() {
        let e = CollectorError::HttpStatus {
            status: 503,
            url: "http://backend/task/get".into(),
        };
        assert!(e.is_transient());

        let e = CollectorError::HttpStatus {
            status: 429,
            url: "http://backend/task/get".into(),
        };
        assert!(e.is_transient());

        let e = CollectorError::HttpStatus {
            status: 404,
            url: "http://backend/task/get".into(),
        };
        assert!(!e.is_transient());
    }

    #[test]
    fn auth_invalid_never_transient_and_no_retry_add() {
        let e = CollectorError::AuthInvalid {
            account: "A1".into(),
            detail: "redirected to login".into(),
        };
        assert!(!e.is_transient());
        assert_eq!(e.retry_add(), 0);

        let e = CollectorError::PoolSaturated("all slots full".into());
        assert_eq!(e.retry_add(), 1);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(60));
    }
}
