//! Retry helper for transient network failures
//!
//! Exponential backoff with jitter. Retryability is decided by error
//! type via [`CollectorError::is_transient`], never by message matching.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::{CollectorError, CollectorResult, RetryConfig};

/// Retry an operation with exponential backoff and jitter.
///
/// Only errors classified transient by [`CollectorError::is_transient`]
/// are retried; everything else returns immediately. The base delay
/// doubles per attempt (initial 2 s, cap 60 s) and up to 25 % of the
/// base is added as jitter so a fleet of hosts does not retry in step.
pub async fn retry_with_backoff<F, Fut, T>(
    config: &RetryConfig,
    op_name: &str,
    mut operation: F,
) -> CollectorResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CollectorResult<T>>,
{
    let mut attempt = 0u32;

    loop {
        let result = operation().await;
        match result {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(op = op_name, attempt = attempt + 1, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                if !e.is_transient() {
                    return Err(e);
                }

                attempt += 1;
                if attempt >= config.max_attempts {
                    tracing::error!(
                        op = op_name,
                        attempts = attempt,
                        error = %e,
                        "max retry attempts exceeded"
                    );
                    return Err(e);
                }

                let base = config.delay_for_attempt(attempt);
                let jitter_ms = rand::rng().random_range(0..=base.as_millis() as u64 / 4);
                let delay = base + Duration::from_millis(jitter_ms);

                tracing::warn!(
                    op = op_name,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient error, retrying after delay"
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}
