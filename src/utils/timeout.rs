//! Timeout utilities for page operations
//!
//! Async timeout wrappers to prevent indefinite hangs during page
//! navigation and other browser operations.

use std::future::Future;
use std::time::Duration;

use crate::error::{CollectorError, CollectorResult};

/// Wrap an async page operation with an explicit timeout.
///
/// Returns the operation's own error when it fails in time, and a
/// `ContextDeath`-neutral timeout error otherwise so the caller can
/// distinguish a slow page from a dead one.
pub async fn with_page_timeout<F, T>(
    operation: F,
    timeout_secs: u64,
    operation_name: &str,
) -> CollectorResult<T>
where
    F: Future<Output = CollectorResult<T>>,
{
    match tokio::time::timeout(Duration::from_secs(timeout_secs), operation).await {
        Ok(result) => result,
        Err(_) => Err(CollectorError::Other(format!(
            "{operation_name} timeout after {timeout_secs} seconds"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_fast_results() {
        let result = with_page_timeout(async { Ok(7u32) }, 5, "probe").await;
        assert_eq!(result.expect("fast op should pass"), 7);
    }

    #[tokio::test]
    async fn times_out_slow_operations() {
        let result: CollectorResult<()> = with_page_timeout(
            async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            },
            1,
            "navigation",
        )
        .await;

        let err = result.expect_err("should time out");
        assert!(err.to_string().contains("navigation timeout"));
    }
}
