//! Per-account mutual exclusion
//!
//! Maps account identifier to a mutex so that at most one of
//! {task, keepalive, re-login} touches a given account at a time.
//! Keepalive uses the non-blocking path and skips on contention; tasks
//! block with a deadline.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::{CollectorError, CollectorResult};

/// Registry of per-account locks
#[derive(Default)]
pub struct AccountLockRegistry {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// RAII guard for an acquired account lock
pub struct AccountLockGuard {
    account: String,
    _guard: OwnedMutexGuard<()>,
}

impl AccountLockGuard {
    #[must_use]
    pub fn account(&self) -> &str {
        &self.account
    }
}

impl AccountLockRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch or create the lock for an account. The registry map itself
    /// is only locked for the duration of the entry lookup.
    fn entry(&self, account: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(account.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Non-blocking acquisition. Returns `None` when the account is
    /// busy; keepalive callers skip rather than queue.
    #[must_use]
    pub fn try_acquire(&self, account: &str) -> Option<AccountLockGuard> {
        match self.entry(account).try_lock_owned() {
            Ok(guard) => Some(AccountLockGuard {
                account: account.to_string(),
                _guard: guard,
            }),
            Err(_) => {
                debug!(account = account, "account lock busy, skipping");
                None
            }
        }
    }

    /// Blocking acquisition with a deadline. Used by task execution,
    /// which must not wait unbounded on a stuck keepalive.
    pub async fn acquire(
        &self,
        account: &str,
        timeout: Duration,
    ) -> CollectorResult<AccountLockGuard> {
        let lock = self.entry(account);
        match tokio::time::timeout(timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(AccountLockGuard {
                account: account.to_string(),
                _guard: guard,
            }),
            Err(_) => Err(CollectorError::Other(format!(
                "timed out acquiring account lock for {account} after {timeout:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn try_acquire_skips_while_held() {
        let registry = AccountLockRegistry::new();

        let guard = registry.try_acquire("A1").expect("lock should be free");
        assert!(registry.try_acquire("A1").is_none());
        // Other accounts are unaffected
        assert!(registry.try_acquire("A2").is_some());

        drop(guard);
        assert!(registry.try_acquire("A1").is_some());
    }

    #[tokio::test]
    async fn acquire_times_out_when_held() {
        let registry = AccountLockRegistry::new();
        let _guard = registry.try_acquire("A1").expect("lock should be free");

        let result = registry.acquire("A1", Duration::from_millis(20)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn acquire_succeeds_after_release() {
        let registry = Arc::new(AccountLockRegistry::new());
        let guard = registry.try_acquire("A1").expect("lock should be free");

        let registry_clone = registry.clone();
        let waiter = tokio::spawn(async move {
            registry_clone
                .acquire("A1", Duration::from_secs(5))
                .await
                .expect("lock should become free")
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(guard);

        let acquired = waiter.await.expect("waiter should not panic");
        assert_eq!(acquired.account(), "A1");
    }
}
