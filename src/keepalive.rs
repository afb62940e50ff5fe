//! Staggered keepalive scheduler
//!
//! Keeps the cookies of pooled accounts fresh while respecting host
//! resource pressure. The scheduler owns no loop of its own: the
//! orchestrator invokes [`KeepaliveScheduler::keepalive_one_batch`]
//! during idle gaps so keepalive work interleaves with task work on
//! the same driver, and a keepalive that cannot take the account lock
//! immediately is skipped, never queued.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::account_lock::AccountLockRegistry;
use crate::auth::{self, classify_navigation};
use crate::coordinator::CoordinatorClient;
use crate::cookie_queue::CookieUploadQueue;
use crate::error::CollectorResult;
use crate::resource_monitor::{ResourceMonitor, ResourceState};
use crate::review_reply;
use crate::session_pool::SessionPool;
use crate::utils::constants::{KEEPALIVE_NAVIGATION_TIMEOUT_SECS, LIGHT_PAGE_PATH};
use crate::utils::timeout::with_page_timeout;

/// Pause between batches in a full sweep
const INTER_BATCH_PAUSE: Duration = Duration::from_secs(2);

/// Per-account keepalive bookkeeping
#[derive(Debug, Clone, Default)]
struct KeepaliveRecord {
    last_attempt: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
    cooldown_until: Option<DateTime<Utc>>,
}

/// Keepalive scheduler configuration
#[derive(Debug, Clone)]
pub struct KeepaliveConfig {
    pub interval: Duration,
    pub batch_size: usize,
    pub cooldown: Duration,
    pub portal_base_url: String,
}

/// Keepalive scheduler
pub struct KeepaliveScheduler {
    config: KeepaliveConfig,
    pool: Arc<SessionPool>,
    locks: Arc<AccountLockRegistry>,
    monitor: Arc<ResourceMonitor>,
    coordinator: Arc<CoordinatorClient>,
    queue: Arc<CookieUploadQueue>,
    records: DashMap<String, KeepaliveRecord>,
}

impl KeepaliveScheduler {
    #[must_use]
    pub fn new(
        config: KeepaliveConfig,
        pool: Arc<SessionPool>,
        locks: Arc<AccountLockRegistry>,
        monitor: Arc<ResourceMonitor>,
        coordinator: Arc<CoordinatorClient>,
        queue: Arc<CookieUploadQueue>,
    ) -> Self {
        Self {
            config,
            pool,
            locks,
            monitor,
            coordinator,
            queue,
            records: DashMap::new(),
        }
    }

    /// Keepalive one batch of due accounts. Returns how many accounts
    /// were refreshed. Refuses to run under resource pressure.
    pub async fn keepalive_one_batch(&self) -> usize {
        if !self.monitor.safe_for_keepalive().await {
            debug!("resource pressure, skipping keepalive batch");
            return 0;
        }

        let candidates = self.pool.keepalive_candidates().await;
        let due = self.select_due(&candidates, Utc::now(), self.config.batch_size);
        if due.is_empty() {
            return 0;
        }

        let mut refreshed = 0;
        for account in due {
            if self.keepalive_one(&account).await {
                refreshed += 1;
            }
        }
        refreshed
    }

    /// Sweep every pooled account in batches with pauses, re-checking
    /// the resource monitor between accounts and aborting early on
    /// WARNING or CRITICAL.
    pub async fn keepalive_all(&self) -> usize {
        let candidates = self.pool.keepalive_candidates().await;
        let due = self.select_due(&candidates, Utc::now(), usize::MAX);
        if due.is_empty() {
            return 0;
        }
        info!(due = due.len(), "full keepalive sweep");

        let mut refreshed = 0;
        for (i, account) in due.iter().enumerate() {
            if self.monitor.classify().await != ResourceState::Normal {
                warn!(done = i, total = due.len(), "aborting keepalive sweep under pressure");
                break;
            }
            if self.keepalive_one(account).await {
                refreshed += 1;
            }
            if (i + 1) % self.config.batch_size == 0 {
                tokio::time::sleep(INTER_BATCH_PAUSE).await;
            }
        }
        refreshed
    }

    /// Accounts due for keepalive: `last_keepalive` older than the
    /// interval, not in cooldown, oldest first, at most `limit`.
    fn select_due(
        &self,
        candidates: &[(String, DateTime<Utc>)],
        now: DateTime<Utc>,
        limit: usize,
    ) -> Vec<String> {
        let interval =
            chrono::Duration::from_std(self.config.interval).unwrap_or(chrono::Duration::hours(1));
        let mut due: Vec<(String, DateTime<Utc>)> = candidates
            .iter()
            .filter(|(account, last_keepalive)| {
                if now - *last_keepalive < interval {
                    return false;
                }
                match self.records.get(account) {
                    Some(record) => record
                        .cooldown_until
                        .is_none_or(|until| until <= now),
                    None => true,
                }
            })
            .cloned()
            .collect();
        due.sort_by_key(|(_, last_keepalive)| *last_keepalive);
        due.truncate(limit);
        due.into_iter().map(|(account, _)| account).collect()
    }

    /// Keepalive one account. Returns true on a successful refresh.
    async fn keepalive_one(&self, account: &str) -> bool {
        // A task holding the lock will refresh cookies anyway
        let Some(_guard) = self.locks.try_acquire(account) else {
            return false;
        };
        self.records.entry(account.to_string()).or_default().last_attempt = Some(Utc::now());

        match self.refresh(account).await {
            Ok(()) => {
                if let Some(mut record) = self.records.get_mut(account) {
                    record.last_success = Some(Utc::now());
                    record.cooldown_until = None;
                }
                true
            }
            Err(e) => {
                warn!(account = account, error = %e, "keepalive failed, cooling down");
                let until = Utc::now()
                    + chrono::Duration::from_std(self.config.cooldown)
                        .unwrap_or(chrono::Duration::minutes(10));
                self.records.entry(account.to_string()).or_default().cooldown_until = Some(until);
                false
            }
        }
    }

    async fn refresh(&self, account: &str) -> CollectorResult<()> {
        let Some(handle) = self.pool.probe_context(account).await? else {
            // Candidate vanished between selection and lock; nothing to
            // keep alive
            return Ok(());
        };

        let url = format!("{}{LIGHT_PAGE_PATH}", self.config.portal_base_url);
        with_page_timeout(
            async {
                handle.page.goto(url.as_str()).await?;
                Ok(())
            },
            KEEPALIVE_NAVIGATION_TIMEOUT_SECS,
            "keepalive navigation",
        )
        .await?;

        let final_url = handle.page.url().await?.unwrap_or_default();
        let body_len = handle.page.content().await.map(|c| c.len()).unwrap_or(0);

        if let Some(signal) = classify_navigation(&final_url, body_len) {
            // Keepalive is not a task: no re-login here, just report
            // the dead login and drop the context
            warn!(account = account, signal = %signal, "keepalive found login gone");
            if let Err(e) = self.coordinator.report_account_invalid(account).await {
                warn!(account = account, error = %e, "account-invalid report failed");
            }
            self.pool.remove_context(account).await;
            return Err(crate::error::CollectorError::AuthInvalid {
                account: account.to_string(),
                detail: signal.to_string(),
            });
        }

        let cookies = auth::read_page_cookies(&handle.page).await?;
        // Envelope first, then advance last_keepalive: a crash between
        // the two re-runs keepalive rather than losing the snapshot
        self.queue.put(account, cookies.clone());
        self.pool.note_keepalive(account, cookies).await;
        debug!(account = account, "keepalive refreshed cookies");

        // Opportunistic: answer any reviews the backend queued for us
        if let Err(e) = review_reply::process_pending(&self.coordinator, &handle.page, account).await
        {
            debug!(account = account, error = %e, "pending review replies unavailable");
        }
        let signature = crate::portal::synthesize_signature(
            &auth::read_page_cookies(&handle.page).await.unwrap_or_default(),
        );
        match review_reply::unread_message_count(&handle.page, &signature).await {
            Ok(unread) if unread > 0 => {
                info!(account = account, unread = unread, "portal message centre has unread items");
            }
            Ok(_) => {}
            Err(e) => debug!(account = account, error = %e, "message centre unavailable"),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource_monitor::Thresholds;

    fn scheduler() -> KeepaliveScheduler {
        let pool = Arc::new(SessionPool::new(crate::session_pool::PoolConfig {
            max_processes: 1,
            max_contexts_per_process: 1,
            headless: true,
            idle_timeout: Duration::from_secs(3600),
            daily_restart_hour: 4,
            active_context_cap: 4,
            state_dir: std::env::temp_dir(),
            cookie_domain: ".dianping.com".into(),
        }));
        let monitor = Arc::new(ResourceMonitor::new(
            Thresholds { warning: 50.0, critical: 70.0 },
            Thresholds { warning: 60.0, critical: 80.0 },
            Duration::from_secs(30),
        ));
        let coordinator =
            Arc::new(CoordinatorClient::new("http://127.0.0.1:1").expect("client builds"));
        let queue = Arc::new(CookieUploadQueue::start(
            4,
            1,
            Duration::from_millis(50),
            |_env| async { Ok(()) },
        ));
        KeepaliveScheduler::new(
            KeepaliveConfig {
                interval: Duration::from_secs(3600),
                batch_size: 2,
                cooldown: Duration::from_secs(600),
                portal_base_url: "https://e.dianping.com".into(),
            },
            pool,
            Arc::new(AccountLockRegistry::new()),
            monitor,
            coordinator,
            queue,
        )
    }

    #[tokio::test]
    async fn select_due_honours_interval_cooldown_and_batch() {
        let scheduler = scheduler();
        let now = Utc::now();

        // C is in cooldown for another five minutes
        scheduler.records.insert(
            "C".to_string(),
            KeepaliveRecord {
                cooldown_until: Some(now + chrono::Duration::minutes(5)),
                ..Default::default()
            },
        );

        let candidates = vec![
            ("A".to_string(), now - chrono::Duration::minutes(70)),
            ("B".to_string(), now - chrono::Duration::minutes(30)),
            ("C".to_string(), now - chrono::Duration::minutes(90)),
        ];

        // Batch of 2: A is due, B is not, C is cooling down
        let due = scheduler.select_due(&candidates, now, 2);
        assert_eq!(due, vec!["A".to_string()]);
    }

    #[tokio::test]
    async fn select_due_orders_oldest_first_and_truncates() {
        let scheduler = scheduler();
        let now = Utc::now();
        let candidates = vec![
            ("A".to_string(), now - chrono::Duration::minutes(70)),
            ("B".to_string(), now - chrono::Duration::minutes(240)),
            ("C".to_string(), now - chrono::Duration::minutes(90)),
        ];

        let due = scheduler.select_due(&candidates, now, 2);
        assert_eq!(due, vec!["B".to_string(), "C".to_string()]);
    }

    #[tokio::test]
    async fn expired_cooldown_is_due_again() {
        let scheduler = scheduler();
        let now = Utc::now();
        scheduler.records.insert(
            "A".to_string(),
            KeepaliveRecord {
                cooldown_until: Some(now - chrono::Duration::minutes(1)),
                ..Default::default()
            },
        );
        let candidates = vec![("A".to_string(), now - chrono::Duration::minutes(70))];
        let due = scheduler.select_due(&candidates, now, 2);
        assert_eq!(due, vec!["A".to_string()]);
    }

    #[tokio::test]
    async fn empty_pool_batch_is_zero() {
        let scheduler = scheduler();
        // No pooled accounts: batch does nothing regardless of monitor
        let candidates = scheduler.pool.keepalive_candidates().await;
        assert!(candidates.is_empty());
        let due = scheduler.select_due(&candidates, Utc::now(), 2);
        assert!(due.is_empty());
    }
}
