//! Browser session pool
//!
//! Owns a fixed upper bound of browser processes, each hosting a
//! bounded number of isolated per-account contexts. Creates, reuses,
//! health-checks and recycles them; persists a snapshot of accounts
//! with their cookies across restarts; performs a scheduled daily
//! restart.
//!
//! Locking: one pool mutex. High-level operations take it once and
//! call `*_locked` helpers that assume it is held; helpers never
//! re-acquire. Context handles returned to callers are used outside
//! the pool lock, under the caller's account lock.

mod launch;
mod snapshot;

pub use snapshot::{AccountStorageState, PoolSnapshot, SnapshotEntry};

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams,
};
use chromiumoxide::page::Page;
use chrono::{DateTime, Local, NaiveDate, Timelike, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::CollectorConfig;
use crate::error::{CollectorError, CollectorResult};

use launch::{BrowserHandle, launch_browser};

/// Pool configuration, extracted from the daemon config
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_processes: usize,
    pub max_contexts_per_process: usize,
    pub headless: bool,
    pub idle_timeout: Duration,
    pub daily_restart_hour: u32,
    pub active_context_cap: usize,
    pub state_dir: PathBuf,
    /// Domain cookies are installed under, derived from the portal URL
    pub cookie_domain: String,
}

impl PoolConfig {
    #[must_use]
    pub fn from_config(config: &CollectorConfig) -> Self {
        Self {
            max_processes: config.max_processes(),
            max_contexts_per_process: config.max_contexts_per_process(),
            headless: config.headless(),
            idle_timeout: config.idle_timeout(),
            daily_restart_hour: config.daily_restart_hour(),
            active_context_cap: config.active_context_cap(),
            state_dir: config.state_dir().to_path_buf(),
            cookie_domain: derive_cookie_domain(config.portal_base_url()),
        }
    }
}

/// What callers receive from the pool: the account's single page.
///
/// Cheap to clone; the pool keeps the authoritative record.
#[derive(Debug, Clone)]
pub struct ContextHandle {
    pub account: String,
    pub page: Page,
}

/// One browser process in its fixed slot
struct ProcessSlot {
    handle: BrowserHandle,
    context_count: usize,
    healthy: bool,
}

enum Slot {
    Empty,
    Running(ProcessSlot),
}

/// Per-account context record, owned by the pool
struct AccountContext {
    account: String,
    process_index: usize,
    context_id: BrowserContextId,
    page: Page,
    cookies: HashMap<String, String>,
    created_at: DateTime<Utc>,
    last_used: DateTime<Utc>,
    last_keepalive: DateTime<Utc>,
}

struct PoolInner {
    slots: Vec<Slot>,
    contexts: HashMap<String, AccountContext>,
    last_restart_date: Option<NaiveDate>,
}

/// Browser session pool
pub struct SessionPool {
    config: PoolConfig,
    inner: Mutex<PoolInner>,
}

impl SessionPool {
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        let slots = (0..config.max_processes).map(|_| Slot::Empty).collect();
        Self {
            config,
            inner: Mutex::new(PoolInner {
                slots,
                contexts: HashMap::new(),
                last_restart_date: None,
            }),
        }
    }

    /// Get or create the context for an account.
    ///
    /// An existing context that passes the health probe is reused with
    /// its `last_used` bumped. Otherwise the stale record is closed, a
    /// process is chosen least-loaded-first (rebuilding unhealthy
    /// slots in place), a fresh context is created and the supplied
    /// cookies (or the last known set) are installed. A "target
    /// closed" failure rebuilds the slot and retries once.
    pub async fn get_context(
        &self,
        account: &str,
        cookies: Option<HashMap<String, String>>,
    ) -> CollectorResult<ContextHandle> {
        let mut inner = self.inner.lock().await;
        let mut install_cookies = cookies;

        if inner.contexts.contains_key(account) {
            let healthy = match inner.contexts.get(account) {
                Some(record) => probe_page(&record.page).await,
                None => false,
            };
            if healthy {
                if let Some(record) = inner.contexts.get_mut(account) {
                    record.last_used = Utc::now();
                    debug!(account = account, "reusing pooled context");
                    return Ok(ContextHandle {
                        account: account.to_string(),
                        page: record.page.clone(),
                    });
                }
            }
            // Keep the stale record's cookies as the fallback set
            if install_cookies.is_none() {
                install_cookies = inner.contexts.get(account).map(|r| r.cookies.clone());
            }
            warn!(account = account, "pooled context failed probe, recreating");
            Self::close_record_locked(&mut inner, account).await;
        }

        let cookies = install_cookies.unwrap_or_default();

        let mut last_error = None;
        for attempt in 0..2 {
            match Self::create_context_locked(&mut inner, &self.config, account, &cookies).await {
                Ok(handle) => return Ok(handle),
                Err(e) if e.is_target_closed() && attempt == 0 => {
                    warn!(account = account, error = %e, "target closed during context creation, rebuilding slot");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            CollectorError::ContextDeath("context creation failed twice".into())
        }))
    }

    /// Close and forget the context for an account. Safe to call when
    /// the account is not pooled.
    pub async fn remove_context(&self, account: &str) {
        let mut inner = self.inner.lock().await;
        Self::close_record_locked(&mut inner, account).await;
    }

    /// Probe the existing context for an account without creating one.
    ///
    /// `Ok(None)` when the account is not pooled; `Err(ContextDeath)`
    /// when the context failed the probe and has been removed.
    pub async fn probe_context(&self, account: &str) -> CollectorResult<Option<ContextHandle>> {
        let mut inner = self.inner.lock().await;
        let Some(record) = inner.contexts.get(account) else {
            return Ok(None);
        };
        if probe_page(&record.page).await {
            let page = record.page.clone();
            if let Some(record) = inner.contexts.get_mut(account) {
                record.last_used = Utc::now();
            }
            Ok(Some(ContextHandle {
                account: account.to_string(),
                page,
            }))
        } else {
            Self::close_record_locked(&mut inner, account).await;
            Err(CollectorError::ContextDeath(format!(
                "context for {account} failed health probe"
            )))
        }
    }

    /// Close contexts idle beyond the timeout, oldest first; also
    /// sweeps dead processes.
    pub async fn release_idle_contexts(&self) -> usize {
        let mut inner = self.inner.lock().await;
        Self::sweep_unhealthy_locked(&mut inner).await;

        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.idle_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(3600));
        let mut idle: Vec<(String, DateTime<Utc>)> = inner
            .contexts
            .values()
            .filter(|c| c.last_used < cutoff)
            .map(|c| (c.account.clone(), c.last_used))
            .collect();
        idle.sort_by_key(|(_, at)| *at);

        let count = idle.len();
        for (account, _) in idle {
            info!(account = %account, "evicting idle context");
            Self::close_record_locked(&mut inner, &account).await;
        }
        count
    }

    /// Close LRU contexts until the active count is within the cap;
    /// also sweeps dead processes.
    pub async fn enforce_context_cap(&self) -> usize {
        let mut inner = self.inner.lock().await;
        Self::sweep_unhealthy_locked(&mut inner).await;

        let mut closed = 0;
        while inner.contexts.len() > self.config.active_context_cap {
            let Some(account) = oldest_account(&inner.contexts) else {
                break;
            };
            info!(account = %account, "closing LRU context over cap");
            Self::close_record_locked(&mut inner, &account).await;
            closed += 1;
        }
        closed
    }

    /// Close roughly half of the active contexts, oldest first. Called
    /// when the resource monitor reports CRITICAL.
    pub async fn emergency_release(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let target = inner.contexts.len().div_ceil(2);
        let mut closed = 0;
        for _ in 0..target {
            let Some(account) = oldest_account(&inner.contexts) else {
                break;
            };
            warn!(account = %account, "emergency context release");
            Self::close_record_locked(&mut inner, &account).await;
            closed += 1;
        }
        Self::sweep_unhealthy_locked(&mut inner).await;
        closed
    }

    /// Accounts currently pooled, with their last keepalive time
    pub async fn keepalive_candidates(&self) -> Vec<(String, DateTime<Utc>)> {
        let inner = self.inner.lock().await;
        inner
            .contexts
            .values()
            .map(|c| (c.account.clone(), c.last_keepalive))
            .collect()
    }

    /// Record a successful keepalive: store the refreshed cookies and
    /// advance `last_keepalive`. Called only after the upload envelope
    /// has been enqueued.
    pub async fn note_keepalive(&self, account: &str, cookies: HashMap<String, String>) {
        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.contexts.get_mut(account) {
            record.cookies = cookies;
            record.last_keepalive = Utc::now();
        }
    }

    /// Update the cached cookie set for an account (after a task run
    /// observed fresh cookies)
    pub async fn update_cookies(&self, account: &str, cookies: HashMap<String, String>) {
        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.contexts.get_mut(account) {
            record.cookies = cookies;
        }
    }

    /// Number of pooled contexts
    pub async fn context_count(&self) -> usize {
        self.inner.lock().await.contexts.len()
    }

    /// Number of live browser processes
    pub async fn process_count(&self) -> usize {
        self.inner
            .lock()
            .await
            .slots
            .iter()
            .filter(|s| matches!(s, Slot::Running(_)))
            .count()
    }

    /// Restart the pool once per day at the configured hour: save all
    /// cookie sets, tear everything down, rebuild each context from
    /// its saved cookies. Returns (rebuilt, failed).
    pub async fn maybe_daily_restart(&self, now: DateTime<Local>) -> Option<(usize, usize)> {
        let mut inner = self.inner.lock().await;
        let today = now.date_naive();
        if now.hour() != self.config.daily_restart_hour
            || inner.last_restart_date == Some(today)
        {
            return None;
        }
        info!(
            hour = self.config.daily_restart_hour,
            date = %today,
            "daily pool restart"
        );
        inner.last_restart_date = Some(today);

        let saved: Vec<(String, HashMap<String, String>)> = inner
            .contexts
            .values()
            .map(|c| (c.account.clone(), c.cookies.clone()))
            .collect();

        Self::teardown_locked(&mut inner).await;

        let mut rebuilt = 0;
        let mut failed = 0;
        for (account, cookies) in saved {
            match Self::create_context_locked(&mut inner, &self.config, &account, &cookies).await {
                Ok(_) => rebuilt += 1,
                Err(e) => {
                    warn!(account = %account, error = %e, "context re-creation failed after daily restart");
                    failed += 1;
                }
            }
        }
        info!(rebuilt = rebuilt, failed = failed, "daily pool restart complete");
        Some((rebuilt, failed))
    }

    /// Write the pool snapshot to disk
    pub async fn save_snapshot(&self) -> CollectorResult<()> {
        let inner = self.inner.lock().await;
        let contexts = inner
            .contexts
            .values()
            .map(|c| {
                (
                    c.account.clone(),
                    SnapshotEntry {
                        cookies: c.cookies.clone(),
                        last_used_at: c.last_used,
                        last_keepalive_at: c.last_keepalive,
                    },
                )
            })
            .collect();
        let pool_snapshot = PoolSnapshot {
            saved_at: Utc::now(),
            contexts,
        };
        snapshot::write_snapshot(&self.config.state_dir, &pool_snapshot)
    }

    /// Rebuild contexts from the on-disk snapshot, best effort.
    /// Returns the number of accounts restored.
    pub async fn restore_snapshot(&self) -> usize {
        let pool_snapshot = snapshot::read_snapshot(&self.config.state_dir);
        if pool_snapshot.contexts.is_empty() {
            return 0;
        }
        info!(
            accounts = pool_snapshot.contexts.len(),
            saved_at = %pool_snapshot.saved_at,
            "restoring pool from snapshot"
        );

        let mut restored = 0;
        for (account, entry) in pool_snapshot.contexts {
            match self.get_context(&account, Some(entry.cookies)).await {
                Ok(_) => {
                    let mut inner = self.inner.lock().await;
                    if let Some(record) = inner.contexts.get_mut(&account) {
                        record.last_used = entry.last_used_at;
                        record.last_keepalive = entry.last_keepalive_at;
                    }
                    restored += 1;
                }
                Err(e) => {
                    warn!(account = %account, error = %e, "snapshot restore failed for account, skipping");
                }
            }
        }
        restored
    }

    /// Save the snapshot and tear down every context and process
    pub async fn shutdown(&self) {
        if let Err(e) = self.save_snapshot().await {
            warn!(error = %e, "failed to save pool snapshot on shutdown");
        }
        let mut inner = self.inner.lock().await;
        Self::teardown_locked(&mut inner).await;
        info!("session pool shut down");
    }

    // ------------------------------------------------------------------
    // Lock-held helpers. Callers hold the pool mutex; none of these
    // re-acquire it.
    // ------------------------------------------------------------------

    async fn create_context_locked(
        inner: &mut PoolInner,
        config: &PoolConfig,
        account: &str,
        cookies: &HashMap<String, String>,
    ) -> CollectorResult<ContextHandle> {
        let idx = Self::choose_slot_locked(inner, config).await?;

        let Slot::Running(process) = &mut inner.slots[idx] else {
            return Err(CollectorError::ContextDeath(format!(
                "slot {idx} vanished during context creation"
            )));
        };

        match open_context(process, config, cookies).await {
            Ok((context_id, page)) => {
                process.context_count += 1;
                let now = Utc::now();
                inner.contexts.insert(
                    account.to_string(),
                    AccountContext {
                        account: account.to_string(),
                        process_index: idx,
                        context_id,
                        page: page.clone(),
                        cookies: cookies.clone(),
                        created_at: now,
                        last_used: now,
                        last_keepalive: now,
                    },
                );
                debug!(account = account, slot = idx, "created context");
                Ok(ContextHandle {
                    account: account.to_string(),
                    page,
                })
            }
            Err(e) => {
                if e.is_target_closed() {
                    process.healthy = false;
                }
                Err(e)
            }
        }
    }

    /// Pick the least-loaded healthy process with headroom, rebuilding
    /// unhealthy slots first and launching into an empty slot when no
    /// running process has room.
    async fn choose_slot_locked(
        inner: &mut PoolInner,
        config: &PoolConfig,
    ) -> CollectorResult<usize> {
        for idx in 0..inner.slots.len() {
            let needs_rebuild = matches!(&inner.slots[idx], Slot::Running(p) if !p.healthy);
            if needs_rebuild {
                if let Err(e) = Self::rebuild_slot_locked(inner, config, idx).await {
                    warn!(slot = idx, error = %e, "slot rebuild failed, leaving empty");
                }
            }
        }

        let mut best: Option<(usize, usize)> = None;
        for (idx, slot) in inner.slots.iter().enumerate() {
            if let Slot::Running(process) = slot {
                if process.context_count < config.max_contexts_per_process
                    && best.is_none_or(|(_, count)| process.context_count < count)
                {
                    best = Some((idx, process.context_count));
                }
            }
        }
        if let Some((idx, _)) = best {
            return Ok(idx);
        }

        if let Some(idx) = inner.slots.iter().position(|s| matches!(s, Slot::Empty)) {
            let handle = launch_browser(config.headless, idx).await?;
            inner.slots[idx] = Slot::Running(ProcessSlot {
                handle,
                context_count: 0,
                healthy: true,
            });
            return Ok(idx);
        }

        Err(CollectorError::PoolSaturated(format!(
            "{} processes x {} contexts all occupied",
            config.max_processes, config.max_contexts_per_process
        )))
    }

    /// Evict every context hosted on a slot, close the process and
    /// relaunch into the same slot.
    async fn rebuild_slot_locked(
        inner: &mut PoolInner,
        config: &PoolConfig,
        idx: usize,
    ) -> CollectorResult<()> {
        let lost: Vec<String> = inner
            .contexts
            .values()
            .filter(|c| c.process_index == idx)
            .map(|c| c.account.clone())
            .collect();
        for account in &lost {
            // The process is gone; its contexts are lost with it
            inner.contexts.remove(account);
            warn!(account = %account, slot = idx, "context lost to unhealthy process");
        }

        if let Slot::Running(process) = std::mem::replace(&mut inner.slots[idx], Slot::Empty) {
            process.handle.close().await;
        }

        let handle = launch_browser(config.headless, idx).await?;
        inner.slots[idx] = Slot::Running(ProcessSlot {
            handle,
            context_count: 0,
            healthy: true,
        });
        info!(slot = idx, lost_contexts = lost.len(), "rebuilt browser slot");
        Ok(())
    }

    /// Close the record for an account: page, CDP context, counter
    async fn close_record_locked(inner: &mut PoolInner, account: &str) {
        let Some(record) = inner.contexts.remove(account) else {
            return;
        };
        debug!(
            account = account,
            age_secs = (Utc::now() - record.created_at).num_seconds(),
            "closing context"
        );
        if let Some(Slot::Running(process)) = inner.slots.get_mut(record.process_index) {
            process.context_count = process.context_count.saturating_sub(1);
            let _ = record.page.clone().close().await;
            if let Err(e) = process
                .handle
                .browser_mut()
                .dispose_browser_context(record.context_id.clone())
                .await
            {
                debug!(account = account, error = %e, "browser context disposal failed");
            }
        }
    }

    /// Drop processes whose engine no longer responds, losing their
    /// contexts. Slots are reopened lazily on the next `get_context`.
    async fn sweep_unhealthy_locked(inner: &mut PoolInner) {
        for idx in 0..inner.slots.len() {
            let dead = match &inner.slots[idx] {
                Slot::Running(process) => !process.healthy || !process.handle.is_alive().await,
                Slot::Empty => false,
            };
            if !dead {
                continue;
            }
            warn!(slot = idx, "sweeping dead browser process");
            let lost: Vec<String> = inner
                .contexts
                .values()
                .filter(|c| c.process_index == idx)
                .map(|c| c.account.clone())
                .collect();
            for account in lost {
                inner.contexts.remove(&account);
            }
            if let Slot::Running(process) = std::mem::replace(&mut inner.slots[idx], Slot::Empty) {
                process.handle.close().await;
            }
        }
    }

    /// Close everything: every context record and every process
    async fn teardown_locked(inner: &mut PoolInner) {
        let accounts: Vec<String> = inner.contexts.keys().cloned().collect();
        for account in accounts {
            Self::close_record_locked(inner, &account).await;
        }
        for idx in 0..inner.slots.len() {
            if let Slot::Running(process) = std::mem::replace(&mut inner.slots[idx], Slot::Empty) {
                process.handle.close().await;
            }
        }
    }
}

/// Cheap context health probe: page URL and cookies must be readable
async fn probe_page(page: &Page) -> bool {
    page.url().await.is_ok() && page.get_cookies().await.is_ok()
}

/// Create an isolated browser context with a single blank page and the
/// given cookies installed.
async fn open_context(
    process: &mut ProcessSlot,
    config: &PoolConfig,
    cookies: &HashMap<String, String>,
) -> CollectorResult<(BrowserContextId, Page)> {
    let context_id = process
        .handle
        .browser_mut()
        .create_browser_context(CreateBrowserContextParams::default())
        .await?;

    let params = CreateTargetParams::builder()
        .url("about:blank")
        .browser_context_id(context_id.clone())
        .build()
        .map_err(CollectorError::Other)?;
    let page = process.handle.browser().new_page(params).await?;

    if !cookies.is_empty() {
        let params = cookie_params(cookies, &config.cookie_domain)?;
        page.set_cookies(params).await?;
    }

    Ok((context_id, page))
}

/// Build CDP cookie params for the portal domain
fn cookie_params(
    cookies: &HashMap<String, String>,
    domain: &str,
) -> CollectorResult<Vec<CookieParam>> {
    cookies
        .iter()
        .map(|(name, value)| {
            CookieParam::builder()
                .name(name.clone())
                .value(value.clone())
                .domain(domain.to_string())
                .path("/")
                .build()
                .map_err(CollectorError::Other)
        })
        .collect()
}

/// Account with the oldest `last_used`, if any
fn oldest_account(contexts: &HashMap<String, AccountContext>) -> Option<String> {
    oldest_of(contexts.values().map(|c| (c.account.as_str(), c.last_used)))
}

fn oldest_of<'a>(items: impl Iterator<Item = (&'a str, DateTime<Utc>)>) -> Option<String> {
    items
        .min_by_key(|(_, at)| *at)
        .map(|(account, _)| account.to_string())
}

/// Derive the cookie domain from the portal origin: strip the first
/// host label when there are at least three, and lead with a dot so
/// cookies cover sibling subdomains.
#[must_use]
pub fn derive_cookie_domain(portal_base_url: &str) -> String {
    let host = url::Url::parse(portal_base_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "dianping.com".to_string());

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() >= 3 {
        format!(".{}", labels[1..].join("."))
    } else {
        format!(".{host}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_domain_strips_first_label() {
        assert_eq!(derive_cookie_domain("https://e.dianping.com"), ".dianping.com");
        assert_eq!(derive_cookie_domain("https://dianping.com"), ".dianping.com");
        assert_eq!(
            derive_cookie_domain("https://portal.example.co.uk"),
            ".example.co.uk"
        );
        assert_eq!(derive_cookie_domain("not a url"), ".dianping.com");
    }

    #[test]
    fn oldest_of_picks_minimum_last_used() {
        let now = Utc::now();
        let entries = [
            ("A1", now - chrono::Duration::minutes(5)),
            ("A2", now - chrono::Duration::minutes(50)),
            ("A3", now - chrono::Duration::minutes(20)),
        ];
        assert_eq!(
            oldest_of(entries.iter().copied()).as_deref(),
            Some("A2")
        );
        assert_eq!(oldest_of(std::iter::empty()), None);
    }

    #[test]
    fn cookie_params_carry_domain_and_path() {
        let cookies = HashMap::from([("token".to_string(), "abc".to_string())]);
        let params = cookie_params(&cookies, ".dianping.com").expect("params should build");
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].name, "token");
        assert_eq!(params[0].domain.as_deref(), Some(".dianping.com"));
        assert_eq!(params[0].path.as_deref(), Some("/"));
    }
}
