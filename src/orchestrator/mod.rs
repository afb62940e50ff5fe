//! Task orchestrator
//!
//! The main loop on a worker host: leases tasks from the coordinator,
//! validates preconditions, drives the per-task browser navigation
//! sequence, invokes the per-product extractors and reports outcomes
//! through the lease-callback protocol. Idle gaps between leases are
//! spent on keepalive batches, pool hygiene and the daily restart, so
//! every browser-touching activity interleaves on this one driver.

use std::sync::Arc;

use chromiumoxide::page::Page;
use chrono::{Local, NaiveDate};
use rand::Rng;
use tracing::{debug, error, info, warn};

use crate::account_lock::AccountLockRegistry;
use crate::artifacts::ArtifactStore;
use crate::auth;
use crate::config::CollectorConfig;
use crate::cookie_queue::CookieUploadQueue;
use crate::coordinator::{CallbackStatus, CoordinatorClient, TaskLease, public_ip};
use crate::error::{CollectorError, CollectorResult};
use crate::extractors::{self, ExtractorContext};
use crate::keepalive::KeepaliveScheduler;
use crate::portal::{PortalClient, PortalSession};
use crate::products::{DateWindow, Product, ProductStatus, TaskResult};
use crate::report_template;
use crate::resource_monitor::{ResourceMonitor, ResourceState};
use crate::session_pool::{ContextHandle, SessionPool};
use crate::shutdown::ShutdownFlag;
use crate::utils::constants::{
    NAVIGATION_TIMEOUT_SECS, REPORT_PAGE_PATH, REVIEW_PAGE_PATH, TRAFFIC_PAGE_PATH,
};
use crate::utils::timeout::with_page_timeout;

use std::time::Duration;

/// Pause after a CRITICAL pre-task reset
const RESET_BACKOFF: Duration = Duration::from_secs(30);

/// Pause after an unexpected task failure
const UNEXPECTED_ERROR_BACKOFF: Duration = Duration::from_secs(60);

/// Portal page a product is driven from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortalPage {
    Traffic,
    ReportCentre,
    Reviews,
}

impl PortalPage {
    fn for_product(product: Product) -> Self {
        match product {
            Product::StoreStats => PortalPage::Traffic,
            Product::KewenDailyReport | Product::TradeAnalysis => PortalPage::ReportCentre,
            _ => PortalPage::Reviews,
        }
    }

    fn path(self) -> &'static str {
        match self {
            PortalPage::Traffic => TRAFFIC_PAGE_PATH,
            PortalPage::ReportCentre => REPORT_PAGE_PATH,
            PortalPage::Reviews => REVIEW_PAGE_PATH,
        }
    }
}

/// Task orchestrator
pub struct Orchestrator {
    config: Arc<CollectorConfig>,
    pool: Arc<SessionPool>,
    keepalive: Arc<KeepaliveScheduler>,
    locks: Arc<AccountLockRegistry>,
    monitor: Arc<ResourceMonitor>,
    coordinator: Arc<CoordinatorClient>,
    portal: PortalClient,
    artifacts: ArtifactStore,
    queue: Arc<CookieUploadQueue>,
    shutdown: ShutdownFlag,
    last_schedule_date: std::sync::Mutex<Option<NaiveDate>>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<CollectorConfig>,
        pool: Arc<SessionPool>,
        keepalive: Arc<KeepaliveScheduler>,
        locks: Arc<AccountLockRegistry>,
        monitor: Arc<ResourceMonitor>,
        coordinator: Arc<CoordinatorClient>,
        portal: PortalClient,
        artifacts: ArtifactStore,
        queue: Arc<CookieUploadQueue>,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self {
            config,
            pool,
            keepalive,
            locks,
            monitor,
            coordinator,
            portal,
            artifacts,
            queue,
            shutdown,
            last_schedule_date: std::sync::Mutex::new(None),
        }
    }

    /// Run the main loop until shutdown is requested
    pub async fn run(&self) {
        let restored = self.pool.restore_snapshot().await;
        if restored > 0 {
            info!(accounts = restored, "restored pooled accounts from snapshot");
        }

        while !self.shutdown.is_triggered() {
            if !self.config.in_work_window(Local::now()) {
                debug!("outside work window");
                self.shutdown
                    .sleep_interruptible(Duration::from_secs(300))
                    .await;
                continue;
            }

            self.trigger_daily_schedule().await;

            let server_ip = match public_ip().await {
                Ok(ip) => ip,
                Err(e) => {
                    warn!(error = %e, "public IP discovery failed");
                    self.shutdown.sleep_interruptible(RESET_BACKOFF).await;
                    continue;
                }
            };

            let lease = match self.coordinator.lease_task(&server_ip).await {
                Ok(lease) => lease,
                Err(e) => {
                    warn!(error = %e, "task lease failed");
                    self.shutdown.sleep_interruptible(RESET_BACKOFF).await;
                    continue;
                }
            };

            match lease {
                None => {
                    if let Err(e) = self.coordinator.reschedule_failed().await {
                        debug!(error = %e, "reschedule-failed trigger unavailable");
                    }
                    self.idle_cycle().await;
                }
                Some(lease) => {
                    if self.monitor.classify().await == ResourceState::Critical {
                        warn!(lease_id = lease.id, "resources critical, resetting lease");
                        if let Err(e) = self.coordinator.reset_lease(lease.id).await {
                            warn!(lease_id = lease.id, error = %e, "lease reset failed");
                        }
                        self.shutdown.sleep_interruptible(RESET_BACKOFF).await;
                        continue;
                    }
                    let clean = self.execute_lease(lease).await;
                    if !clean {
                        self.shutdown
                            .sleep_interruptible(UNEXPECTED_ERROR_BACKOFF)
                            .await;
                    }
                }
            }
        }

        info!("shutting down: flushing cookie queue and saving pool state");
        self.queue.shutdown().await;
        self.pool.shutdown().await;
    }

    /// One idle gap: resource-gated pool hygiene, a keepalive batch,
    /// daily restart and artifact sweep, then a short pause.
    async fn idle_cycle(&self) {
        match self.monitor.classify().await {
            ResourceState::Critical => {
                let closed = self.pool.emergency_release().await;
                warn!(closed = closed, "emergency context release");
            }
            ResourceState::Warning => {
                self.pool.release_idle_contexts().await;
            }
            ResourceState::Normal => {
                self.keepalive.keepalive_one_batch().await;
            }
        }
        self.pool.enforce_context_cap().await;
        self.pool.maybe_daily_restart(Local::now()).await;
        self.artifacts.sweep_old();
        self.shutdown
            .sleep_interruptible(self.config.idle_poll_interval())
            .await;
    }

    /// Post the schedule-generation trigger once per local date
    async fn trigger_daily_schedule(&self) {
        let today = Local::now().date_naive();
        {
            let last = self.last_schedule_date.lock().expect("schedule date lock");
            if *last == Some(today) {
                return;
            }
        }
        let yesterday = today.pred_opt().unwrap_or(today);
        let window = DateWindow {
            start: yesterday,
            end: yesterday,
        };
        match self
            .coordinator
            .generate_schedule(&today.format("%Y-%m-%d").to_string(), &window)
            .await
        {
            Ok(()) => {
                *self.last_schedule_date.lock().expect("schedule date lock") = Some(today);
                info!(date = %today, "daily schedule trigger posted");
            }
            Err(e) => debug!(error = %e, "schedule generation trigger failed"),
        }
    }

    /// Execute one lease end to end, always terminating it with
    /// exactly one callback. Returns false when the failure was
    /// unexpected and the main loop should back off.
    async fn execute_lease(&self, lease: TaskLease) -> bool {
        info!(
            lease_id = lease.id,
            account = %lease.account_id,
            task_type = %lease.task_type,
            "executing lease"
        );

        let window = match lease.validate() {
            Ok(window) => window,
            Err(e) => {
                warn!(lease_id = lease.id, error = %e, "lease failed validation");
                self.callback(lease.id, CallbackStatus::Failed, &e.to_string(), e.retry_add())
                    .await;
                return true;
            }
        };

        let guard = match self
            .locks
            .acquire(&lease.account_id, self.config.account_lock_timeout())
            .await
        {
            Ok(guard) => guard,
            Err(e) => {
                warn!(lease_id = lease.id, error = %e, "account lock not acquired in time");
                self.callback(lease.id, CallbackStatus::Failed, &e.to_string(), e.retry_add())
                    .await;
                return true;
            }
        };

        let outcome = self.run_task(&lease, &window).await;
        drop(guard);

        match outcome {
            Ok(results) => {
                if let Err(e) = self
                    .coordinator
                    .report_batch_status(&lease.account_id, &window, &results)
                    .await
                {
                    warn!(lease_id = lease.id, error = %e, "batch status report failed");
                }
                let all_success = results.iter().all(|r| r.status != ProductStatus::Failed);
                let (status, retry_add) = if all_success {
                    (CallbackStatus::Succeeded, 0)
                } else {
                    (CallbackStatus::Failed, 1)
                };
                let error_message = results
                    .iter()
                    .filter_map(|r| r.error.as_deref())
                    .collect::<Vec<_>>()
                    .join("; ");
                self.callback(lease.id, status, &error_message, retry_add)
                    .await;
                true
            }
            Err(e @ CollectorError::AuthInvalid { .. }) => {
                // The invalidation fan-out already ran inside the task;
                // a dead cookie is not worth a coordinator retry
                self.callback(lease.id, CallbackStatus::Failed, &e.to_string(), e.retry_add())
                    .await;
                true
            }
            Err(e) => {
                error!(lease_id = lease.id, error = %e, "task failed unexpectedly");
                self.callback(lease.id, CallbackStatus::Failed, &e.to_string(), e.retry_add())
                    .await;
                !matches!(e, CollectorError::Other(_))
            }
        }
    }

    async fn callback(&self, lease_id: i64, status: CallbackStatus, message: &str, retry_add: u8) {
        if let Err(e) = self
            .coordinator
            .task_callback(lease_id, status, message, retry_add)
            .await
        {
            error!(lease_id = lease_id, error = %e, "task callback delivery failed");
        }
    }

    /// Validate preconditions and run the product sequence
    async fn run_task(
        &self,
        lease: &TaskLease,
        window: &DateWindow,
    ) -> CollectorResult<Vec<TaskResult>> {
        let account = lease.account_id.as_str();

        let info = self.coordinator.account_info(account).await?;
        if info.is_invalid() {
            return Err(CollectorError::Validation(format!(
                "account {account} is marked invalid, lease should not exist"
            )));
        }
        let cookies = info.cookie_map();
        if cookies.is_empty() {
            return Err(CollectorError::Validation(format!(
                "coordinator has no cookies for {account}"
            )));
        }
        let shops = info.shops();
        let mut session = PortalSession::new(account, cookies.clone(), &info.mtgsig);

        let products: Vec<Product> = if lease.task_type == "all" {
            Product::ALL.to_vec()
        } else {
            vec![Product::parse(&lease.task_type)?]
        };

        let template_id = if info.templates_id > 0 {
            info.templates_id
        } else {
            match report_template::ensure_template(&self.portal, &self.coordinator, &session).await
            {
                Ok(id) => id,
                Err(e @ CollectorError::AuthInvalid { .. }) => {
                    // Invalidation observed before any product ran;
                    // fan out against the first product of this lease
                    let detail = e.to_string();
                    auth::report_invalidation(
                        &self.coordinator,
                        account,
                        window,
                        products[0],
                        &detail,
                    )
                    .await;
                    self.pool.remove_context(account).await;
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        };

        let handle = self.pool.get_context(account, Some(cookies)).await?;

        let results = self
            .run_products(&handle, &mut session, &shops, window, template_id, &products)
            .await?;

        // The task leaves fresh cookies behind; snapshot them for the
        // pool and the upload pipeline
        if let Ok(fresh) = auth::read_page_cookies(&handle.page).await {
            if !fresh.is_empty() {
                self.queue.put(account, fresh.clone());
                self.pool.update_cookies(account, fresh).await;
            }
        }

        Ok(results)
    }

    /// Drive the page sequence and the extractors over it.
    ///
    /// One re-login is allowed per task: on an invalidation signal the
    /// interrupted product is reported not-run and execution resumes
    /// with the next extractor. A second signal, or a failed re-login,
    /// triggers the invalidation fan-out and aborts the task.
    async fn run_products(
        &self,
        handle: &ContextHandle,
        session: &mut PortalSession,
        shops: &[crate::coordinator::Shop],
        window: &DateWindow,
        template_id: i64,
        products: &[Product],
    ) -> CollectorResult<Vec<TaskResult>> {
        let account = handle.account.clone();
        let mut handle = handle.clone();
        let mut results: Vec<TaskResult> = Vec::with_capacity(products.len());
        let mut current_page: Option<PortalPage> = None;
        let mut relogin_used = false;

        // Verify login before any page work. A reused context may hold
        // cookies older than the coordinator's; the task's single
        // re-login replaces them.
        if let Err(e) = auth::probe_login(&handle.page, self.config.portal_base_url(), &account).await
        {
            let CollectorError::AuthInvalid { detail, .. } = &e else {
                return Err(e);
            };
            relogin_used = true;
            warn!(account = %account, detail = %detail, "login probe failed, attempting re-login");
            match auth::relogin(
                &self.pool,
                &self.coordinator,
                self.config.portal_base_url(),
                &account,
            )
            .await
            {
                Ok(new_handle) => {
                    handle = new_handle;
                    if let Ok(fresh) = auth::read_page_cookies(&handle.page).await {
                        *session = session.clone().with_cookies(fresh);
                    }
                }
                Err(relogin_err) => {
                    // Only a definitive auth failure marks the account
                    // dead; infrastructure failures stay retryable
                    if matches!(relogin_err, CollectorError::AuthInvalid { .. }) {
                        auth::report_invalidation(
                            &self.coordinator,
                            &account,
                            window,
                            products[0],
                            detail,
                        )
                        .await;
                        self.pool.remove_context(&account).await;
                    }
                    return Err(relogin_err);
                }
            }
        }

        for &product in products {
            if self
                .config
                .disabled_products()
                .iter()
                .any(|name| name == product.as_str())
            {
                results.push(TaskResult::not_run(product));
                continue;
            }

            let wanted_page = PortalPage::for_product(product);
            if current_page != Some(wanted_page) {
                self.drive_page(&handle.page, wanted_page).await?;
                current_page = Some(wanted_page);
            }

            self.inter_step_delay().await;

            let ctx = ExtractorContext {
                portal: &self.portal,
                coordinator: &self.coordinator,
                artifacts: &self.artifacts,
                page: &handle.page,
                session,
                shops,
                window,
                template_id,
                all_codes_only: self.config.daily_report_all_codes_only(),
            };

            let outcome = if product == Product::StoreStats {
                extractors::store_stats::run(&ctx).await.map(|(result, signature)| {
                    (result, Some(signature))
                })
            } else {
                extractors::run_product(&ctx, product)
                    .await
                    .map(|result| (result, None))
            };

            match outcome {
                Ok((result, refreshed_signature)) => {
                    if let Some(signature) = refreshed_signature {
                        *session = session.clone().with_signature(signature);
                    }
                    results.push(result);
                }
                Err(CollectorError::AuthInvalid { detail, .. }) if !relogin_used => {
                    relogin_used = true;
                    warn!(account = %account, product = %product, detail = %detail,
                        "invalidation mid-task, attempting re-login");
                    match auth::relogin(
                        &self.pool,
                        &self.coordinator,
                        self.config.portal_base_url(),
                        &account,
                    )
                    .await
                    {
                        Ok(new_handle) => {
                            handle = new_handle;
                            if let Ok(fresh) = auth::read_page_cookies(&handle.page).await {
                                *session = session.clone().with_cookies(fresh);
                            }
                            current_page = None;
                            // Interrupted product is not re-run; it is
                            // reported not-run and the sequence resumes
                            results.push(TaskResult::not_run(product));
                        }
                        Err(e) => {
                            if matches!(e, CollectorError::AuthInvalid { .. }) {
                                auth::report_invalidation(
                                    &self.coordinator,
                                    &account,
                                    window,
                                    product,
                                    &detail,
                                )
                                .await;
                                self.pool.remove_context(&account).await;
                            }
                            return Err(e);
                        }
                    }
                }
                Err(e @ CollectorError::AuthInvalid { .. }) => {
                    let detail = e.to_string();
                    auth::report_invalidation(
                        &self.coordinator,
                        &account,
                        window,
                        product,
                        &detail,
                    )
                    .await;
                    self.pool.remove_context(&account).await;
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(results)
    }

    /// Navigate the context's page to a portal section and recover
    /// from the "no permission" shop banner when it appears
    async fn drive_page(&self, page: &Page, portal_page: PortalPage) -> CollectorResult<()> {
        let url = format!("{}{}", self.config.portal_base_url(), portal_page.path());
        debug!(url = %url, "driving portal page");

        with_page_timeout(
            async {
                page.goto(url.as_str()).await?;
                Ok(())
            },
            NAVIGATION_TIMEOUT_SECS,
            "task page navigation",
        )
        .await?;

        recover_shop_permission(page).await;
        Ok(())
    }

    /// Randomised 2–5 s pause between navigations and extractors
    async fn inter_step_delay(&self) {
        let millis = rand::rng().random_range(2000..=5000);
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }
}

/// If the page shows the "no permission" banner, click the shop
/// selector and choose "All Shops". Best-effort.
async fn recover_shop_permission(page: &Page) {
    let js = r#"(() => {
        const text = document.body ? (document.body.innerText || '') : '';
        if (!text.includes('无权限') && !text.toLowerCase().includes('no permission')) {
            return false;
        }
        const trigger = document.querySelector('.shop-selector, [class*="shop-select"]');
        if (trigger) trigger.click();
        const options = Array.from(document.querySelectorAll('li, [class*="option"]'));
        const all = options.find(o =>
            (o.innerText || '').includes('全部门店') || (o.innerText || '').includes('All Shops'));
        if (all) all.click();
        return true;
    })()"#;

    match page.evaluate(js).await {
        Ok(evaluation) => {
            if evaluation.into_value::<bool>().unwrap_or(false) {
                info!("recovered from no-permission banner via All Shops");
            }
        }
        Err(e) => debug!(error = %e, "shop permission recovery script failed"),
    }
}
