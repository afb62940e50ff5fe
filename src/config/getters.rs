//! Read accessors for `CollectorConfig`
//!
//! Fields are crate-private; everything outside reads them through
//! these getters so invariants (absolute paths, trimmed URLs) hold.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Local, Timelike};

use super::types::CollectorConfig;

impl CollectorConfig {
    #[must_use]
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    #[must_use]
    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    #[must_use]
    pub fn coordinator_base_url(&self) -> &str {
        &self.coordinator_base_url
    }

    #[must_use]
    pub fn portal_base_url(&self) -> &str {
        &self.portal_base_url
    }

    #[must_use]
    pub fn headless(&self) -> bool {
        self.headless
    }

    #[must_use]
    pub fn max_processes(&self) -> usize {
        self.max_processes
    }

    #[must_use]
    pub fn max_contexts_per_process(&self) -> usize {
        self.max_contexts_per_process
    }

    #[must_use]
    pub fn active_context_cap(&self) -> usize {
        self.active_context_cap
    }

    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    #[must_use]
    pub fn daily_restart_hour(&self) -> u32 {
        self.daily_restart_hour
    }

    #[must_use]
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }

    #[must_use]
    pub fn keepalive_batch_size(&self) -> usize {
        self.keepalive_batch_size
    }

    #[must_use]
    pub fn keepalive_cooldown(&self) -> Duration {
        Duration::from_secs(self.keepalive_cooldown_secs)
    }

    #[must_use]
    pub fn cookie_queue_capacity(&self) -> usize {
        self.cookie_queue_capacity
    }

    #[must_use]
    pub fn cookie_batch_size(&self) -> usize {
        self.cookie_batch_size
    }

    #[must_use]
    pub fn cookie_flush_interval(&self) -> Duration {
        Duration::from_secs(self.cookie_flush_interval_secs)
    }

    #[must_use]
    pub fn dev_mode(&self) -> bool {
        self.dev_mode
    }

    #[must_use]
    pub fn disabled_products(&self) -> &[String] {
        &self.disabled_products
    }

    #[must_use]
    pub fn account_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.account_lock_timeout_secs)
    }

    #[must_use]
    pub fn resource_sample_window(&self) -> Duration {
        Duration::from_secs(self.resource_sample_window_secs)
    }

    #[must_use]
    pub fn cpu_thresholds(&self) -> (f32, f32) {
        (self.cpu_warning_pct, self.cpu_critical_pct)
    }

    #[must_use]
    pub fn mem_thresholds(&self) -> (f32, f32) {
        (self.mem_warning_pct, self.mem_critical_pct)
    }

    #[must_use]
    pub fn artifact_max_age(&self) -> Duration {
        Duration::from_secs(self.artifact_max_age_days * 24 * 3600)
    }

    #[must_use]
    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_secs(self.idle_poll_secs)
    }

    #[must_use]
    pub fn daily_report_all_codes_only(&self) -> bool {
        self.daily_report_all_codes_only
    }

    /// Whether discretionary work is allowed at `now`.
    ///
    /// Dev mode keeps the window open around the clock; otherwise the
    /// window is `[work_start_hour, work_end_hour)` in local time.
    #[must_use]
    pub fn in_work_window(&self, now: DateTime<Local>) -> bool {
        if self.dev_mode {
            return true;
        }
        let hour = now.hour();
        if self.work_start_hour <= self.work_end_hour {
            hour >= self.work_start_hour && hour < self.work_end_hour
        } else {
            // Window wraps midnight
            hour >= self.work_start_hour || hour < self.work_end_hour
        }
    }
}
