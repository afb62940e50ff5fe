//! Type-safe builder for `CollectorConfig` using the typestate pattern
//!
//! Fluent builder interface with compile-time validation ensuring the
//! required fields (state directory and coordinator URL) are set before
//! a config can be built.

use anyhow::{Result, anyhow};
use std::marker::PhantomData;
use std::path::PathBuf;

use crate::utils::constants::PORTAL_BASE;

use super::types::CollectorConfig;

// Type states for the builder
pub struct WithStateDir;
pub struct Complete;

pub struct CollectorConfigBuilder<State = ()> {
    pub(crate) state_dir: Option<PathBuf>,
    pub(crate) download_dir: Option<PathBuf>,
    pub(crate) coordinator_base_url: Option<String>,
    pub(crate) portal_base_url: String,
    pub(crate) headless: bool,
    pub(crate) max_processes: usize,
    pub(crate) max_contexts_per_process: usize,
    pub(crate) active_context_cap: usize,
    pub(crate) idle_timeout_secs: u64,
    pub(crate) daily_restart_hour: u32,
    pub(crate) keepalive_interval_secs: u64,
    pub(crate) keepalive_batch_size: usize,
    pub(crate) keepalive_cooldown_secs: u64,
    pub(crate) cookie_queue_capacity: usize,
    pub(crate) cookie_batch_size: usize,
    pub(crate) cookie_flush_interval_secs: u64,
    pub(crate) work_start_hour: u32,
    pub(crate) work_end_hour: u32,
    pub(crate) dev_mode: bool,
    pub(crate) disabled_products: Vec<String>,
    pub(crate) account_lock_timeout_secs: u64,
    pub(crate) resource_sample_window_secs: u64,
    pub(crate) cpu_warning_pct: f32,
    pub(crate) cpu_critical_pct: f32,
    pub(crate) mem_warning_pct: f32,
    pub(crate) mem_critical_pct: f32,
    pub(crate) artifact_max_age_days: u64,
    pub(crate) idle_poll_secs: u64,
    pub(crate) daily_report_all_codes_only: bool,
    pub(crate) _phantom: PhantomData<State>,
}

impl Default for CollectorConfigBuilder<()> {
    fn default() -> Self {
        Self {
            state_dir: None,
            download_dir: None,
            coordinator_base_url: None,
            portal_base_url: PORTAL_BASE.to_string(),
            headless: true,
            max_processes: 3,
            max_contexts_per_process: 4,
            active_context_cap: 8,
            idle_timeout_secs: 3600,
            daily_restart_hour: 4,
            keepalive_interval_secs: 3600,
            keepalive_batch_size: 2,
            keepalive_cooldown_secs: 600,
            cookie_queue_capacity: 100,
            cookie_batch_size: 10,
            cookie_flush_interval_secs: 5,
            work_start_hour: 7,
            work_end_hour: 23,
            dev_mode: false,
            disabled_products: vec![
                "dianping_review_summary".to_string(),
                "meituan_review_summary".to_string(),
            ],
            account_lock_timeout_secs: 60,
            resource_sample_window_secs: 30,
            cpu_warning_pct: 50.0,
            cpu_critical_pct: 70.0,
            mem_warning_pct: 60.0,
            mem_critical_pct: 80.0,
            artifact_max_age_days: 7,
            idle_poll_secs: 10,
            daily_report_all_codes_only: true,
            _phantom: PhantomData,
        }
    }
}

macro_rules! carry_fields {
    ($self:ident) => {
        CollectorConfigBuilder {
            state_dir: $self.state_dir,
            download_dir: $self.download_dir,
            coordinator_base_url: $self.coordinator_base_url,
            portal_base_url: $self.portal_base_url,
            headless: $self.headless,
            max_processes: $self.max_processes,
            max_contexts_per_process: $self.max_contexts_per_process,
            active_context_cap: $self.active_context_cap,
            idle_timeout_secs: $self.idle_timeout_secs,
            daily_restart_hour: $self.daily_restart_hour,
            keepalive_interval_secs: $self.keepalive_interval_secs,
            keepalive_batch_size: $self.keepalive_batch_size,
            keepalive_cooldown_secs: $self.keepalive_cooldown_secs,
            cookie_queue_capacity: $self.cookie_queue_capacity,
            cookie_batch_size: $self.cookie_batch_size,
            cookie_flush_interval_secs: $self.cookie_flush_interval_secs,
            work_start_hour: $self.work_start_hour,
            work_end_hour: $self.work_end_hour,
            dev_mode: $self.dev_mode,
            disabled_products: $self.disabled_products,
            account_lock_timeout_secs: $self.account_lock_timeout_secs,
            resource_sample_window_secs: $self.resource_sample_window_secs,
            cpu_warning_pct: $self.cpu_warning_pct,
            cpu_critical_pct: $self.cpu_critical_pct,
            mem_warning_pct: $self.mem_warning_pct,
            mem_critical_pct: $self.mem_critical_pct,
            artifact_max_age_days: $self.artifact_max_age_days,
            idle_poll_secs: $self.idle_poll_secs,
            daily_report_all_codes_only: $self.daily_report_all_codes_only,
            _phantom: PhantomData,
        }
    };
}

impl CollectorConfigBuilder<()> {
    /// Set the state directory (required). Relative paths are
    /// normalized to absolute against the current working directory.
    pub fn state_dir(mut self, dir: impl Into<PathBuf>) -> CollectorConfigBuilder<WithStateDir> {
        self.state_dir = Some(dir.into());
        carry_fields!(self)
    }
}

impl CollectorConfigBuilder<WithStateDir> {
    /// Set the coordinator backend base URL (required)
    pub fn coordinator_base_url(
        mut self,
        url: impl Into<String>,
    ) -> CollectorConfigBuilder<Complete> {
        self.coordinator_base_url = Some(url.into());
        carry_fields!(self)
    }
}

impl<State> CollectorConfigBuilder<State> {
    pub fn download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = Some(dir.into());
        self
    }

    pub fn portal_base_url(mut self, url: impl Into<String>) -> Self {
        self.portal_base_url = url.into();
        self
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn max_processes(mut self, n: usize) -> Self {
        self.max_processes = n;
        self
    }

    pub fn max_contexts_per_process(mut self, n: usize) -> Self {
        self.max_contexts_per_process = n;
        self
    }

    pub fn active_context_cap(mut self, n: usize) -> Self {
        self.active_context_cap = n;
        self
    }

    pub fn idle_timeout_secs(mut self, secs: u64) -> Self {
        self.idle_timeout_secs = secs;
        self
    }

    pub fn daily_restart_hour(mut self, hour: u32) -> Self {
        self.daily_restart_hour = hour;
        self
    }

    pub fn keepalive_interval_secs(mut self, secs: u64) -> Self {
        self.keepalive_interval_secs = secs;
        self
    }

    pub fn keepalive_batch_size(mut self, n: usize) -> Self {
        self.keepalive_batch_size = n;
        self
    }

    pub fn keepalive_cooldown_secs(mut self, secs: u64) -> Self {
        self.keepalive_cooldown_secs = secs;
        self
    }

    pub fn work_window(mut self, start_hour: u32, end_hour: u32) -> Self {
        self.work_start_hour = start_hour;
        self.work_end_hour = end_hour;
        self
    }

    pub fn dev_mode(mut self, dev: bool) -> Self {
        self.dev_mode = dev;
        self
    }

    pub fn disabled_products(mut self, products: Vec<String>) -> Self {
        self.disabled_products = products;
        self
    }

    pub fn account_lock_timeout_secs(mut self, secs: u64) -> Self {
        self.account_lock_timeout_secs = secs;
        self
    }
}

impl CollectorConfigBuilder<Complete> {
    /// Build the final configuration, validating ranges and normalizing
    /// paths to absolute.
    pub fn build(self) -> Result<CollectorConfig> {
        let state_dir = self
            .state_dir
            .ok_or_else(|| anyhow!("state_dir is required"))?;
        let coordinator_base_url = self
            .coordinator_base_url
            .ok_or_else(|| anyhow!("coordinator_base_url is required"))?;

        if self.max_processes == 0 || self.max_contexts_per_process == 0 {
            return Err(anyhow!(
                "max_processes and max_contexts_per_process must be at least 1"
            ));
        }
        if self.daily_restart_hour > 23 || self.work_start_hour > 23 || self.work_end_hour > 24 {
            return Err(anyhow!("hours must be within a day"));
        }

        let state_dir = normalize_path(state_dir)?;
        let download_dir = match self.download_dir {
            Some(dir) => normalize_path(dir)?,
            None => state_dir.join("downloads"),
        };

        Ok(CollectorConfig {
            state_dir,
            download_dir,
            coordinator_base_url: coordinator_base_url.trim_end_matches('/').to_string(),
            portal_base_url: self.portal_base_url.trim_end_matches('/').to_string(),
            headless: self.headless,
            max_processes: self.max_processes,
            max_contexts_per_process: self.max_contexts_per_process,
            active_context_cap: self.active_context_cap,
            idle_timeout_secs: self.idle_timeout_secs,
            daily_restart_hour: self.daily_restart_hour,
            keepalive_interval_secs: self.keepalive_interval_secs,
            keepalive_batch_size: self.keepalive_batch_size,
            keepalive_cooldown_secs: self.keepalive_cooldown_secs,
            cookie_queue_capacity: self.cookie_queue_capacity,
            cookie_batch_size: self.cookie_batch_size,
            cookie_flush_interval_secs: self.cookie_flush_interval_secs,
            work_start_hour: self.work_start_hour,
            work_end_hour: self.work_end_hour,
            dev_mode: self.dev_mode,
            disabled_products: self.disabled_products,
            account_lock_timeout_secs: self.account_lock_timeout_secs,
            resource_sample_window_secs: self.resource_sample_window_secs,
            cpu_warning_pct: self.cpu_warning_pct,
            cpu_critical_pct: self.cpu_critical_pct,
            mem_warning_pct: self.mem_warning_pct,
            mem_critical_pct: self.mem_critical_pct,
            artifact_max_age_days: self.artifact_max_age_days,
            idle_poll_secs: self.idle_poll_secs,
            daily_report_all_codes_only: self.daily_report_all_codes_only,
        })
    }
}

/// Normalize a path to absolute against the current working directory
fn normalize_path(path: PathBuf) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path)
    } else {
        let cwd = std::env::current_dir()?;
        Ok(cwd.join(path))
    }
}
