//! Core configuration types for the collector daemon
//!
//! This module contains the main `CollectorConfig` struct that defines
//! every tunable of the session pool, keepalive scheduler, resource
//! governor and work window.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration struct for the collector daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Directory for persisted state (pool snapshot, per-account storage
    /// state).
    ///
    /// **INVARIANT:** Always an absolute path (normalized in builder).
    pub(crate) state_dir: PathBuf,

    /// Scratch directory for downloaded artifacts; swept by age
    pub(crate) download_dir: PathBuf,

    /// Coordinator backend base URL, e.g. `http://10.0.0.5:8100`
    pub(crate) coordinator_base_url: String,

    /// Merchant portal origin
    pub(crate) portal_base_url: String,

    /// Run pooled browsers headless
    pub(crate) headless: bool,

    /// Upper bound of browser processes in the pool
    pub(crate) max_processes: usize,

    /// Per-process bound of isolated account contexts
    pub(crate) max_contexts_per_process: usize,

    /// Total active contexts allowed before LRU eviction kicks in
    pub(crate) active_context_cap: usize,

    /// Close contexts unused for longer than this (seconds)
    pub(crate) idle_timeout_secs: u64,

    /// Local hour at which the pool restarts once per day
    pub(crate) daily_restart_hour: u32,

    /// Accounts are due for keepalive when last_keepalive is older than
    /// this (seconds)
    pub(crate) keepalive_interval_secs: u64,

    /// Accounts touched per idle-gap keepalive batch
    pub(crate) keepalive_batch_size: usize,

    /// Cooldown after a failed keepalive (seconds)
    pub(crate) keepalive_cooldown_secs: u64,

    /// Bounded capacity of the cookie upload queue
    pub(crate) cookie_queue_capacity: usize,

    /// Cookie envelopes buffered before a consumer flush
    pub(crate) cookie_batch_size: usize,

    /// Consumer flush interval when the batch does not fill (seconds)
    pub(crate) cookie_flush_interval_secs: u64,

    /// Work window opening hour (local time)
    pub(crate) work_start_hour: u32,

    /// Work window closing hour (local time)
    pub(crate) work_end_hour: u32,

    /// Dev mode: ignore the work window (24 h operation)
    pub(crate) dev_mode: bool,

    /// Products reported not-run instead of being executed
    pub(crate) disabled_products: Vec<String>,

    /// Bounded wait for the per-account lock before a task (seconds)
    pub(crate) account_lock_timeout_secs: u64,

    /// Resource monitor sample window (seconds); verdicts younger than
    /// this are served from cache
    pub(crate) resource_sample_window_secs: u64,

    /// CPU utilisation warning threshold (percent)
    pub(crate) cpu_warning_pct: f32,

    /// CPU utilisation critical threshold (percent)
    pub(crate) cpu_critical_pct: f32,

    /// Memory utilisation warning threshold (percent)
    pub(crate) mem_warning_pct: f32,

    /// Memory utilisation critical threshold (percent)
    pub(crate) mem_critical_pct: f32,

    /// Downloaded artifacts older than this are swept (days)
    pub(crate) artifact_max_age_days: u64,

    /// Pause between lease polls while idle (seconds)
    pub(crate) idle_poll_secs: u64,

    /// Keep only "All Codes" coupon-type rows in the daily report
    /// product (portal policy, kept as a knob)
    pub(crate) daily_report_all_codes_only: bool,
}
