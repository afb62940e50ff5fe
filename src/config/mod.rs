//! Collector configuration
//!
//! `CollectorConfig` is built either programmatically through the
//! typestate builder or loaded from a TOML file. Paths are normalized
//! to absolute at build time.

mod builder;
mod getters;
mod types;

pub use builder::{CollectorConfigBuilder, Complete, WithStateDir};
pub use types::CollectorConfig;

use anyhow::{Context, Result};
use std::path::Path;

impl CollectorConfig {
    /// Start building a config programmatically
    #[must_use]
    pub fn builder() -> CollectorConfigBuilder<()> {
        CollectorConfigBuilder::default()
    }

    /// Override dev mode (used by the CLI flag)
    #[must_use]
    pub fn with_dev_mode(mut self, dev: bool) -> Self {
        self.dev_mode = dev;
        self
    }

    /// Load a config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: CollectorConfig = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};

    fn test_config() -> CollectorConfig {
        CollectorConfig::builder()
            .state_dir("/tmp/hdp-state")
            .coordinator_base_url("http://backend:8100/")
            .build()
            .expect("default config should build")
    }

    #[test]
    fn builder_applies_defaults_and_trims_url() {
        let config = test_config();
        assert_eq!(config.coordinator_base_url(), "http://backend:8100");
        assert_eq!(config.max_processes(), 3);
        assert_eq!(config.keepalive_batch_size(), 2);
        assert_eq!(
            config.download_dir(),
            std::path::Path::new("/tmp/hdp-state/downloads")
        );
        assert_eq!(config.disabled_products().len(), 2);
    }

    #[test]
    fn work_window_respects_hours_and_dev_mode() {
        let config = test_config();
        let morning = Local.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
        let night = Local.with_ymd_and_hms(2025, 3, 10, 2, 0, 0).unwrap();
        assert!(config.in_work_window(morning));
        assert!(!config.in_work_window(night));

        let dev = CollectorConfig::builder()
            .state_dir("/tmp/hdp-state")
            .coordinator_base_url("http://backend:8100")
            .dev_mode(true)
            .build()
            .expect("dev config should build");
        assert!(dev.in_work_window(night));
    }

    #[test]
    fn zero_process_bounds_rejected() {
        let result = CollectorConfig::builder()
            .state_dir("/tmp/hdp-state")
            .coordinator_base_url("http://backend:8100")
            .max_processes(0)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn toml_round_trip() {
        let config = test_config();
        let raw = toml::to_string(&config).expect("config should serialize");
        let parsed: CollectorConfig = toml::from_str(&raw).expect("config should parse back");
        assert_eq!(parsed.max_processes(), config.max_processes());
        assert_eq!(parsed.coordinator_base_url(), config.coordinator_base_url());
    }
}
