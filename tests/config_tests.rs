//! Tests for the type-safe configuration builder pattern

use hdp_collector::config::CollectorConfig;
use tempfile::TempDir;

mod common;

#[test]
fn builder_requires_state_dir_and_coordinator_url() {
    // This should not compile if uncommented - testing compile-time guarantees
    // let config = CollectorConfig::builder().build();

    // This should also not compile - missing coordinator_base_url
    // let config = CollectorConfig::builder()
    //     .state_dir("/tmp/hdp")
    //     .build();

    // This SHOULD compile - both required fields provided
    let temp_dir = TempDir::new().unwrap();
    let config = CollectorConfig::builder()
        .state_dir(temp_dir.path().to_path_buf())
        .coordinator_base_url("http://backend:8100")
        .build()
        .unwrap();

    assert_eq!(config.state_dir(), temp_dir.path());
    assert_eq!(config.coordinator_base_url(), "http://backend:8100");
}

#[test]
fn builder_optional_fields_have_defaults() {
    let (config, _dir) = common::test_config("http://backend:8100");

    assert!(config.headless());
    assert_eq!(config.max_processes(), 3);
    assert_eq!(config.max_contexts_per_process(), 4);
    assert_eq!(config.active_context_cap(), 8);
    assert_eq!(config.daily_restart_hour(), 4);
    assert_eq!(config.keepalive_batch_size(), 2);
    assert_eq!(config.keepalive_interval().as_secs(), 3600);
    assert_eq!(config.keepalive_cooldown().as_secs(), 600);
    assert_eq!(config.cookie_batch_size(), 10);
    assert!(!config.dev_mode());
    assert!(config.daily_report_all_codes_only());
    // Review summaries ship disabled
    assert!(
        config
            .disabled_products()
            .iter()
            .any(|p| p == "dianping_review_summary")
    );
}

#[test]
fn builder_overrides_apply() {
    let temp_dir = TempDir::new().unwrap();
    let config = CollectorConfig::builder()
        .state_dir(temp_dir.path().to_path_buf())
        .coordinator_base_url("http://backend:8100")
        .max_processes(5)
        .max_contexts_per_process(2)
        .headless(false)
        .keepalive_batch_size(4)
        .work_window(6, 22)
        .disabled_products(vec![])
        .build()
        .unwrap();

    assert_eq!(config.max_processes(), 5);
    assert_eq!(config.max_contexts_per_process(), 2);
    assert!(!config.headless());
    assert_eq!(config.keepalive_batch_size(), 4);
    assert!(config.disabled_products().is_empty());
}

#[test]
fn relative_state_dir_is_normalized_absolute() {
    let config = CollectorConfig::builder()
        .state_dir("relative/state")
        .coordinator_base_url("http://backend:8100")
        .build()
        .unwrap();
    assert!(config.state_dir().is_absolute());
    assert!(config.download_dir().is_absolute());
}

#[test]
fn dev_mode_override_keeps_other_settings() {
    let temp_dir = TempDir::new().unwrap();
    let config = CollectorConfig::builder()
        .state_dir(temp_dir.path().to_path_buf())
        .coordinator_base_url("http://backend:8100")
        .max_processes(7)
        .build()
        .unwrap()
        .with_dev_mode(true);

    assert!(config.dev_mode());
    assert_eq!(config.max_processes(), 7);
}
