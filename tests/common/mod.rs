//! Test utilities shared by the collector integration suite

use hdp_collector::config::CollectorConfig;
use tempfile::TempDir;

/// Build a config rooted in a fresh temp dir, pointed at the given
/// coordinator URL
#[allow(dead_code)]
pub fn test_config(coordinator_url: &str) -> (CollectorConfig, TempDir) {
    let dir = TempDir::new().expect("temp dir");
    let config = CollectorConfig::builder()
        .state_dir(dir.path().to_path_buf())
        .coordinator_base_url(coordinator_url)
        .build()
        .expect("test config builds");
    (config, dir)
}

/// Lease body as the coordinator returns it
#[allow(dead_code)]
pub fn lease_json(id: i64, account: &str, task_type: &str) -> String {
    format!(
        r#"{{"success":true,"data":{{"id":{id},"account_id":"{account}","task_type":"{task_type}","data_start_date":"2025-01-01","data_end_date":"2025-01-02"}}}}"#
    )
}
