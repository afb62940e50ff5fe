//! Contract tests for the coordinator HTTP client
//!
//! Exercises the lease/callback protocol, the batch status report and
//! the invalidation fan-out against a mock backend, asserting the wire
//! bodies the coordinator expects.

use std::sync::Arc;

use mockito::Matcher;
use serde_json::json;

use hdp_collector::auth;
use hdp_collector::coordinator::{CallbackStatus, CoordinatorClient};
use hdp_collector::products::{DateWindow, Product, TaskResult};

mod common;

#[tokio::test]
async fn lease_round_trip() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/task/get")
        .match_body(Matcher::Json(json!({"server": "203.0.113.7"})))
        .with_status(200)
        .with_body(common::lease_json(42, "A1", "all"))
        .create_async()
        .await;

    let client = CoordinatorClient::new(&server.url()).unwrap();
    let lease = client
        .lease_task("203.0.113.7")
        .await
        .unwrap()
        .expect("lease should be present");

    assert_eq!(lease.id, 42);
    assert_eq!(lease.account_id, "A1");
    assert_eq!(lease.task_type, "all");
    lease.validate().expect("lease should validate");
    mock.assert_async().await;
}

#[tokio::test]
async fn empty_lease_data_means_no_task() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/task/get")
        .with_status(200)
        .with_body(r#"{"success":true,"data":null}"#)
        .create_async()
        .await;

    let client = CoordinatorClient::new(&server.url()).unwrap();
    let lease = client.lease_task("203.0.113.7").await.unwrap();
    assert!(lease.is_none());
}

#[tokio::test]
async fn callback_carries_status_and_retry_add() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/task/callback")
        .match_body(Matcher::Json(json!({
            "id": 42,
            "status": 2,
            "error_message": "",
            "retry_add": 0,
        })))
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let client = CoordinatorClient::new(&server.url()).unwrap();
    client
        .task_callback(42, CallbackStatus::Succeeded, "", 0)
        .await
        .unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn reset_lease_posts_id_only() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/task/schedule/reset")
        .match_body(Matcher::Json(json!({"id": 42})))
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let client = CoordinatorClient::new(&server.url()).unwrap();
    client.reset_lease(42).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn batch_status_reports_all_seven_products() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/account_task/update_batch")
        .match_body(Matcher::AllOf(vec![
            Matcher::PartialJson(json!({
                "account_id": "A1",
                "data_start_date": "2025-01-01",
                "data_end_date": "2025-01-02",
                "store_stats_status": 2,
                "store_stats_records": 120,
                "kewen_daily_report_status": 3,
                // Products missing from the results are not-run
                "meituan_review_summary_status": 0,
                "dianping_review_summary_status": 0,
            })),
        ]))
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let client = CoordinatorClient::new(&server.url()).unwrap();
    let window = DateWindow::parse("2025-01-01", "2025-01-02").unwrap();
    let results = vec![
        TaskResult::success(Product::StoreStats, 120),
        TaskResult::failure(Product::KewenDailyReport, "artifact invalid"),
    ];
    client
        .report_batch_status("A1", &window, &results)
        .await
        .unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn invalidation_fan_out_hits_all_three_endpoints() {
    let mut server = mockito::Server::new_async().await;
    let account_status = server
        .mock("POST", "/post/platform_accounts")
        .match_body(Matcher::Json(json!({"account": "A1", "auth_status": "invalid"})))
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    let log_sink = server
        .mock("POST", "/log")
        .match_body(Matcher::PartialJson(json!({
            "account_id": "A1",
            "upload_status": 1,
            "table_name": "kewen_daily_report",
        })))
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    let batch = server
        .mock("POST", "/account_task/update_batch")
        .match_body(Matcher::PartialJson(json!({
            "account_id": "A1",
            "kewen_daily_report_status": 3,
            "store_stats_status": 0,
            "trade_analysis_status": 0,
        })))
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let client = Arc::new(CoordinatorClient::new(&server.url()).unwrap());
    let window = DateWindow::parse("2025-01-01", "2025-01-02").unwrap();
    auth::report_invalidation(
        &client,
        "A1",
        &window,
        Product::KewenDailyReport,
        "redirected to login",
    )
    .await;

    account_status.assert_async().await;
    log_sink.assert_async().await;
    batch.assert_async().await;
}

#[tokio::test]
async fn account_info_parses_coordinator_record() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/get/platform_accounts")
        .match_body(Matcher::Json(json!({"account": "A1"})))
        .with_status(200)
        .with_body(
            r#"{"cookie":"token=abc; uid=42","mtgsig":"sig-1","templates_id":17,
                "stores_json":"[{\"shop_id\":\"s1\",\"shop_name\":\"North\"}]",
                "auth_status":"valid","compareRegions_json":"","brands_json":""}"#,
        )
        .create_async()
        .await;

    let client = CoordinatorClient::new(&server.url()).unwrap();
    let info = client.account_info("A1").await.unwrap();
    assert_eq!(info.account, "A1");
    assert_eq!(info.templates_id, 17);
    assert!(!info.is_invalid());
    assert_eq!(info.cookie_map()["token"], "abc");
    assert_eq!(info.shops().len(), 1);
}
