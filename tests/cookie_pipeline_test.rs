//! End-to-end test of the cookie upload pipeline
//!
//! Queue → consumer → coordinator dual-endpoint delivery, including
//! the sibling semantics (one endpoint failing still counts as
//! delivered) and the both-failed drop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mockito::Matcher;
use serde_json::json;

use hdp_collector::CookieUploadQueue;
use hdp_collector::coordinator::CoordinatorClient;

mod common;

fn cookies() -> HashMap<String, String> {
    HashMap::from([
        ("token".to_string(), "abc".to_string()),
        ("uid".to_string(), "42".to_string()),
    ])
}

fn queue_for(client: Arc<CoordinatorClient>) -> CookieUploadQueue {
    CookieUploadQueue::start(16, 2, Duration::from_millis(20), move |envelope| {
        let client = client.clone();
        async move {
            client
                .upload_cookies(&envelope.account, &envelope.cookies)
                .await
        }
    })
}

#[tokio::test]
async fn snapshots_reach_both_endpoints() {
    let mut server = mockito::Server::new_async().await;
    let primary = server
        .mock("POST", "/post/cookies")
        .match_body(Matcher::PartialJson(json!({"name": "A1"})))
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    let secondary = server
        .mock("POST", "/post/account_cookie")
        .match_body(Matcher::Json(json!({
            "account": "A1",
            "cookie": "token=abc; uid=42",
        })))
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let client = Arc::new(CoordinatorClient::new(&server.url()).unwrap());
    let queue = queue_for(client);

    assert!(queue.put("A1", cookies()));
    queue.shutdown().await;

    primary.assert_async().await;
    secondary.assert_async().await;
}

#[tokio::test]
async fn one_failing_endpoint_still_counts_as_delivered() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/post/cookies")
        .with_status(404)
        .create_async()
        .await;
    let secondary = server
        .mock("POST", "/post/account_cookie")
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;

    let client = Arc::new(CoordinatorClient::new(&server.url()).unwrap());
    let result = client.upload_cookies("A1", &cookies()).await;
    assert!(result.is_ok(), "sibling endpoint success should deliver");
    secondary.assert_async().await;
}

#[tokio::test]
async fn both_endpoints_failing_is_an_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/post/cookies")
        .with_status(404)
        .create_async()
        .await;
    server
        .mock("POST", "/post/account_cookie")
        .with_status(404)
        .create_async()
        .await;

    let client = Arc::new(CoordinatorClient::new(&server.url()).unwrap());
    let result = client.upload_cookies("A1", &cookies()).await;
    assert!(result.is_err(), "both endpoints failing is abandoned");
}

#[tokio::test]
async fn consumer_flushes_batch_in_enqueue_order() {
    let mut server = mockito::Server::new_async().await;
    let primary = server
        .mock("POST", "/post/cookies")
        .with_status(200)
        .with_body("{}")
        .expect(3)
        .create_async()
        .await;
    server
        .mock("POST", "/post/account_cookie")
        .with_status(200)
        .with_body("{}")
        .expect(3)
        .create_async()
        .await;

    let client = Arc::new(CoordinatorClient::new(&server.url()).unwrap());
    let queue = queue_for(client);

    for _ in 0..3 {
        assert!(queue.put("A1", cookies()));
    }
    queue.shutdown().await;
    primary.assert_async().await;
}
