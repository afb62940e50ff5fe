//! HTTP client for the coordinator backend
//!
//! Typed wrappers over the coordinator's JSON-over-POST API: task
//! leasing and callbacks, status reporting, account info, cookie and
//! template write-backs, and per-product row uploads. Every call goes
//! through the transient-failure retry helper.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::{CollectorError, CollectorResult, RetryConfig};
use crate::products::{DateWindow, Product, TaskResult};
use crate::utils::constants::{HTTP_API_TIMEOUT, HTTP_CONNECT_TIMEOUT};
use crate::utils::retry::retry_with_backoff;

use super::types::{CallbackStatus, LeaseResponse, LogRecord, PlatformAccount, TaskLease};

// Endpoint paths, relative to the coordinator base URL
const PATH_SCHEDULE_GENERATE: &str = "/task/schedule/generate";
const PATH_TASK_GET: &str = "/task/get";
const PATH_TASK_CALLBACK: &str = "/task/callback";
const PATH_TASK_RESET: &str = "/task/schedule/reset";
const PATH_RESCHEDULE_FAILED: &str = "/task/reschedule_failed";
const PATH_BATCH_STATUS: &str = "/account_task/update_batch";
const PATH_SINGLE_STATUS: &str = "/account_task/update";
const PATH_LOG: &str = "/log";
const PATH_ACCOUNT_INFO: &str = "/get/platform_accounts";
const PATH_ACCOUNT_POST: &str = "/post/platform_accounts";
const PATH_TEMPLATE_POST: &str = "/post/templates_id";
const PATH_COOKIES_PRIMARY: &str = "/post/cookies";
const PATH_COOKIES_SECONDARY: &str = "/post/account_cookie";
const PATH_PENDING_REPLIES: &str = "/get/pending_replies";

/// Client for the coordinator backend
#[derive(Clone)]
pub struct CoordinatorClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryConfig,
}

impl CoordinatorClient {
    /// Build a client against the given base URL
    pub fn new(base_url: &str) -> CollectorResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .timeout(HTTP_API_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry: RetryConfig::default(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// POST a JSON body and return the parsed response body.
    ///
    /// Transient failures (timeouts, 5xx, 429) are retried with
    /// backoff; other non-success statuses surface as `HttpStatus`.
    async fn post_json(&self, path: &str, body: &Value) -> CollectorResult<Value> {
        let url = self.url(path);
        retry_with_backoff(&self.retry, path, || {
            let url = url.clone();
            async move {
                let response = self.http.post(&url).json(body).send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(CollectorError::HttpStatus {
                        status: status.as_u16(),
                        url,
                    });
                }
                if response.content_length() == Some(0) {
                    return Ok(Value::Null);
                }
                let value = response.json::<Value>().await.unwrap_or(Value::Null);
                Ok(value)
            }
        })
        .await
    }

    /// Ask the coordinator to generate today's schedule
    pub async fn generate_schedule(
        &self,
        task_date: &str,
        window: &DateWindow,
    ) -> CollectorResult<()> {
        let body = json!({
            "task_date": task_date,
            "data_start_date": window.start_str(),
            "data_end_date": window.end_str(),
        });
        self.post_json(PATH_SCHEDULE_GENERATE, &body).await?;
        Ok(())
    }

    /// Lease one task for this host. `None` when the queue is empty.
    pub async fn lease_task(&self, server_ip: &str) -> CollectorResult<Option<TaskLease>> {
        let body = json!({ "server": server_ip });
        let value = self.post_json(PATH_TASK_GET, &body).await?;
        let response: LeaseResponse = serde_json::from_value(value)?;
        if !response.success {
            return Ok(None);
        }
        match response.data {
            Some(lease) if !lease.account_id.is_empty() => {
                debug!(lease_id = lease.id, account = %lease.account_id, "leased task");
                Ok(Some(lease))
            }
            _ => Ok(None),
        }
    }

    /// Terminate a lease with its final status
    pub async fn task_callback(
        &self,
        lease_id: i64,
        status: CallbackStatus,
        error_message: &str,
        retry_add: u8,
    ) -> CollectorResult<()> {
        let body = json!({
            "id": lease_id,
            "status": status.as_code(),
            "error_message": error_message,
            "retry_add": retry_add,
        });
        self.post_json(PATH_TASK_CALLBACK, &body).await?;
        Ok(())
    }

    /// Return a lease to the queue (resource-critical preemption)
    pub async fn reset_lease(&self, lease_id: i64) -> CollectorResult<()> {
        let body = json!({ "id": lease_id });
        self.post_json(PATH_TASK_RESET, &body).await?;
        Ok(())
    }

    /// Re-queue eligible failed tasks
    pub async fn reschedule_failed(&self) -> CollectorResult<()> {
        self.post_json(PATH_RESCHEDULE_FAILED, &json!({})).await?;
        Ok(())
    }

    /// Report the per-product outcome of a whole task in one batch.
    ///
    /// The wire body is flat: `<product>_status`, `<product>_records`
    /// and `<product>_error` for each of the seven products; products
    /// missing from `results` are reported not-run.
    pub async fn report_batch_status(
        &self,
        account_id: &str,
        window: &DateWindow,
        results: &[TaskResult],
    ) -> CollectorResult<()> {
        let mut body = serde_json::Map::new();
        body.insert("account_id".into(), json!(account_id));
        body.insert("data_start_date".into(), json!(window.start_str()));
        body.insert("data_end_date".into(), json!(window.end_str()));

        for product in Product::ALL {
            let result = results.iter().find(|r| r.product == product);
            let (status, records, error) = match result {
                Some(r) => (
                    r.status.as_code(),
                    r.records,
                    r.error.clone().unwrap_or_default(),
                ),
                None => (0, 0, String::new()),
            };
            body.insert(format!("{product}_status"), json!(status));
            body.insert(format!("{product}_records"), json!(records));
            body.insert(format!("{product}_error"), json!(error));
        }

        self.post_json(PATH_BATCH_STATUS, &Value::Object(body)).await?;
        Ok(())
    }

    /// Report a single product outcome
    pub async fn report_single_status(
        &self,
        account_id: &str,
        window: &DateWindow,
        result: &TaskResult,
    ) -> CollectorResult<()> {
        let body = json!({
            "account_id": account_id,
            "data_start_date": window.start_str(),
            "data_end_date": window.end_str(),
            "task_name": result.product.as_str(),
            "status": result.status.as_code(),
            "record_count": result.records,
            "error_message": result.error.clone().unwrap_or_default(),
        });
        self.post_json(PATH_SINGLE_STATUS, &body).await?;
        Ok(())
    }

    /// Append a record to the coordinator log sink
    pub async fn log_record(&self, record: &LogRecord) -> CollectorResult<()> {
        let body = serde_json::to_value(record)?;
        self.post_json(PATH_LOG, &body).await?;
        Ok(())
    }

    /// Fetch the coordinator's view of an account
    pub async fn account_info(&self, account: &str) -> CollectorResult<PlatformAccount> {
        let body = json!({ "account": account });
        let value = self.post_json(PATH_ACCOUNT_INFO, &body).await?;
        let mut info: PlatformAccount = serde_json::from_value(value)?;
        if info.account.is_empty() {
            info.account = account.to_string();
        }
        Ok(info)
    }

    /// Mark an account's login as gone
    pub async fn report_account_invalid(&self, account: &str) -> CollectorResult<()> {
        let body = json!({ "account": account, "auth_status": "invalid" });
        self.post_json(PATH_ACCOUNT_POST, &body).await?;
        Ok(())
    }

    /// Write a freshly created template id back on two independent
    /// endpoints. One success is a delivered outcome.
    pub async fn write_back_template_id(
        &self,
        account: &str,
        templates_id: i64,
    ) -> CollectorResult<()> {
        let primary = self
            .post_json(
                PATH_ACCOUNT_POST,
                &json!({ "account": account, "templates_id": templates_id }),
            )
            .await;
        let secondary = self
            .post_json(
                PATH_TEMPLATE_POST,
                &json!({ "name": account, "templates_id": templates_id }),
            )
            .await;

        match (primary, secondary) {
            (Err(e1), Err(e2)) => {
                warn!(account = account, primary = %e1, secondary = %e2,
                    "template write-back failed on both endpoints");
                Err(e1)
            }
            _ => Ok(()),
        }
    }

    /// Upload one cookie snapshot to both backend cookie endpoints.
    ///
    /// The endpoints are siblings, not primary/fallback: delivery on at
    /// least one counts as success; both-failed is an error the queue
    /// consumer logs and drops.
    pub async fn upload_cookies(
        &self,
        account: &str,
        cookies: &HashMap<String, String>,
    ) -> CollectorResult<()> {
        let cookies_json = serde_json::to_string(cookies)?;
        let cookie_header = super::types::to_cookie_header(cookies);
        let refreshed_at = Utc::now().to_rfc3339();

        let primary = self
            .post_json(
                PATH_COOKIES_PRIMARY,
                &json!({
                    "name": account,
                    "cookies_json": cookies_json,
                    "cookie_refreshed_at": refreshed_at,
                }),
            )
            .await;
        let secondary = self
            .post_json(
                PATH_COOKIES_SECONDARY,
                &json!({ "account": account, "cookie": cookie_header }),
            )
            .await;

        match (primary, secondary) {
            (Err(e1), Err(e2)) => Err(CollectorError::Other(format!(
                "cookie upload failed on both endpoints: {e1}; {e2}"
            ))),
            _ => Ok(()),
        }
    }

    /// Reviews queued backend-side for a merchant reply
    pub async fn pending_review_replies(
        &self,
        account: &str,
    ) -> CollectorResult<Vec<super::types::PendingReply>> {
        let body = json!({ "account": account });
        let value = self.post_json(PATH_PENDING_REPLIES, &body).await?;
        let items = match value.get("data") {
            Some(data) => data.clone(),
            None => value,
        };
        Ok(serde_json::from_value(items).unwrap_or_default())
    }

    /// Upload one extracted row for a product. 200/201 = accepted.
    pub async fn upload_product_row(
        &self,
        product: Product,
        row: &Value,
    ) -> CollectorResult<bool> {
        let url = self.url(&format!("/upload/{product}"));
        let response = self.http.post(&url).json(row).send().await?;
        let status = response.status().as_u16();
        Ok(status == 200 || status == 201)
    }
}
