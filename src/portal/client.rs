//! Raw HTTP client for the merchant portal
//!
//! Calls portal JSON endpoints directly with the account's cookies and
//! the `mtgsig` signature as a query parameter. Browser navigation is
//! the session pool's job; this client covers the API surface behind
//! it: report templates, the download centre, review listing/export,
//! traffic data and the finance balance.

use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth;
use crate::error::{CollectorError, CollectorResult};
use crate::products::DateWindow;
use crate::utils::constants::{HTTP_API_TIMEOUT, HTTP_CONNECT_TIMEOUT, HTTP_DOWNLOAD_TIMEOUT};

use super::PortalSession;

const PATH_TEMPLATE_LIST: &str = "/api/report/template/list";
const PATH_TEMPLATE_SAVE: &str = "/api/report/template/save";
const PATH_REPORT_GENERATE: &str = "/api/report/generate";
const PATH_DOWNLOAD_LIST: &str = "/api/report/download/list";
const PATH_REVIEW_LIST: &str = "/api/review/list";
const PATH_REVIEW_EXPORT: &str = "/api/review/export";
const PATH_TRAFFIC_STATS: &str = "/api/traffic/stats";
const PATH_FINANCE_BALANCE: &str = "/api/finance/balance";

/// Download-centre entry states
const DOWNLOAD_READY: i64 = 2;
const DOWNLOAD_FAILED: i64 = 3;

/// One report template known to the portal
#[derive(Debug, Clone)]
pub struct TemplateInfo {
    pub id: i64,
    pub name: String,
}

/// One download-centre entry
#[derive(Debug, Clone)]
pub struct DownloadEntry {
    pub id: i64,
    pub status: i64,
    pub file_url: Option<String>,
}

/// Portal HTTP client
#[derive(Clone)]
pub struct PortalClient {
    http: reqwest::Client,
    download_http: reqwest::Client,
    base_url: String,
}

impl PortalClient {
    pub fn new(base_url: &str) -> CollectorResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .timeout(HTTP_API_TIMEOUT)
            .build()?;
        let download_http = reqwest::Client::builder()
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .timeout(HTTP_DOWNLOAD_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            download_http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// POST a portal API call and unwrap its envelope.
    ///
    /// Invalidation signals (HTTP 401, codes 401/606, the contract
    /// message markers) surface as `AuthInvalid`; other non-success
    /// envelopes as plain errors.
    async fn call(
        &self,
        session: &PortalSession,
        path: &str,
        body: &Value,
    ) -> CollectorResult<Value> {
        let url = format!("{}{}?mtgsig={}", self.base_url, path, session.signature);
        let response = self
            .http
            .post(&url)
            .header(reqwest::header::COOKIE, session.cookie_header())
            .json(body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let value: Value = response.json().await.unwrap_or(Value::Null);

        if let Some(signal) = auth::classify_api(status, &value) {
            return Err(CollectorError::AuthInvalid {
                account: session.account.clone(),
                detail: signal.to_string(),
            });
        }
        if status >= 400 {
            return Err(CollectorError::HttpStatus { status, url });
        }

        let code = value.get("code").and_then(Value::as_i64).unwrap_or(0);
        if code != 0 && code != 200 {
            let msg = value
                .get("msg")
                .or_else(|| value.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("no message");
            return Err(CollectorError::Other(format!(
                "portal {path} returned code {code}: {msg}"
            )));
        }

        Ok(value.get("data").cloned().unwrap_or(Value::Null))
    }

    /// List the account's report templates
    pub async fn list_templates(
        &self,
        session: &PortalSession,
    ) -> CollectorResult<Vec<TemplateInfo>> {
        let data = self.call(session, PATH_TEMPLATE_LIST, &json!({})).await?;
        let items = data
            .get("templates")
            .or(Some(&data))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(items
            .iter()
            .filter_map(|item| {
                Some(TemplateInfo {
                    id: item.get("id").and_then(Value::as_i64)?,
                    name: item.get("name").and_then(Value::as_str)?.to_string(),
                })
            })
            .collect())
    }

    /// Create a report template with the given ordered metric codes,
    /// returning the new template id
    pub async fn create_template(
        &self,
        session: &PortalSession,
        name: &str,
        metric_codes: &[&str],
    ) -> CollectorResult<i64> {
        let body = json!({ "name": name, "metrics": metric_codes });
        let data = self.call(session, PATH_TEMPLATE_SAVE, &body).await?;
        data.get("id")
            .or_else(|| data.get("templates_id"))
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                CollectorError::Other("template save response carried no id".into())
            })
    }

    /// Queue a report generation in the download centre, returning the
    /// download entry id
    pub async fn generate_report(
        &self,
        session: &PortalSession,
        template_id: i64,
        report_type: &str,
        window: &DateWindow,
    ) -> CollectorResult<i64> {
        let body = json!({
            "template_id": template_id,
            "report_type": report_type,
            "begin_date": window.start_str(),
            "end_date": window.end_str(),
        });
        let data = self.call(session, PATH_REPORT_GENERATE, &body).await?;
        data.get("download_id")
            .or_else(|| data.get("id"))
            .and_then(Value::as_i64)
            .ok_or_else(|| CollectorError::Other("report generate returned no download id".into()))
    }

    /// List the download-centre queue
    pub async fn download_entries(
        &self,
        session: &PortalSession,
    ) -> CollectorResult<Vec<DownloadEntry>> {
        let data = self.call(session, PATH_DOWNLOAD_LIST, &json!({})).await?;
        let items = data
            .get("entries")
            .or(Some(&data))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(items
            .iter()
            .filter_map(|item| {
                Some(DownloadEntry {
                    id: item.get("id").and_then(Value::as_i64)?,
                    status: item.get("status").and_then(Value::as_i64).unwrap_or(0),
                    file_url: item
                        .get("file_url")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                })
            })
            .collect())
    }

    /// Poll the download centre until the entry is ready and return its
    /// file URL. One poll per `poll_interval`, bounded by `max_polls`.
    pub async fn wait_for_artifact(
        &self,
        session: &PortalSession,
        entry_id: i64,
        max_polls: u32,
        poll_interval: Duration,
    ) -> CollectorResult<String> {
        for poll in 0..max_polls {
            let entries = self.download_entries(session).await?;
            if let Some(entry) = entries.iter().find(|e| e.id == entry_id) {
                match entry.status {
                    DOWNLOAD_READY => {
                        if let Some(url) = &entry.file_url {
                            return Ok(url.clone());
                        }
                        return Err(CollectorError::ArtifactInvalid(format!(
                            "download entry {entry_id} ready but has no file URL"
                        )));
                    }
                    DOWNLOAD_FAILED => {
                        return Err(CollectorError::ArtifactInvalid(format!(
                            "download entry {entry_id} failed portal-side"
                        )));
                    }
                    _ => {
                        debug!(entry = entry_id, poll = poll, "artifact not ready yet");
                    }
                }
            }
            tokio::time::sleep(poll_interval).await;
        }
        Err(CollectorError::ArtifactInvalid(format!(
            "download entry {entry_id} never became ready"
        )))
    }

    /// Fetch an artifact's bytes with the download timeout
    pub async fn download(
        &self,
        session: &PortalSession,
        file_url: &str,
    ) -> CollectorResult<Vec<u8>> {
        let url = if file_url.starts_with("http") {
            file_url.to_string()
        } else {
            format!("{}{}", self.base_url, file_url)
        };
        let response = self
            .download_http
            .get(&url)
            .header(reqwest::header::COOKIE, session.cookie_header())
            .send()
            .await?;
        let status = response.status().as_u16();
        if status >= 400 {
            return Err(CollectorError::HttpStatus { status, url });
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// One page of the review listing. `platform`: 0 Dianping, 1 Meituan.
    pub async fn review_list(
        &self,
        session: &PortalSession,
        platform: u8,
        window: &DateWindow,
        page_no: u32,
    ) -> CollectorResult<Value> {
        let body = json!({
            "platform": platform,
            "begin_date": window.start_str(),
            "end_date": window.end_str(),
            "page": page_no,
            "page_size": 50,
        });
        self.call(session, PATH_REVIEW_LIST, &body).await
    }

    /// Trigger a review export into the download centre
    pub async fn trigger_review_export(
        &self,
        session: &PortalSession,
        platform: u8,
        window: &DateWindow,
    ) -> CollectorResult<i64> {
        let body = json!({
            "platform": platform,
            "begin_date": window.start_str(),
            "end_date": window.end_str(),
        });
        let data = self.call(session, PATH_REVIEW_EXPORT, &body).await?;
        data.get("download_id")
            .or_else(|| data.get("id"))
            .and_then(Value::as_i64)
            .ok_or_else(|| CollectorError::Other("review export returned no download id".into()))
    }

    /// Traffic statistics for one shop over the window
    pub async fn traffic_stats(
        &self,
        session: &PortalSession,
        shop_id: &str,
        window: &DateWindow,
    ) -> CollectorResult<Value> {
        let body = json!({
            "shop_id": shop_id,
            "begin_date": window.start_str(),
            "end_date": window.end_str(),
        });
        self.call(session, PATH_TRAFFIC_STATS, &body).await
    }

    /// Account finance balance
    pub async fn finance_balance(&self, session: &PortalSession) -> CollectorResult<Value> {
        let data = self.call(session, PATH_FINANCE_BALANCE, &json!({})).await;
        if let Err(e) = &data {
            warn!(account = %session.account, error = %e, "finance balance fetch failed");
        }
        data
    }
}
