//! In-browser authentication state machine
//!
//! Detects login invalidation from navigations and portal API
//! responses, performs the single cookie-based re-login a task is
//! allowed, and fans the invalidation report out to the coordinator.
//!
//! States: Valid → Re-login → (Valid | Invalid). Invalid is terminal
//! for the current task.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chromiumoxide::page::Page;
use serde_json::Value;
use tracing::{info, warn};

use crate::coordinator::{CoordinatorClient, LogRecord, to_cookie_header};
use crate::error::{CollectorError, CollectorResult};
use crate::products::{DateWindow, Product, TaskResult};
use crate::session_pool::{ContextHandle, SessionPool};
use crate::utils::constants::{LIGHT_PAGE_PATH, LOGIN_PROBE_TIMEOUT_SECS, MIN_AUTHED_BODY_BYTES};
use crate::utils::timeout::with_page_timeout;

/// Message substrings that prove the login state is gone.
///
/// These are part of the portal wire contract (both the English and
/// the portal's native phrasing), the one place string matching on
/// errors is sanctioned.
const INVALID_MESSAGE_MARKERS: [&str; 6] = [
    "not logged in",
    "login state expired",
    "please re-login",
    "未登录",
    "登录状态已过期",
    "请重新登录",
];

/// API response codes that prove the login state is gone
const INVALID_API_CODES: [i64; 2] = [401, 606];

/// One observable proving the account's cookies no longer authenticate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationSignal {
    /// Navigation was redirected to a login URL
    LoginRedirect(String),
    /// Page body implausibly small after domcontentloaded
    EmptyBody(usize),
    /// HTTP 401 from a portal API
    ApiStatus(u16),
    /// Portal JSON envelope carried an invalidation code
    ApiCode(i64),
    /// Portal JSON message matched an invalidation marker
    ApiMessage(String),
}

impl fmt::Display for InvalidationSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoginRedirect(url) => write!(f, "redirected to login: {url}"),
            Self::EmptyBody(len) => write!(f, "page body only {len} bytes"),
            Self::ApiStatus(status) => write!(f, "portal API returned HTTP {status}"),
            Self::ApiCode(code) => write!(f, "portal API code {code}"),
            Self::ApiMessage(msg) => write!(f, "portal API message: {msg}"),
        }
    }
}

/// Classify the outcome of a page navigation
#[must_use]
pub fn classify_navigation(final_url: &str, body_len: usize) -> Option<InvalidationSignal> {
    if final_url.to_lowercase().contains("login") {
        return Some(InvalidationSignal::LoginRedirect(final_url.to_string()));
    }
    if body_len < MIN_AUTHED_BODY_BYTES {
        return Some(InvalidationSignal::EmptyBody(body_len));
    }
    None
}

/// Classify a portal API response (HTTP status plus parsed JSON body)
#[must_use]
pub fn classify_api(status: u16, body: &Value) -> Option<InvalidationSignal> {
    if status == 401 {
        return Some(InvalidationSignal::ApiStatus(status));
    }
    if let Some(code) = body.get("code").and_then(Value::as_i64) {
        if INVALID_API_CODES.contains(&code) {
            return Some(InvalidationSignal::ApiCode(code));
        }
    }
    let message = body
        .get("msg")
        .or_else(|| body.get("message"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    let lowered = message.to_lowercase();
    for marker in INVALID_MESSAGE_MARKERS {
        if lowered.contains(&marker.to_lowercase()) {
            return Some(InvalidationSignal::ApiMessage(message.to_string()));
        }
    }
    None
}

/// Navigate to the lightweight authenticated page and verify the login
/// still holds.
pub async fn probe_login(
    page: &Page,
    portal_base_url: &str,
    account: &str,
) -> CollectorResult<()> {
    let url = format!("{portal_base_url}{LIGHT_PAGE_PATH}");

    with_page_timeout(
        async {
            page.goto(url.as_str()).await?;
            Ok(())
        },
        LOGIN_PROBE_TIMEOUT_SECS,
        "login probe navigation",
    )
    .await?;

    let final_url = page.url().await?.unwrap_or_default();
    let body_len = page.content().await.map(|c| c.len()).unwrap_or(0);

    match classify_navigation(&final_url, body_len) {
        None => Ok(()),
        Some(signal) => Err(CollectorError::AuthInvalid {
            account: account.to_string(),
            detail: signal.to_string(),
        }),
    }
}

/// One cookie-based re-login attempt (task context only).
///
/// Fetches the account's current cookie set from the coordinator,
/// atomically replaces the context (remove, recreate in the same
/// account slot) and re-probes the light page. On success the task
/// continues from where it left off.
pub async fn relogin(
    pool: &SessionPool,
    coordinator: &Arc<CoordinatorClient>,
    portal_base_url: &str,
    account: &str,
) -> CollectorResult<ContextHandle> {
    info!(account = account, "attempting cookie re-login");

    let account_info = coordinator.account_info(account).await?;
    let cookies: HashMap<String, String> = account_info.cookie_map();
    if cookies.is_empty() {
        return Err(CollectorError::AuthInvalid {
            account: account.to_string(),
            detail: "coordinator has no cookies for account".into(),
        });
    }

    pool.remove_context(account).await;
    let handle = pool.get_context(account, Some(cookies)).await?;

    match probe_login(&handle.page, portal_base_url, account).await {
        Ok(()) => {
            info!(account = account, "re-login succeeded");
            Ok(handle)
        }
        Err(e) => {
            warn!(account = account, error = %e, "re-login probe still unauthenticated");
            pool.remove_context(account).await;
            Err(e)
        }
    }
}

/// Invalidation fan-out: report the dead login on all three endpoints.
///
/// Order matters for the coordinator's bookkeeping: account status
/// first, then the log sink, then the batch status with the active
/// product failed and the rest not-run. Each call is best-effort.
pub async fn report_invalidation(
    coordinator: &Arc<CoordinatorClient>,
    account: &str,
    window: &DateWindow,
    active_product: Product,
    detail: &str,
) {
    if let Err(e) = coordinator.report_account_invalid(account).await {
        warn!(account = account, error = %e, "account-invalid report failed");
    }

    let record = LogRecord {
        account_id: account.to_string(),
        shop_id: String::new(),
        table_name: active_product.as_str().to_string(),
        data_date_start: window.start_str(),
        data_date_end: window.end_str(),
        upload_status: 1,
        record_count: 0,
        error_message: detail.to_string(),
    };
    if let Err(e) = coordinator.log_record(&record).await {
        warn!(account = account, error = %e, "invalidation log record failed");
    }

    let results: Vec<TaskResult> = Product::ALL
        .into_iter()
        .map(|product| {
            if product == active_product {
                TaskResult::failure(product, detail.to_string())
            } else {
                TaskResult::not_run(product)
            }
        })
        .collect();
    if let Err(e) = coordinator
        .report_batch_status(account, window, &results)
        .await
    {
        warn!(account = account, error = %e, "invalidation batch status report failed");
    }
}

/// Snapshot the page's cookie jar into a plain map
pub async fn read_page_cookies(page: &Page) -> CollectorResult<HashMap<String, String>> {
    let cookies = page.get_cookies().await?;
    Ok(cookies
        .into_iter()
        .map(|c| (c.name, c.value))
        .collect())
}

/// Render a cookie map as a request header value
#[must_use]
pub fn cookie_header(cookies: &HashMap<String, String>) -> String {
    to_cookie_header(cookies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn login_redirect_is_invalidation() {
        let signal = classify_navigation("https://e.dianping.com/login?redirect=home", 4096);
        assert!(matches!(signal, Some(InvalidationSignal::LoginRedirect(_))));
    }

    #[test]
    fn short_body_is_invalidation() {
        let signal = classify_navigation("https://e.dianping.com/app/merchant-platform/home", 40);
        assert_eq!(signal, Some(InvalidationSignal::EmptyBody(40)));
    }

    #[test]
    fn healthy_navigation_passes() {
        let signal = classify_navigation("https://e.dianping.com/app/merchant-platform/home", 4096);
        assert_eq!(signal, None);
    }

    #[test]
    fn api_codes_and_status_detected() {
        assert_eq!(
            classify_api(401, &json!({})),
            Some(InvalidationSignal::ApiStatus(401))
        );
        assert_eq!(
            classify_api(200, &json!({"code": 606, "msg": "x"})),
            Some(InvalidationSignal::ApiCode(606))
        );
        assert_eq!(
            classify_api(200, &json!({"code": 401})),
            Some(InvalidationSignal::ApiCode(401))
        );
        assert_eq!(classify_api(200, &json!({"code": 200, "msg": "ok"})), None);
    }

    #[test]
    fn api_message_markers_detected() {
        let body = json!({"code": 200, "msg": "User not logged in, please retry"});
        assert!(matches!(
            classify_api(200, &body),
            Some(InvalidationSignal::ApiMessage(_))
        ));

        let body = json!({"code": 200, "message": "登录状态已过期"});
        assert!(matches!(
            classify_api(200, &body),
            Some(InvalidationSignal::ApiMessage(_))
        ));

        let body = json!({"code": 200, "msg": "Please Re-Login to continue"});
        assert!(matches!(
            classify_api(200, &body),
            Some(InvalidationSignal::ApiMessage(_))
        ));
    }

    #[test]
    fn ordinary_errors_are_not_invalidation() {
        let body = json!({"code": 500, "msg": "internal error"});
        assert_eq!(classify_api(200, &body), None);
        assert_eq!(classify_api(503, &body), None);
    }
}
