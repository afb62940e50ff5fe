//! Merchant review replies
//!
//! The backend queues replies for reviews that need answering; this
//! module posts them through the account's live page (the portal only
//! accepts replies carrying the browser's full cookie set) and reports
//! each outcome to the coordinator log sink. Runs opportunistically
//! after a successful keepalive.

use std::sync::Arc;

use chromiumoxide::page::Page;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::coordinator::{CoordinatorClient, LogRecord};
use crate::error::CollectorResult;
use crate::extractors::in_page_fetch;

/// Post every pending reply for an account. Returns how many were
/// delivered; individual failures are logged and skipped.
pub async fn process_pending(
    coordinator: &Arc<CoordinatorClient>,
    page: &Page,
    account: &str,
) -> CollectorResult<usize> {
    let pending = coordinator.pending_review_replies(account).await?;
    if pending.is_empty() {
        return Ok(0);
    }
    info!(account = account, pending = pending.len(), "posting review replies");

    let today = Utc::now().format("%Y-%m-%d").to_string();
    let mut delivered = 0;

    for reply in pending {
        let path = format!(
            "/api/review/reply?platform={}&review_id={}&content={}",
            reply.platform,
            reply.review_id,
            urlencoded(&reply.reply_text),
        );
        let outcome = in_page_fetch(page, &path).await;
        let (status, error) = match &outcome {
            Ok(body) if body.get("code").and_then(serde_json::Value::as_i64) == Some(200) => {
                delivered += 1;
                (2, String::new())
            }
            Ok(body) => (1, format!("portal rejected reply: {body}")),
            Err(e) => (1, e.to_string()),
        };
        if status == 1 {
            warn!(account = account, review = %reply.review_id, error = %error, "review reply failed");
        } else {
            debug!(account = account, review = %reply.review_id, "review reply posted");
        }

        let record = LogRecord {
            account_id: account.to_string(),
            shop_id: String::new(),
            table_name: "review_reply".to_string(),
            data_date_start: today.clone(),
            data_date_end: today.clone(),
            upload_status: status,
            record_count: u64::from(status == 2),
            error_message: error,
        };
        if let Err(e) = coordinator.log_record(&record).await {
            warn!(account = account, error = %e, "review reply log record failed");
        }
    }

    Ok(delivered)
}

/// Unread count from the portal message centre. Read in-page for the
/// same cookie reasons as the replies; the count feeds operator logs,
/// nothing downstream depends on it.
pub async fn unread_message_count(page: &Page, signature: &str) -> CollectorResult<u64> {
    let path = format!("/api/message/list?status=unread&mtgsig={signature}");
    let body = in_page_fetch(page, &path).await?;
    Ok(body
        .get("data")
        .and_then(|data| data.get("total"))
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(0))
}

fn urlencoded(text: &str) -> String {
    url::form_urlencoded::byte_serialize(text.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_text_is_url_encoded() {
        assert_eq!(urlencoded("thanks & welcome"), "thanks+%26+welcome");
        assert_eq!(urlencoded("好评"), "%E5%A5%BD%E8%AF%84");
    }
}
