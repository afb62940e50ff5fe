//! Per-product extractors
//!
//! Each extractor downloads, parses and uploads the rows of one data
//! product. Extractors receive already-initialised cookies, signature
//! and shop list through [`ExtractorContext`] and never re-fetch them;
//! the store-statistics extractor additionally returns the refreshed
//! signature the rest of the task reuses.
//!
//! Error policy: every failure is folded into the product's
//! `TaskResult` except login invalidation, which short-circuits the
//! task so the orchestrator can attempt its one re-login.

pub mod columns;
pub mod reports;
pub mod reviews;
pub mod spreadsheet;
pub mod store_stats;

use std::sync::Arc;

use chromiumoxide::page::Page;
use serde_json::Value;
use tracing::{debug, warn};

use crate::artifacts::ArtifactStore;
use crate::coordinator::{CoordinatorClient, LogRecord, Shop};
use crate::error::{CollectorError, CollectorResult};
use crate::portal::{PortalClient, PortalSession};
use crate::products::{DateWindow, Product, TaskResult};

/// Everything an extractor receives from the orchestrator
pub struct ExtractorContext<'a> {
    pub portal: &'a PortalClient,
    pub coordinator: &'a Arc<CoordinatorClient>,
    pub artifacts: &'a ArtifactStore,
    pub page: &'a Page,
    pub session: &'a PortalSession,
    pub shops: &'a [Shop],
    pub window: &'a DateWindow,
    pub template_id: i64,
    pub all_codes_only: bool,
}

/// Run a single product extractor.
///
/// `StoreStats` run through here discards the refreshed signature;
/// the `all` sequence calls [`store_stats::run`] directly to keep it.
pub async fn run_product(
    ctx: &ExtractorContext<'_>,
    product: Product,
) -> CollectorResult<TaskResult> {
    match product {
        Product::StoreStats => store_stats::run(ctx).await.map(|(result, _)| result),
        Product::KewenDailyReport | Product::TradeAnalysis => {
            reports::run_report(ctx, product).await
        }
        Product::DianpingReview
        | Product::MeituanReview
        | Product::DianpingReviewSummary
        | Product::MeituanReviewSummary => reviews::run_review(ctx, product).await,
    }
}

/// Fold an extractor outcome into a `TaskResult`, letting only
/// `AuthInvalid` escape as an error
pub(crate) fn fold_outcome(
    product: Product,
    outcome: CollectorResult<u64>,
) -> CollectorResult<TaskResult> {
    match outcome {
        Ok(records) => Ok(TaskResult::success(product, records)),
        Err(e @ CollectorError::AuthInvalid { .. }) => Err(e),
        Err(e) => {
            warn!(product = %product, error = %e, "extractor failed");
            Ok(TaskResult::failure(product, e.to_string()))
        }
    }
}

/// Upload rows one by one; a rejected row is logged and not counted
pub(crate) async fn upload_rows(
    ctx: &ExtractorContext<'_>,
    product: Product,
    rows: &[Value],
) -> CollectorResult<u64> {
    let mut accepted = 0u64;
    for row in rows {
        if ctx.coordinator.upload_product_row(product, row).await? {
            accepted += 1;
        } else {
            debug!(product = %product, "row rejected by upload endpoint");
        }
    }
    Ok(accepted)
}

/// Report a product upload to the coordinator log sink
pub(crate) async fn log_upload(
    ctx: &ExtractorContext<'_>,
    product: Product,
    shop_id: &str,
    records: u64,
    error: Option<&str>,
) {
    let record = LogRecord {
        account_id: ctx.session.account.clone(),
        shop_id: shop_id.to_string(),
        table_name: product.as_str().to_string(),
        data_date_start: ctx.window.start_str(),
        data_date_end: ctx.window.end_str(),
        upload_status: if error.is_none() { 2 } else { 1 },
        record_count: records,
        error_message: error.unwrap_or_default().to_string(),
    };
    if let Err(e) = ctx.coordinator.log_record(&record).await {
        warn!(product = %product, error = %e, "log record delivery failed");
    }
}

/// Run a same-origin fetch inside a page and parse the JSON reply.
///
/// Used where the portal only answers requests carrying the browser's
/// full fingerprinting cookie set (review summaries, reply posting).
pub(crate) async fn in_page_fetch(page: &Page, path: &str) -> CollectorResult<Value> {
    let js = format!(
        "(async () => {{ const r = await fetch({path:?}, {{credentials: 'include'}}); return await r.text(); }})()"
    );
    let evaluation = page.evaluate(js).await?;
    let text: String = evaluation
        .into_value()
        .map_err(|e| CollectorError::Other(format!("in-page fetch returned no text: {e}")))?;
    serde_json::from_str(&text)
        .map_err(|e| CollectorError::Other(format!("in-page fetch returned non-JSON body: {e}")))
}

/// Pull an array of rows out of a portal data payload, accepting
/// either `{"rows": [...]}` or a bare array
pub(crate) fn rows_of(data: &Value) -> Vec<Value> {
    data.get("rows")
        .or(Some(data))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_keeps_auth_invalid_as_error() {
        let folded = fold_outcome(Product::StoreStats, Ok(5)).expect("success folds");
        assert_eq!(folded.records, 5);

        let folded = fold_outcome(
            Product::StoreStats,
            Err(CollectorError::Other("portal flaked".into())),
        )
        .expect("plain errors fold to failure");
        assert_eq!(folded.status, crate::products::ProductStatus::Failed);

        let escaped = fold_outcome(
            Product::StoreStats,
            Err(CollectorError::AuthInvalid {
                account: "A1".into(),
                detail: "redirect".into(),
            }),
        );
        assert!(escaped.is_err());
    }

    #[test]
    fn rows_of_accepts_both_shapes() {
        let wrapped = serde_json::json!({"rows": [{"a": 1}, {"a": 2}]});
        assert_eq!(rows_of(&wrapped).len(), 2);

        let bare = serde_json::json!([{"a": 1}]);
        assert_eq!(rows_of(&bare).len(), 1);

        let neither = serde_json::json!({"total": 0});
        assert!(rows_of(&neither).is_empty());
    }
}
