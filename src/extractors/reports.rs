//! Report-centre extractors
//!
//! The two report products share one shape: queue a generation in the
//! portal's download centre, wait for the artifact, download and
//! validate it, then upload its rows. An invalid artifact retries the
//! whole generate-wait-download loop up to three times within the
//! same task.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{CollectorError, CollectorResult};
use crate::products::{Product, TaskResult};

use super::columns::{
    COUPON_TYPE_ALL_CODES, ColumnMapping, DAILY_REPORT_COLUMNS, DAILY_REPORT_COUPON_TYPE_INDEX,
    TRADE_ANALYSIS_COLUMNS,
};
use super::{ExtractorContext, fold_outcome, log_upload, spreadsheet, upload_rows};

/// Generation attempts before giving up on an invalid artifact
const MAX_GENERATION_ATTEMPTS: u32 = 3;

/// Download-centre polling
const DOWNLOAD_POLLS: u32 = 20;
const DOWNLOAD_POLL_INTERVAL: Duration = Duration::from_secs(3);

pub async fn run_report(
    ctx: &ExtractorContext<'_>,
    product: Product,
) -> CollectorResult<TaskResult> {
    let outcome = collect(ctx, product).await;
    let result = fold_outcome(product, outcome)?;
    log_upload(
        ctx,
        product,
        "",
        result.records,
        result.error.as_deref(),
    )
    .await;
    Ok(result)
}

async fn collect(ctx: &ExtractorContext<'_>, product: Product) -> CollectorResult<u64> {
    let mut last_error: Option<CollectorError> = None;

    for attempt in 1..=MAX_GENERATION_ATTEMPTS {
        match generate_and_download(ctx, product).await {
            Ok(records) => return Ok(records),
            Err(e @ CollectorError::ArtifactInvalid(_)) => {
                warn!(
                    product = %product,
                    attempt = attempt,
                    error = %e,
                    "artifact invalid, regenerating"
                );
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or_else(|| {
        CollectorError::ArtifactInvalid("report generation never produced a valid artifact".into())
    }))
}

async fn generate_and_download(
    ctx: &ExtractorContext<'_>,
    product: Product,
) -> CollectorResult<u64> {
    let entry_id = ctx
        .portal
        .generate_report(ctx.session, ctx.template_id, product.as_str(), ctx.window)
        .await?;
    debug!(product = %product, entry = entry_id, "report generation queued");

    let file_url = ctx
        .portal
        .wait_for_artifact(ctx.session, entry_id, DOWNLOAD_POLLS, DOWNLOAD_POLL_INTERVAL)
        .await?;

    let bytes = ctx.portal.download(ctx.session, &file_url).await?;
    let path = ctx
        .artifacts
        .store(product, &ctx.session.account, ctx.window, &bytes)?;

    let rows = spreadsheet::read_rows(&path)?;
    let rows = apply_row_policy(ctx, product, rows);
    let mapping = column_mapping(product);

    let bodies: Vec<Value> = rows
        .iter()
        .map(|row| {
            super::columns::row_to_upload_body(row, mapping, &ctx.session.account, ctx.window)
        })
        .collect();

    let accepted = upload_rows(ctx, product, &bodies).await?;
    info!(
        product = %product,
        rows = rows.len(),
        accepted = accepted,
        "report rows uploaded"
    );

    ctx.artifacts.discard(&path);
    Ok(accepted)
}

fn column_mapping(product: Product) -> &'static [ColumnMapping] {
    match product {
        Product::KewenDailyReport => DAILY_REPORT_COLUMNS,
        _ => TRADE_ANALYSIS_COLUMNS,
    }
}

/// The daily report keeps only "All Codes" coupon-type rows when the
/// policy knob is on; other products pass rows through untouched.
fn apply_row_policy(
    ctx: &ExtractorContext<'_>,
    product: Product,
    rows: Vec<Vec<String>>,
) -> Vec<Vec<String>> {
    if product != Product::KewenDailyReport || !ctx.all_codes_only {
        return rows;
    }
    let before = rows.len();
    let kept: Vec<Vec<String>> = rows
        .into_iter()
        .filter(|row| {
            row.get(DAILY_REPORT_COUPON_TYPE_INDEX)
                .is_some_and(|cell| cell == COUPON_TYPE_ALL_CODES)
        })
        .collect();
    debug!(
        before = before,
        kept = kept.len(),
        "applied All-Codes coupon-type filter"
    );
    kept
}
