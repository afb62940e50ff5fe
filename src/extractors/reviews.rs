//! Review extractors
//!
//! Review listings page through the portal API per platform; review
//! summaries are read through an in-page fetch so the browser sends
//! the portal's fingerprinting cookies along with the request.

use serde_json::Value;
use tracing::debug;

use crate::auth;
use crate::error::{CollectorError, CollectorResult};
use crate::products::{Product, TaskResult};

use super::{ExtractorContext, fold_outcome, log_upload, rows_of, upload_rows};

/// Upper bound of listing pages fetched per platform
const MAX_LISTING_PAGES: u32 = 20;

pub async fn run_review(
    ctx: &ExtractorContext<'_>,
    product: Product,
) -> CollectorResult<TaskResult> {
    let platform = product.review_platform().ok_or_else(|| {
        CollectorError::Validation(format!("{product} is not a review product"))
    })?;

    let outcome = match product {
        Product::DianpingReview | Product::MeituanReview => listing(ctx, product, platform).await,
        _ => summary(ctx, product, platform).await,
    };
    let result = fold_outcome(product, outcome)?;
    log_upload(ctx, product, "", result.records, result.error.as_deref()).await;
    Ok(result)
}

/// Page through the review listing until a page comes back empty.
/// A window that still has rows at the page cap falls back to the
/// portal's export path, which has no such cap.
async fn listing(
    ctx: &ExtractorContext<'_>,
    product: Product,
    platform: u8,
) -> CollectorResult<u64> {
    let mut total = 0u64;
    let mut exhausted = false;

    for page_no in 1..=MAX_LISTING_PAGES {
        let data = ctx
            .portal
            .review_list(ctx.session, platform, ctx.window, page_no)
            .await?;
        let mut rows = rows_of(&data);
        if rows.is_empty() {
            exhausted = true;
            break;
        }
        for row in &mut rows {
            if let Some(object) = row.as_object_mut() {
                object.insert("account_id".into(), Value::String(ctx.session.account.clone()));
                object.insert("platform".into(), Value::from(platform));
            }
        }
        let accepted = upload_rows(ctx, product, &rows).await?;
        debug!(product = %product, page = page_no, accepted = accepted, "review page uploaded");
        total += accepted;
    }

    if !exhausted {
        debug!(product = %product, "listing truncated at page cap, switching to export");
        total += exported(ctx, product, platform).await?;
    }

    Ok(total)
}

/// Export the full review window through the download centre and
/// upload the artifact's rows
async fn exported(
    ctx: &ExtractorContext<'_>,
    product: Product,
    platform: u8,
) -> CollectorResult<u64> {
    let entry_id = ctx
        .portal
        .trigger_review_export(ctx.session, platform, ctx.window)
        .await?;
    let file_url = ctx
        .portal
        .wait_for_artifact(
            ctx.session,
            entry_id,
            20,
            std::time::Duration::from_secs(3),
        )
        .await?;
    let bytes = ctx.portal.download(ctx.session, &file_url).await?;
    let path = ctx
        .artifacts
        .store(product, &ctx.session.account, ctx.window, &bytes)?;

    let rows = super::spreadsheet::read_rows(&path)?;
    let bodies: Vec<Value> = rows
        .iter()
        .map(|row| {
            super::columns::row_to_upload_body(
                row,
                super::columns::REVIEW_EXPORT_COLUMNS,
                &ctx.session.account,
                ctx.window,
            )
        })
        .collect();
    let accepted = upload_rows(ctx, product, &bodies).await?;
    ctx.artifacts.discard(&path);
    Ok(accepted)
}

/// Fetch the review summary through the page so the request carries
/// the browser's full cookie set, then upload it as a single row.
async fn summary(
    ctx: &ExtractorContext<'_>,
    product: Product,
    platform: u8,
) -> CollectorResult<u64> {
    let url = format!(
        "/api/review/summary?platform={platform}&begin_date={}&end_date={}&mtgsig={}",
        ctx.window.start_str(),
        ctx.window.end_str(),
        ctx.session.signature,
    );
    let body = super::in_page_fetch(ctx.page, &url).await?;

    if let Some(signal) = auth::classify_api(200, &body) {
        return Err(CollectorError::AuthInvalid {
            account: ctx.session.account.clone(),
            detail: signal.to_string(),
        });
    }

    let mut row = body.get("data").cloned().unwrap_or(Value::Null);
    if row.is_null() {
        return Ok(0);
    }
    if let Some(object) = row.as_object_mut() {
        object.insert("account_id".into(), Value::String(ctx.session.account.clone()));
        object.insert("platform".into(), Value::from(platform));
        object.insert("data_date_start".into(), Value::String(ctx.window.start_str()));
        object.insert("data_date_end".into(), Value::String(ctx.window.end_str()));
    }

    upload_rows(ctx, product, std::slice::from_ref(&row)).await
}

