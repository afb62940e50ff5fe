//! Store-statistics extractor
//!
//! Harvests per-shop traffic statistics from the traffic-analysis API
//! and refreshes the shared request signature from the live page's
//! cookies. Downstream extractors in the same task reuse that
//! signature, so this product always runs first in the `all` sequence.

use serde_json::Value;
use tracing::debug;

use crate::auth;
use crate::error::CollectorResult;
use crate::portal::synthesize_signature;
use crate::products::{Product, TaskResult};

use super::{ExtractorContext, fold_outcome, log_upload, rows_of, upload_rows};

/// Run the extractor. Returns the product result and the refreshed
/// signature (the previous one when no fresh cookies were readable).
pub async fn run(ctx: &ExtractorContext<'_>) -> CollectorResult<(TaskResult, String)> {
    let outcome = collect(ctx).await;
    let result = fold_outcome(Product::StoreStats, outcome)?;

    // Refresh the shared signature from whatever the page holds now;
    // the navigation that preceded this extractor rotated the
    // fingerprinting cookies.
    let signature = match auth::read_page_cookies(ctx.page).await {
        Ok(cookies) if !cookies.is_empty() => synthesize_signature(&cookies),
        _ => ctx.session.signature.clone(),
    };

    Ok((result, signature))
}

async fn collect(ctx: &ExtractorContext<'_>) -> CollectorResult<u64> {
    let mut total = 0u64;

    // Balance rides along with the traffic run for operator visibility;
    // a failure here is logged by the client and does not gate the rows
    if let Ok(balance) = ctx.portal.finance_balance(ctx.session).await {
        debug!(account = %ctx.session.account, balance = %balance, "finance balance");
    }

    for shop in ctx.shops {
        let data = ctx
            .portal
            .traffic_stats(ctx.session, &shop.shop_id, ctx.window)
            .await?;

        let rows: Vec<Value> = rows_of(&data)
            .into_iter()
            .map(|mut row| {
                if let Some(object) = row.as_object_mut() {
                    object.insert("account_id".into(), Value::String(ctx.session.account.clone()));
                    object.insert("shop_id".into(), Value::String(shop.shop_id.clone()));
                    object.insert("shop_name".into(), Value::String(shop.shop_name.clone()));
                    object.insert(
                        "data_date_start".into(),
                        Value::String(ctx.window.start_str()),
                    );
                    object.insert("data_date_end".into(), Value::String(ctx.window.end_str()));
                }
                row
            })
            .collect();

        let accepted = upload_rows(ctx, Product::StoreStats, &rows).await?;
        debug!(shop = %shop.shop_id, rows = rows.len(), accepted = accepted, "store stats uploaded");
        log_upload(ctx, Product::StoreStats, &shop.shop_id, accepted, None).await;
        total += accepted;
    }

    Ok(total)
}
