//! Report-template provisioner
//!
//! Tasks need a named report template in the portal whose id the
//! coordinator records for the account. If the template is missing it
//! is created with a fixed, ordered list of metric column codes and
//! the new id is written back to the coordinator.

use std::sync::Arc;

use tracing::{info, warn};

use crate::coordinator::CoordinatorClient;
use crate::error::CollectorResult;
use crate::portal::{PortalClient, PortalSession};

/// Primary template name, created when missing
pub const TEMPLATE_PRIMARY: &str = "Kewen_data";

/// Legacy fallback name still honoured when found
pub const TEMPLATE_FALLBACK: &str = "hdp-all";

/// Metric column codes for a created template, in report column order.
///
/// The downloaded spreadsheet's column layout follows this sequence,
/// and the extractor column mappings in `extractors::columns` index
/// into it. Revise both together.
pub const TEMPLATE_METRIC_COLUMNS: [&str; 12] = [
    "dt",
    "shop_id",
    "shop_name",
    "exposure_uv",
    "visit_uv",
    "visit_pv",
    "coupon_type",
    "coupon_sold_cnt",
    "coupon_used_cnt",
    "order_cnt",
    "order_amt",
    "refund_amt",
];

/// Ensure the portal has a usable report template and the coordinator
/// knows its id.
///
/// Looks for [`TEMPLATE_PRIMARY`] then [`TEMPLATE_FALLBACK`]; when
/// neither exists, creates the primary and writes the id back on two
/// independent coordinator endpoints (one success suffices).
pub async fn ensure_template(
    portal: &PortalClient,
    coordinator: &Arc<CoordinatorClient>,
    session: &PortalSession,
) -> CollectorResult<i64> {
    let templates = portal.list_templates(session).await?;

    for wanted in [TEMPLATE_PRIMARY, TEMPLATE_FALLBACK] {
        if let Some(found) = templates.iter().find(|t| t.name == wanted) {
            info!(
                account = %session.account,
                template = wanted,
                id = found.id,
                "report template already present"
            );
            return Ok(found.id);
        }
    }

    info!(account = %session.account, "creating report template");
    let id = portal
        .create_template(session, TEMPLATE_PRIMARY, &TEMPLATE_METRIC_COLUMNS)
        .await?;

    if let Err(e) = coordinator
        .write_back_template_id(&session.account, id)
        .await
    {
        // The template exists portal-side; the write-back will be
        // retried on the next lease when the id is still missing
        warn!(account = %session.account, error = %e, "template id write-back failed");
    }

    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn session() -> PortalSession {
        PortalSession::new("A1", HashMap::new(), "sig")
    }

    #[tokio::test]
    async fn existing_template_is_reused() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/report/template/list")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{"code":200,"data":{"templates":[{"id":17,"name":"Kewen_data"}]}}"#)
            .create_async()
            .await;

        let portal = PortalClient::new(&server.url()).expect("portal client");
        let coordinator =
            Arc::new(CoordinatorClient::new(&server.url()).expect("coordinator client"));

        let id = ensure_template(&portal, &coordinator, &session())
            .await
            .expect("provisioning should succeed");
        assert_eq!(id, 17);
    }

    #[tokio::test]
    async fn fallback_template_name_is_honoured() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/report/template/list")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{"code":200,"data":{"templates":[{"id":9,"name":"hdp-all"}]}}"#)
            .create_async()
            .await;

        let portal = PortalClient::new(&server.url()).expect("portal client");
        let coordinator =
            Arc::new(CoordinatorClient::new(&server.url()).expect("coordinator client"));

        let id = ensure_template(&portal, &coordinator, &session())
            .await
            .expect("provisioning should succeed");
        assert_eq!(id, 9);
    }

    #[tokio::test]
    async fn missing_template_is_created_and_written_back() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/report/template/list")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{"code":200,"data":{"templates":[]}}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/api/report/template/save")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(r#"{"code":200,"data":{"id":33}}"#)
            .create_async()
            .await;
        let writeback_primary = server
            .mock("POST", "/post/platform_accounts")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;
        let writeback_secondary = server
            .mock("POST", "/post/templates_id")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let portal = PortalClient::new(&server.url()).expect("portal client");
        let coordinator =
            Arc::new(CoordinatorClient::new(&server.url()).expect("coordinator client"));

        let id = ensure_template(&portal, &coordinator, &session())
            .await
            .expect("provisioning should succeed");
        assert_eq!(id, 33);
        writeback_primary.assert_async().await;
        writeback_secondary.assert_async().await;
    }
}
