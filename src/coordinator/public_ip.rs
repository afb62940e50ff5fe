//! Host public IP discovery
//!
//! The coordinator keys leases by worker host; the host identifies
//! itself by its public IP. Four well-known echo services are tried in
//! order and the first success is cached for the process lifetime.

use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use crate::error::{CollectorError, CollectorResult};
use crate::utils::constants::{HTTP_API_TIMEOUT, HTTP_CONNECT_TIMEOUT, IP_ECHO_SERVICES};

static CACHED_IP: OnceCell<String> = OnceCell::new();

/// Resolve the host's public IP, caching the first success
pub async fn public_ip() -> CollectorResult<String> {
    if let Some(ip) = CACHED_IP.get() {
        return Ok(ip.clone());
    }

    let client = reqwest::Client::builder()
        .connect_timeout(HTTP_CONNECT_TIMEOUT)
        .timeout(HTTP_API_TIMEOUT)
        .build()?;

    for service in IP_ECHO_SERVICES {
        match fetch_ip(&client, service).await {
            Ok(ip) => {
                debug!(service = service, ip = %ip, "resolved public IP");
                let _ = CACHED_IP.set(ip.clone());
                return Ok(ip);
            }
            Err(e) => {
                warn!(service = service, error = %e, "IP echo service failed, trying next");
            }
        }
    }

    Err(CollectorError::Other(
        "all public IP echo services failed".into(),
    ))
}

/// The cached IP, if discovery has already succeeded
#[must_use]
pub fn cached_ip() -> Option<String> {
    CACHED_IP.get().cloned()
}

async fn fetch_ip(client: &reqwest::Client, service: &str) -> CollectorResult<String> {
    let body = client.get(service).send().await?.text().await?;
    let ip = body.trim().to_string();
    if ip.is_empty() || ip.len() > 45 {
        return Err(CollectorError::Validation(format!(
            "implausible IP echo response from {service}"
        )));
    }
    Ok(ip)
}
