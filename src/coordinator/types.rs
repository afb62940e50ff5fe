//! Wire types for the coordinator backend API

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{CollectorError, CollectorResult};
use crate::products::{DateWindow, Product};

/// One unit of leased work
#[derive(Debug, Clone, Deserialize)]
pub struct TaskLease {
    pub id: i64,
    pub account_id: String,
    /// `all` or one product wire name
    pub task_type: String,
    pub data_start_date: String,
    pub data_end_date: String,
}

impl TaskLease {
    /// Validate the lease fields the coordinator is supposed to
    /// guarantee. Malformed leases fail the task with retry_add=1.
    pub fn validate(&self) -> CollectorResult<DateWindow> {
        if self.account_id.trim().is_empty() {
            return Err(CollectorError::Validation("lease has empty account".into()));
        }
        if self.task_type != "all" {
            Product::parse(&self.task_type)?;
        }
        DateWindow::parse(&self.data_start_date, &self.data_end_date)
    }
}

/// Envelope of the lease endpoint
#[derive(Debug, Deserialize)]
pub struct LeaseResponse {
    #[serde(default)]
    pub success: bool,
    /// Empty or absent data means no task available
    #[serde(default)]
    pub data: Option<TaskLease>,
}

/// Terminal task status reported through the lease callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackStatus {
    /// Wire code 2: fully complete
    Succeeded,
    /// Wire code 3: failed
    Failed,
}

impl CallbackStatus {
    #[must_use]
    pub fn as_code(&self) -> u8 {
        match self {
            CallbackStatus::Succeeded => 2,
            CallbackStatus::Failed => 3,
        }
    }
}

/// One merchant shop visible to the account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shop {
    pub shop_id: String,
    pub shop_name: String,
    #[serde(default)]
    pub region: Option<String>,
}

/// Account record as the coordinator stores it
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformAccount {
    #[serde(default)]
    pub account: String,
    /// Cookie header string, `k=v; k2=v2`
    #[serde(default)]
    pub cookie: String,
    /// Last-known request signature token; may be empty
    #[serde(default)]
    pub mtgsig: String,
    /// 0 means "template not provisioned yet"
    #[serde(default)]
    pub templates_id: i64,
    #[serde(default)]
    pub stores_json: String,
    #[serde(default)]
    pub auth_status: String,
    #[serde(default, rename = "compareRegions_json")]
    pub compare_regions_json: String,
    #[serde(default)]
    pub brands_json: String,
}

impl PlatformAccount {
    /// Whether the coordinator has marked this login as gone
    #[must_use]
    pub fn is_invalid(&self) -> bool {
        self.auth_status.eq_ignore_ascii_case("invalid")
    }

    /// Cookie header parsed into a name → value map
    #[must_use]
    pub fn cookie_map(&self) -> HashMap<String, String> {
        parse_cookie_header(&self.cookie)
    }

    /// Shop list parsed from the stored JSON; an unparsable or empty
    /// payload yields an empty list rather than an error.
    #[must_use]
    pub fn shops(&self) -> Vec<Shop> {
        if self.stores_json.trim().is_empty() {
            return Vec::new();
        }
        serde_json::from_str(&self.stores_json).unwrap_or_default()
    }
}

/// One review waiting for a merchant reply, queued by the backend
#[derive(Debug, Clone, Deserialize)]
pub struct PendingReply {
    pub review_id: String,
    /// 0 Dianping, 1 Meituan
    #[serde(default)]
    pub platform: u8,
    pub reply_text: String,
}

/// Row-upload log record for the coordinator log sink
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub account_id: String,
    pub shop_id: String,
    pub table_name: String,
    pub data_date_start: String,
    pub data_date_end: String,
    /// 1 failure, 2 success
    pub upload_status: u8,
    pub record_count: u64,
    pub error_message: String,
}

/// Parse a `k=v; k2=v2` cookie header into a map
#[must_use]
pub fn parse_cookie_header(header: &str) -> HashMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Render a cookie map back into a `k=v; k2=v2` header
#[must_use]
pub fn to_cookie_header(cookies: &HashMap<String, String>) -> String {
    let mut pairs: Vec<_> = cookies.iter().collect();
    // Stable order keeps snapshots and uploads diffable
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    pairs
        .into_iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_header_round_trip() {
        let parsed = parse_cookie_header("token=abc; uid=42; _lxsdk=x1");
        assert_eq!(parsed.len(), 3);
        assert_eq!(parsed["token"], "abc");
        assert_eq!(parsed["uid"], "42");

        let rendered = to_cookie_header(&parsed);
        assert_eq!(rendered, "_lxsdk=x1; token=abc; uid=42");
    }

    #[test]
    fn cookie_parser_skips_malformed_pairs() {
        let parsed = parse_cookie_header("ok=1; malformed; =novalue; k=");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed["ok"], "1");
        assert_eq!(parsed["k"], "");
    }

    #[test]
    fn lease_validation() {
        let lease = TaskLease {
            id: 42,
            account_id: "A1".into(),
            task_type: "all".into(),
            data_start_date: "2025-01-01".into(),
            data_end_date: "2025-01-02".into(),
        };
        assert!(lease.validate().is_ok());

        let bad = TaskLease {
            account_id: "".into(),
            ..lease.clone()
        };
        assert!(bad.validate().is_err());

        let bad = TaskLease {
            task_type: "mystery_product".into(),
            ..lease
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn platform_account_parses_shops_and_cookies() {
        let account = PlatformAccount {
            account: "A1".into(),
            cookie: "token=abc; uid=42".into(),
            mtgsig: String::new(),
            templates_id: 0,
            stores_json: r#"[{"shop_id":"s1","shop_name":"North"},{"shop_id":"s2","shop_name":"South","region":"east"}]"#.into(),
            auth_status: "valid".into(),
            compare_regions_json: String::new(),
            brands_json: String::new(),
        };
        assert!(!account.is_invalid());
        assert_eq!(account.cookie_map().len(), 2);
        let shops = account.shops();
        assert_eq!(shops.len(), 2);
        assert_eq!(shops[1].region.as_deref(), Some("east"));
    }
}
