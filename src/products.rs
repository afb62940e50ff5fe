//! Data products and per-task result types
//!
//! The seven data products the collector harvests per account, the
//! wire codes used when reporting their status, and the per-product
//! result aggregated into the batch report at the end of a task.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{CollectorError, CollectorResult};

/// One harvested data product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Product {
    /// Store statistics from the traffic-analysis page; refreshes the
    /// shared request signature as a side effect
    StoreStats,
    /// Daily coupon report from the report centre
    KewenDailyReport,
    /// Trade analysis report from the report centre
    TradeAnalysis,
    /// Review listing, Dianping platform
    DianpingReview,
    /// Review listing, Meituan platform
    MeituanReview,
    /// Review summary, Dianping platform
    DianpingReviewSummary,
    /// Review summary, Meituan platform
    MeituanReviewSummary,
}

impl Product {
    /// Every product, in the order the `all` task executes them
    pub const ALL: [Product; 7] = [
        Product::StoreStats,
        Product::KewenDailyReport,
        Product::TradeAnalysis,
        Product::DianpingReview,
        Product::MeituanReview,
        Product::DianpingReviewSummary,
        Product::MeituanReviewSummary,
    ];

    /// Wire name used in task types, status reports and upload paths
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Product::StoreStats => "store_stats",
            Product::KewenDailyReport => "kewen_daily_report",
            Product::TradeAnalysis => "trade_analysis",
            Product::DianpingReview => "dianping_review",
            Product::MeituanReview => "meituan_review",
            Product::DianpingReviewSummary => "dianping_review_summary",
            Product::MeituanReviewSummary => "meituan_review_summary",
        }
    }

    /// Parse a task-type tag. `all` is not a product and is rejected
    /// here; callers check for it first.
    pub fn parse(name: &str) -> CollectorResult<Self> {
        Product::ALL
            .into_iter()
            .find(|p| p.as_str() == name)
            .ok_or_else(|| CollectorError::Validation(format!("unknown task name: {name}")))
    }

    /// Review platform discriminator used by the portal listing API
    /// (0 = Dianping, 1 = Meituan); `None` for non-review products.
    #[must_use]
    pub fn review_platform(&self) -> Option<u8> {
        match self {
            Product::DianpingReview | Product::DianpingReviewSummary => Some(0),
            Product::MeituanReview | Product::MeituanReviewSummary => Some(1),
            _ => None,
        }
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire status codes for product results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductStatus {
    NotRun,
    Success,
    Failed,
}

impl ProductStatus {
    /// Coordinator wire code: 0 not-run, 2 success, 3 failed
    #[must_use]
    pub fn as_code(&self) -> u8 {
        match self {
            ProductStatus::NotRun => 0,
            ProductStatus::Success => 2,
            ProductStatus::Failed => 3,
        }
    }
}

/// Per-product outcome of one task
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub product: Product,
    pub status: ProductStatus,
    pub records: u64,
    pub error: Option<String>,
}

impl TaskResult {
    #[must_use]
    pub fn success(product: Product, records: u64) -> Self {
        Self {
            product,
            status: ProductStatus::Success,
            records,
            error: None,
        }
    }

    #[must_use]
    pub fn failure(product: Product, error: impl Into<String>) -> Self {
        Self {
            product,
            status: ProductStatus::Failed,
            records: 0,
            error: Some(error.into()),
        }
    }

    #[must_use]
    pub fn not_run(product: Product) -> Self {
        Self {
            product,
            status: ProductStatus::NotRun,
            records: 0,
            error: None,
        }
    }
}

/// Inclusive date window a task covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    /// Parse the coordinator's `YYYY-MM-DD` date pair
    pub fn parse(start: &str, end: &str) -> CollectorResult<Self> {
        let start = NaiveDate::parse_from_str(start, "%Y-%m-%d")
            .map_err(|e| CollectorError::Validation(format!("bad data_start_date {start}: {e}")))?;
        let end = NaiveDate::parse_from_str(end, "%Y-%m-%d")
            .map_err(|e| CollectorError::Validation(format!("bad data_end_date {end}: {e}")))?;
        if end < start {
            return Err(CollectorError::Validation(format!(
                "data window ends before it starts: {start}..{end}"
            )));
        }
        Ok(Self { start, end })
    }

    #[must_use]
    pub fn start_str(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }

    #[must_use]
    pub fn end_str(&self) -> String {
        self.end.format("%Y-%m-%d").to_string()
    }
}

impl fmt::Display for DateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start_str(), self.end_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_names_round_trip() {
        for product in Product::ALL {
            let parsed = Product::parse(product.as_str()).expect("name should parse back");
            assert_eq!(parsed, product);
        }
        assert!(Product::parse("all").is_err());
        assert!(Product::parse("bogus").is_err());
    }

    #[test]
    fn status_codes_match_wire_contract() {
        assert_eq!(ProductStatus::NotRun.as_code(), 0);
        assert_eq!(ProductStatus::Success.as_code(), 2);
        assert_eq!(ProductStatus::Failed.as_code(), 3);
    }

    #[test]
    fn date_window_rejects_inverted_ranges() {
        assert!(DateWindow::parse("2025-01-01", "2025-01-02").is_ok());
        assert!(DateWindow::parse("2025-01-02", "2025-01-01").is_err());
        assert!(DateWindow::parse("not-a-date", "2025-01-01").is_err());
    }

    #[test]
    fn review_platform_codes() {
        assert_eq!(Product::DianpingReview.review_platform(), Some(0));
        assert_eq!(Product::MeituanReview.review_platform(), Some(1));
        assert_eq!(Product::StoreStats.review_platform(), None);
    }
}
