//! Column-index → field mappings for downloaded report spreadsheets
//!
//! The portal's report columns follow the template's metric order but
//! that layout is not documented anywhere; it is captured here as
//! data so a layout revision is a table edit, not a logic change.

use serde_json::{Map, Value, json};

use crate::products::DateWindow;

/// One spreadsheet column bound to an upload field
#[derive(Debug, Clone, Copy)]
pub struct ColumnMapping {
    pub field: &'static str,
    pub index: usize,
}

/// Daily coupon report layout
pub const DAILY_REPORT_COLUMNS: &[ColumnMapping] = &[
    ColumnMapping { field: "dt", index: 0 },
    ColumnMapping { field: "shop_id", index: 1 },
    ColumnMapping { field: "shop_name", index: 2 },
    ColumnMapping { field: "coupon_type", index: 6 },
    ColumnMapping { field: "coupon_sold_cnt", index: 7 },
    ColumnMapping { field: "coupon_used_cnt", index: 8 },
    ColumnMapping { field: "order_amt", index: 10 },
];

/// Column the coupon-type policy filter applies to
pub const DAILY_REPORT_COUPON_TYPE_INDEX: usize = 6;

/// Coupon-type value kept when the All-Codes-only policy is active
pub const COUPON_TYPE_ALL_CODES: &str = "All Codes";

/// Review export artifact layout (used when a listing overflows the
/// page cap and the export path takes over)
pub const REVIEW_EXPORT_COLUMNS: &[ColumnMapping] = &[
    ColumnMapping { field: "review_id", index: 0 },
    ColumnMapping { field: "shop_name", index: 1 },
    ColumnMapping { field: "review_time", index: 2 },
    ColumnMapping { field: "star", index: 3 },
    ColumnMapping { field: "content", index: 4 },
    ColumnMapping { field: "reply_status", index: 5 },
];

/// Trade analysis report layout
pub const TRADE_ANALYSIS_COLUMNS: &[ColumnMapping] = &[
    ColumnMapping { field: "dt", index: 0 },
    ColumnMapping { field: "shop_id", index: 1 },
    ColumnMapping { field: "shop_name", index: 2 },
    ColumnMapping { field: "exposure_uv", index: 3 },
    ColumnMapping { field: "visit_uv", index: 4 },
    ColumnMapping { field: "visit_pv", index: 5 },
    ColumnMapping { field: "order_cnt", index: 9 },
    ColumnMapping { field: "order_amt", index: 10 },
    ColumnMapping { field: "refund_amt", index: 11 },
];

/// Render one spreadsheet row as an upload body. Missing cells become
/// empty strings; the account and window are stamped on every row.
#[must_use]
pub fn row_to_upload_body(
    row: &[String],
    mapping: &[ColumnMapping],
    account: &str,
    window: &DateWindow,
) -> Value {
    let mut body = Map::new();
    body.insert("account_id".into(), json!(account));
    body.insert("data_date_start".into(), json!(window.start_str()));
    body.insert("data_date_end".into(), json!(window.end_str()));
    for column in mapping {
        let cell = row.get(column.index).map(String::as_str).unwrap_or("");
        body.insert(column.field.to_string(), json!(cell));
    }
    Value::Object(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> DateWindow {
        DateWindow::parse("2025-01-01", "2025-01-02").expect("window")
    }

    #[test]
    fn row_maps_indexed_cells() {
        let row: Vec<String> = (0..12).map(|i| format!("c{i}")).collect();
        let body = row_to_upload_body(&row, DAILY_REPORT_COLUMNS, "A1", &window());

        assert_eq!(body["account_id"], "A1");
        assert_eq!(body["dt"], "c0");
        assert_eq!(body["coupon_type"], "c6");
        assert_eq!(body["order_amt"], "c10");
        assert_eq!(body["data_date_start"], "2025-01-01");
    }

    #[test]
    fn short_rows_fill_empty_cells() {
        let row = vec!["2025-01-01".to_string()];
        let body = row_to_upload_body(&row, TRADE_ANALYSIS_COLUMNS, "A1", &window());
        assert_eq!(body["dt"], "2025-01-01");
        assert_eq!(body["refund_amt"], "");
    }
}
