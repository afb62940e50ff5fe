//! Shared configuration constants for the collector
//!
//! Default values used throughout the codebase to ensure consistency
//! and avoid magic numbers.

use std::time::Duration;

/// Chrome user agent string presented by every pooled browser
///
/// Updated: 2025-01-29 to Chrome 132 (current stable)
/// Next update: 2025-04-29 (quarterly schedule)
///
/// Reference: https://chromiumdash.appspot.com/schedule
pub const CHROME_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.6834.160 Safari/537.36";

/// Merchant portal origin all navigations and raw HTTP calls target
pub const PORTAL_BASE: &str = "https://e.dianping.com";

/// Lightweight authenticated page used by keepalive navigations.
///
/// Cheap to render, requires a valid login, and refreshes the session
/// cookies as a side effect.
pub const LIGHT_PAGE_PATH: &str = "/app/merchant-platform/home";

/// Traffic-analysis page driven before the store-statistics extractor
pub const TRAFFIC_PAGE_PATH: &str = "/app/traffic-analysis";

/// Report-centre page driven before the report extractors
pub const REPORT_PAGE_PATH: &str = "/app/report-center";

/// Review-management page driven before the review extractors
pub const REVIEW_PAGE_PATH: &str = "/app/review-manage";

/// Minimum body length (bytes) for a page to count as authenticated.
///
/// The portal serves a near-empty shell when the login state is gone;
/// anything below this after domcontentloaded is an invalidation signal.
pub const MIN_AUTHED_BODY_BYTES: usize = 100;

/// Public IP echo services, tried in order; first success wins
pub const IP_ECHO_SERVICES: [&str; 4] = [
    "https://api.ipify.org",
    "https://ifconfig.me/ip",
    "https://icanhazip.com",
    "https://ipinfo.io/ip",
];

/// Connect timeout applied to every HTTP client
pub const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Overall timeout for coordinator/portal API calls
pub const HTTP_API_TIMEOUT: Duration = Duration::from_secs(30);

/// Overall timeout for artifact downloads
pub const HTTP_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Page navigation timeout for task-driven page loads
pub const NAVIGATION_TIMEOUT_SECS: u64 = 60;

/// Navigation timeout for login probes after (re-)login
pub const LOGIN_PROBE_TIMEOUT_SECS: u64 = 30;

/// Navigation timeout for keepalive page loads
pub const KEEPALIVE_NAVIGATION_TIMEOUT_SECS: u64 = 15;

/// Longest uninterruptible stretch of any sleep; the shutdown flag is
/// re-checked at least this often.
pub const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_secs(10);
