//! Shared utilities for the collector

pub mod constants;
pub mod retry;
pub mod timeout;

pub use constants::*;
pub use retry::retry_with_backoff;
pub use timeout::with_page_timeout;
