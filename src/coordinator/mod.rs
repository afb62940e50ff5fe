//! Coordinator backend interface
//!
//! The coordinator issues task leases, records logs and accepts
//! status/cookie/template reports. This module is the only place the
//! coordinator wire contract lives.

mod client;
mod public_ip;
mod types;

pub use client::CoordinatorClient;
pub use public_ip::{cached_ip, public_ip};
pub use types::{
    CallbackStatus, LeaseResponse, LogRecord, PendingReply, PlatformAccount, Shop, TaskLease,
    parse_cookie_header, to_cookie_header,
};
