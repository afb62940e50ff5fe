//! hdp-collector: merchant-portal collector agent
//!
//! A long-running daemon that drives headless browser sessions against
//! a merchant portal to harvest per-account report, review and traffic
//! data, pushing extracted rows to a central backend. The heart of the
//! crate is the single-host orchestration: the browser session pool,
//! per-account mutual exclusion, the staggered keepalive scheduler
//! with its resource governor, the asynchronous cookie-upload pipeline
//! and the at-most-once task lease/callback protocol.

pub mod account_lock;
pub mod artifacts;
pub mod auth;
pub mod config;
pub mod cookie_queue;
pub mod coordinator;
pub mod error;
pub mod extractors;
pub mod keepalive;
pub mod orchestrator;
pub mod portal;
pub mod products;
pub mod report_template;
pub mod resource_monitor;
pub mod review_reply;
pub mod session_pool;
pub mod shutdown;
pub mod utils;

pub use account_lock::{AccountLockGuard, AccountLockRegistry};
pub use artifacts::ArtifactStore;
pub use config::{CollectorConfig, CollectorConfigBuilder};
pub use cookie_queue::{CookieEnvelope, CookieUploadQueue};
pub use coordinator::{CallbackStatus, CoordinatorClient, PlatformAccount, TaskLease};
pub use error::{CollectorError, CollectorResult, RetryConfig};
pub use keepalive::{KeepaliveConfig, KeepaliveScheduler};
pub use orchestrator::Orchestrator;
pub use portal::{PortalClient, PortalSession};
pub use products::{DateWindow, Product, ProductStatus, TaskResult};
pub use resource_monitor::{ResourceMonitor, ResourceState};
pub use session_pool::{ContextHandle, PoolConfig, SessionPool};
pub use shutdown::ShutdownFlag;
