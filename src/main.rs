// Collector daemon entry point.
//
// Wires configuration, logging, signal handling and the long-lived
// services together, then hands control to the orchestrator's main
// loop until a terminal signal arrives.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hdp_collector::config::CollectorConfig;
use hdp_collector::keepalive::{KeepaliveConfig, KeepaliveScheduler};
use hdp_collector::session_pool::{PoolConfig, SessionPool};
use hdp_collector::{
    AccountLockRegistry, ArtifactStore, CookieUploadQueue, CoordinatorClient, Orchestrator,
    PortalClient, ResourceMonitor, ShutdownFlag,
};

/// Merchant-portal collector agent
#[derive(Parser, Debug)]
#[command(name = "hdp-collector", version, about)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "collector.toml")]
    config: PathBuf,

    /// Ignore the work window and run around the clock
    #[arg(long)]
    dev: bool,
}

/// Proxy variables poison both the browser and the raw HTTP clients;
/// the portal rejects proxied traffic anyway.
fn clear_proxy_env() {
    for key in [
        "HTTP_PROXY",
        "HTTPS_PROXY",
        "ALL_PROXY",
        "http_proxy",
        "https_proxy",
        "all_proxy",
    ] {
        // SAFETY: called before any threads are spawned
        unsafe { std::env::remove_var(key) };
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    clear_proxy_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = CollectorConfig::from_file(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    if cli.dev {
        config = config.with_dev_mode(true);
    }
    let config = Arc::new(config);

    std::fs::create_dir_all(config.state_dir())
        .with_context(|| format!("creating state dir {}", config.state_dir().display()))?;

    info!(
        coordinator = config.coordinator_base_url(),
        portal = config.portal_base_url(),
        state_dir = %config.state_dir().display(),
        dev_mode = config.dev_mode(),
        "starting hdp-collector"
    );

    let shutdown = ShutdownFlag::new();
    hdp_collector::shutdown::install_signal_handlers(shutdown.clone());

    let monitor = Arc::new(ResourceMonitor::from_config(&config));
    let locks = Arc::new(AccountLockRegistry::new());
    let coordinator = Arc::new(
        CoordinatorClient::new(config.coordinator_base_url())
            .context("building coordinator client")?,
    );
    let portal =
        PortalClient::new(config.portal_base_url()).context("building portal client")?;
    let pool = Arc::new(SessionPool::new(PoolConfig::from_config(&config)));
    let artifacts = ArtifactStore::new(config.download_dir(), config.artifact_max_age())
        .context("preparing artifact scratch directory")?;

    let uploader = coordinator.clone();
    let queue = Arc::new(CookieUploadQueue::start(
        config.cookie_queue_capacity(),
        config.cookie_batch_size(),
        config.cookie_flush_interval(),
        move |envelope| {
            let coordinator = uploader.clone();
            async move {
                coordinator
                    .upload_cookies(&envelope.account, &envelope.cookies)
                    .await
            }
        },
    ));

    let keepalive = Arc::new(KeepaliveScheduler::new(
        KeepaliveConfig {
            interval: config.keepalive_interval(),
            batch_size: config.keepalive_batch_size(),
            cooldown: config.keepalive_cooldown(),
            portal_base_url: config.portal_base_url().to_string(),
        },
        pool.clone(),
        locks.clone(),
        monitor.clone(),
        coordinator.clone(),
        queue.clone(),
    ));

    let orchestrator = Orchestrator::new(
        config,
        pool,
        keepalive,
        locks,
        monitor,
        coordinator,
        portal,
        artifacts,
        queue,
        shutdown,
    );

    orchestrator.run().await;
    info!("hdp-collector stopped");
    Ok(())
}
