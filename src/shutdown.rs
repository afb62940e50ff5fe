//! Shutdown flag and signal wiring
//!
//! SIGINT/SIGTERM flip a process-wide running flag that the main loop
//! polls at every suspension point. A second signal aborts immediately.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{info, warn};

use crate::utils::constants::SHUTDOWN_POLL_INTERVAL;

/// Cheaply clonable handle to the process shutdown state
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    requested: Arc<AtomicBool>,
}

impl ShutdownFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    /// Whether shutdown has been requested
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Sleep for `total`, waking at least every 10 s to re-check the
    /// flag. Returns `true` if the sleep ran to completion, `false` if
    /// it was cut short by a shutdown request.
    pub async fn sleep_interruptible(&self, total: Duration) -> bool {
        let mut remaining = total;
        while !remaining.is_zero() {
            if self.is_triggered() {
                return false;
            }
            let slice = remaining.min(SHUTDOWN_POLL_INTERVAL);
            tokio::time::sleep(slice).await;
            remaining = remaining.saturating_sub(slice);
        }
        !self.is_triggered()
    }
}

/// Install SIGINT/SIGTERM handlers that flip the flag.
///
/// The first signal requests a graceful stop (the main loop finishes
/// the current extractor at most); a second signal exits immediately.
pub fn install_signal_handlers(flag: ShutdownFlag) {
    tokio::spawn(async move {
        let mut signals_seen = 0u32;
        loop {
            wait_for_terminate_signal().await;
            signals_seen += 1;
            if signals_seen == 1 {
                info!("shutdown signal received, finishing current work");
                flag.trigger();
            } else {
                warn!("second shutdown signal, aborting immediately");
                std::process::exit(130);
            }
        }
    });
}

#[cfg(unix)]
async fn wait_for_terminate_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler, falling back to ctrl-c");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_terminate_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn interruptible_sleep_returns_early_on_trigger() {
        let flag = ShutdownFlag::new();
        flag.trigger();
        let completed = flag.sleep_interruptible(Duration::from_secs(60)).await;
        assert!(!completed);
    }

    #[tokio::test]
    async fn interruptible_sleep_completes_when_untriggered() {
        let flag = ShutdownFlag::new();
        let completed = flag.sleep_interruptible(Duration::from_millis(5)).await;
        assert!(completed);
    }
}
