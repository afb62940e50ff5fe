//! Browser process launch and lifecycle plumbing
//!
//! Finds or downloads a Chrome/Chromium executable and launches pool
//! browser processes with a tracked event-handler task and an isolated
//! user-data directory that is removed when the process goes away.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfigBuilder, HeadlessMode};
use chromiumoxide::fetcher::{BrowserFetcher, BrowserFetcherOptions};
use futures::StreamExt;
use tokio::task::{self, JoinHandle};
use tracing::{info, warn};

use crate::error::{CollectorError, CollectorResult};
use crate::utils::constants::CHROME_USER_AGENT;

/// A pool browser process: engine handle, its event-handler task and
/// the temp profile directory.
///
/// The handler task MUST be aborted when the process goes away or it
/// runs indefinitely after the browser is closed; `Drop` takes care of
/// that as a fallback for the explicit [`BrowserHandle::close`] path.
#[derive(Debug)]
pub(crate) struct BrowserHandle {
    browser: Browser,
    handler: JoinHandle<()>,
    user_data_dir: Option<PathBuf>,
}

impl BrowserHandle {
    pub(crate) fn browser(&self) -> &Browser {
        &self.browser
    }

    pub(crate) fn browser_mut(&mut self) -> &mut Browser {
        &mut self.browser
    }

    /// Cheap liveness check via the version CDP command
    pub(crate) async fn is_alive(&self) -> bool {
        self.browser.version().await.is_ok()
    }

    /// Close the browser gracefully, wait for the process to exit and
    /// remove the temp profile.
    pub(crate) async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!(error = %e, "failed to close browser cleanly");
        }
        if let Err(e) = self.browser.wait().await {
            warn!(error = %e, "failed to wait for browser exit");
        }
        self.handler.abort();
        self.cleanup_temp_dir();
    }

    /// Remove the temp profile directory (blocking; also callable from
    /// Drop where async is not available).
    fn cleanup_temp_dir(&mut self) {
        if let Some(path) = self.user_data_dir.take() {
            if let Err(e) = std::fs::remove_dir_all(&path) {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to remove browser profile directory"
                );
            }
        }
    }
}

impl Drop for BrowserHandle {
    fn drop(&mut self) {
        self.handler.abort();
        // Browser::drop kills the Chrome process if still running
        if self.user_data_dir.is_some() {
            self.cleanup_temp_dir();
        }
    }
}

/// Launch one pool browser process.
///
/// Each process gets its own temp user-data directory so profiles
/// never contend for the singleton lock.
pub(crate) async fn launch_browser(headless: bool, slot: usize) -> CollectorResult<BrowserHandle> {
    let executable = resolve_browser_executable().await?;

    let profile = tempfile::Builder::new()
        .prefix(&format!("hdp_chrome_slot{slot}_"))
        .tempdir()
        .map_err(CollectorError::Io)?;
    let user_data_dir = profile.into_path();

    let headless_mode = if headless {
        HeadlessMode::New
    } else {
        HeadlessMode::False
    };

    let browser_config = BrowserConfigBuilder::default()
        .request_timeout(Duration::from_secs(30))
        .window_size(1440, 900)
        .user_data_dir(user_data_dir.clone())
        .chrome_executable(executable)
        .headless_mode(headless_mode)
        .arg(format!("--user-agent={CHROME_USER_AGENT}"))
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--disable-infobars")
        .arg("--disable-notifications")
        .arg("--disable-extensions")
        .arg("--disable-popup-blocking")
        .arg("--disable-background-networking")
        .arg("--disable-background-timer-throttling")
        .arg("--disable-breakpad")
        .arg("--disable-hang-monitor")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--no-sandbox")
        .arg("--password-store=basic")
        .arg("--hide-scrollbars")
        .arg("--mute-audio")
        .build()
        .map_err(|e| CollectorError::Other(format!("failed to build browser config: {e}")))?;

    let (browser, mut handler) = Browser::launch(browser_config).await?;

    let handler_task = task::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                tracing::debug!(error = ?e, "browser handler event error");
            }
        }
    });

    info!(slot = slot, profile = %user_data_dir.display(), "launched pool browser");

    Ok(BrowserHandle {
        browser,
        handler: handler_task,
        user_data_dir: Some(user_data_dir),
    })
}

/// Find a system Chrome/Chromium, falling back to the managed download
async fn resolve_browser_executable() -> CollectorResult<PathBuf> {
    match find_browser_executable() {
        Some(path) => Ok(path),
        None => {
            warn!("no system Chrome/Chromium found, fetching managed browser");
            download_managed_browser().await
        }
    }
}

/// Probe the usual install locations, honouring `CHROMIUM_PATH`
fn find_browser_executable() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CHROMIUM_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            info!(path = %path.display(), "using browser from CHROMIUM_PATH");
            return Some(path);
        }
        warn!(path = %path.display(), "CHROMIUM_PATH points to a non-existent file");
    }

    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/opt/homebrew/bin/chromium",
        ]
    } else {
        &[
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
            "/opt/google/chrome/chrome",
        ]
    };

    for candidate in candidates {
        let path = PathBuf::from(candidate);
        if path.exists() {
            return Some(path);
        }
    }

    if !cfg!(target_os = "windows") {
        for cmd in &["chromium", "chromium-browser", "google-chrome", "chrome"] {
            if let Ok(output) = Command::new("which").arg(cmd).output() {
                if output.status.success() {
                    let path_str = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !path_str.is_empty() {
                        return Some(PathBuf::from(path_str));
                    }
                }
            }
        }
    }

    None
}

/// Download a managed Chromium build into the cache directory
async fn download_managed_browser() -> CollectorResult<PathBuf> {
    let download_dir = dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("hdp-collector")
        .join("chromium");
    tokio::fs::create_dir_all(&download_dir).await?;

    let fetcher = BrowserFetcher::new(
        BrowserFetcherOptions::builder()
            .with_path(&download_dir)
            .build()
            .map_err(|e| CollectorError::Other(format!("browser fetcher options: {e}")))?,
    );
    let info = fetcher
        .fetch()
        .await
        .map_err(|e| CollectorError::Other(format!("browser download failed: {e}")))?;

    info!(path = %info.executable_path.display(), "downloaded managed browser");
    Ok(info.executable_path)
}
