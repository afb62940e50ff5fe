//! Downloaded artifact management
//!
//! Spreadsheets land in a scratch directory under names that embed the
//! account and date window. Files are validated before parsing,
//! deleted once their rows are uploaded, and swept by age otherwise.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use log::{info, warn};

use crate::error::{CollectorError, CollectorResult};
use crate::products::{DateWindow, Product};

/// XLSX containers are ZIP archives
const ZIP_MAGIC: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];

/// Smallest plausible spreadsheet; anything under this is truncated
const MIN_ARTIFACT_BYTES: u64 = 64;

/// Scratch-directory manager for downloaded artifacts
pub struct ArtifactStore {
    download_dir: PathBuf,
    max_age: Duration,
}

impl ArtifactStore {
    pub fn new(download_dir: &Path, max_age: Duration) -> CollectorResult<Self> {
        std::fs::create_dir_all(download_dir)?;
        Ok(Self {
            download_dir: download_dir.to_path_buf(),
            max_age,
        })
    }

    /// Path an artifact for this product/account/window is stored at
    #[must_use]
    pub fn artifact_path(&self, product: Product, account: &str, window: &DateWindow) -> PathBuf {
        let safe_account = sanitize_filename::sanitize(account);
        self.download_dir.join(format!(
            "{product}_{safe_account}_{}_{}.xlsx",
            window.start_str(),
            window.end_str()
        ))
    }

    /// Write downloaded bytes and validate them as a spreadsheet
    pub fn store(
        &self,
        product: Product,
        account: &str,
        window: &DateWindow,
        bytes: &[u8],
    ) -> CollectorResult<PathBuf> {
        validate_spreadsheet_bytes(bytes)?;
        let path = self.artifact_path(product, account, window);
        std::fs::write(&path, bytes)?;
        Ok(path)
    }

    /// Remove an artifact after its rows were uploaded
    pub fn discard(&self, path: &Path) {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("failed to remove uploaded artifact {}: {}", path.display(), e);
        }
    }

    /// Sweep artifacts older than the retention window. Returns the
    /// number of files removed.
    pub fn sweep_old(&self) -> usize {
        let cutoff = SystemTime::now()
            .checked_sub(self.max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let entries = match std::fs::read_dir(&self.download_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("cannot read download dir {}: {}", self.download_dir.display(), e);
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            if modified < cutoff {
                match std::fs::remove_file(&path) {
                    Ok(()) => {
                        info!("swept stale artifact {}", path.display());
                        removed += 1;
                    }
                    Err(e) => warn!("failed to sweep {}: {}", path.display(), e),
                }
            }
        }
        removed
    }
}

/// Validate raw download bytes: non-empty, not truncated, and carrying
/// a spreadsheet container signature.
pub fn validate_spreadsheet_bytes(bytes: &[u8]) -> CollectorResult<()> {
    if bytes.is_empty() {
        return Err(CollectorError::ArtifactInvalid("download is empty".into()));
    }
    if (bytes.len() as u64) < MIN_ARTIFACT_BYTES {
        return Err(CollectorError::ArtifactInvalid(format!(
            "download truncated at {} bytes",
            bytes.len()
        )));
    }
    if bytes[..4] != ZIP_MAGIC {
        return Err(CollectorError::ArtifactInvalid(
            "download is not an XLSX container".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn window() -> DateWindow {
        DateWindow::parse("2025-01-01", "2025-01-02").expect("window")
    }

    fn fake_xlsx() -> Vec<u8> {
        let mut bytes = ZIP_MAGIC.to_vec();
        bytes.extend_from_slice(&[0u8; 128]);
        bytes
    }

    #[test]
    fn artifact_name_embeds_window() {
        let dir = TempDir::new().expect("temp dir");
        let store = ArtifactStore::new(dir.path(), Duration::from_secs(60)).expect("store");
        let path = store.artifact_path(Product::KewenDailyReport, "A1", &window());
        let name = path.file_name().expect("file name").to_string_lossy().into_owned();
        assert_eq!(name, "kewen_daily_report_A1_2025-01-01_2025-01-02.xlsx");
    }

    #[test]
    fn store_rejects_empty_and_truncated_and_non_zip() {
        let dir = TempDir::new().expect("temp dir");
        let store = ArtifactStore::new(dir.path(), Duration::from_secs(60)).expect("store");

        assert!(matches!(
            store.store(Product::TradeAnalysis, "A1", &window(), b""),
            Err(CollectorError::ArtifactInvalid(_))
        ));
        assert!(matches!(
            store.store(Product::TradeAnalysis, "A1", &window(), b"PK\x03\x04"),
            Err(CollectorError::ArtifactInvalid(_))
        ));
        let mut not_zip = vec![0u8; 256];
        not_zip[0] = b'<';
        assert!(matches!(
            store.store(Product::TradeAnalysis, "A1", &window(), &not_zip),
            Err(CollectorError::ArtifactInvalid(_))
        ));
    }

    #[test]
    fn store_and_discard_round_trip() {
        let dir = TempDir::new().expect("temp dir");
        let store = ArtifactStore::new(dir.path(), Duration::from_secs(60)).expect("store");

        let path = store
            .store(Product::KewenDailyReport, "A1", &window(), &fake_xlsx())
            .expect("valid artifact stores");
        assert!(path.exists());

        store.discard(&path);
        assert!(!path.exists());
    }

    #[test]
    fn sweep_removes_only_old_files() {
        let dir = TempDir::new().expect("temp dir");
        // Zero retention: everything already on disk is "old"
        let store = ArtifactStore::new(dir.path(), Duration::ZERO).expect("store");
        let stale = dir.path().join("stale.xlsx");
        std::fs::write(&stale, fake_xlsx()).expect("write");

        // mtime is now; cutoff is also now. Make the file a touch older.
        std::thread::sleep(Duration::from_millis(20));
        let removed = store.sweep_old();
        assert_eq!(removed, 1);
        assert!(!stale.exists());
    }
}
