//! Pool state persistence
//!
//! On shutdown the pool writes one JSON snapshot of every account's
//! cookies and timestamps; on start-up contexts are rebuilt from it
//! best-effort. A per-account storage-state file is written alongside
//! so a single account can be reloaded without the full snapshot.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::CollectorResult;

pub(crate) const SNAPSHOT_FILE: &str = "browser_pool_state.json";

/// Snapshot of the whole pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub saved_at: DateTime<Utc>,
    pub contexts: HashMap<String, SnapshotEntry>,
}

/// Per-account snapshot entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub cookies: HashMap<String, String>,
    pub last_used_at: DateTime<Utc>,
    pub last_keepalive_at: DateTime<Utc>,
}

/// Per-account storage state, suitable for reloading one account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountStorageState {
    pub account: String,
    pub cookies: HashMap<String, String>,
    pub saved_at: DateTime<Utc>,
}

pub(crate) fn snapshot_path(state_dir: &Path) -> PathBuf {
    state_dir.join(SNAPSHOT_FILE)
}

pub(crate) fn account_state_path(state_dir: &Path, account: &str) -> PathBuf {
    let safe = sanitize_filename::sanitize(account);
    state_dir.join(format!("dianping_state_{safe}.json"))
}

/// Write the pool snapshot plus one storage-state file per account
pub(crate) fn write_snapshot(state_dir: &Path, snapshot: &PoolSnapshot) -> CollectorResult<()> {
    std::fs::create_dir_all(state_dir)?;
    let path = snapshot_path(state_dir);
    let raw = serde_json::to_string_pretty(snapshot)?;
    std::fs::write(&path, raw)?;

    for (account, entry) in &snapshot.contexts {
        let state = AccountStorageState {
            account: account.clone(),
            cookies: entry.cookies.clone(),
            saved_at: snapshot.saved_at,
        };
        let account_path = account_state_path(state_dir, account);
        match serde_json::to_string_pretty(&state) {
            Ok(raw) => {
                if let Err(e) = std::fs::write(&account_path, raw) {
                    warn!(account = %account, error = %e, "failed to write account storage state");
                }
            }
            Err(e) => warn!(account = %account, error = %e, "failed to serialize account storage state"),
        }
    }

    info!(
        accounts = snapshot.contexts.len(),
        path = %path.display(),
        "pool snapshot written"
    );
    Ok(())
}

/// Read the pool snapshot. A missing file yields an empty snapshot;
/// a corrupt one is logged and treated as empty (cookies will come
/// from the coordinator on first lease instead).
pub(crate) fn read_snapshot(state_dir: &Path) -> PoolSnapshot {
    let path = snapshot_path(state_dir);
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(_) => {
            return PoolSnapshot {
                saved_at: Utc::now(),
                contexts: HashMap::new(),
            };
        }
    };
    match serde_json::from_str(&raw) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt pool snapshot, starting empty");
            PoolSnapshot {
                saved_at: Utc::now(),
                contexts: HashMap::new(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_snapshot() -> PoolSnapshot {
        let mut contexts = HashMap::new();
        contexts.insert(
            "A1".to_string(),
            SnapshotEntry {
                cookies: HashMap::from([("token".to_string(), "abc".to_string())]),
                last_used_at: Utc::now(),
                last_keepalive_at: Utc::now(),
            },
        );
        PoolSnapshot {
            saved_at: Utc::now(),
            contexts,
        }
    }

    #[test]
    fn snapshot_round_trip() {
        let dir = TempDir::new().expect("temp dir");
        let snapshot = sample_snapshot();
        write_snapshot(dir.path(), &snapshot).expect("write should succeed");

        let restored = read_snapshot(dir.path());
        assert_eq!(restored.contexts.len(), 1);
        assert_eq!(restored.contexts["A1"].cookies["token"], "abc");

        // Per-account storage state is written alongside
        assert!(account_state_path(dir.path(), "A1").exists());
    }

    #[test]
    fn missing_snapshot_reads_empty() {
        let dir = TempDir::new().expect("temp dir");
        let restored = read_snapshot(dir.path());
        assert!(restored.contexts.is_empty());
    }

    #[test]
    fn corrupt_snapshot_reads_empty() {
        let dir = TempDir::new().expect("temp dir");
        std::fs::write(snapshot_path(dir.path()), "{not json").expect("write");
        let restored = read_snapshot(dir.path());
        assert!(restored.contexts.is_empty());
    }

    #[test]
    fn account_state_filename_is_sanitized() {
        let dir = TempDir::new().expect("temp dir");
        let path = account_state_path(dir.path(), "../evil/../../account");
        // Whatever the account contains, the file stays directly inside
        // the state directory
        assert_eq!(path.parent(), Some(dir.path()));
    }
}
