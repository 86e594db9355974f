//! Durable subscribe-once flag
//!
//! The subscribe handshake must go out exactly once per install. The
//! ledger persists that fact across restarts as a small JSON file,
//! written atomically via a temp file and rename.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Serialize, Deserialize)]
struct LedgerRecord {
    subscribed: bool,
    marked_at: Option<String>,
}

/// Check-then-set flag recording whether this install has subscribed
pub struct SubscribeLedger {
    path: PathBuf,
    subscribed: bool,
}

impl SubscribeLedger {
    /// Open the ledger at `path`.
    ///
    /// A missing file means not subscribed; an unreadable or corrupt
    /// file is logged and treated the same, which at worst re-sends
    /// the handshake once.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let subscribed = match std::fs::read_to_string(&path) {
            Ok(data) => match serde_json::from_str::<LedgerRecord>(&data) {
                Ok(record) => record.subscribed,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "corrupt subscribe ledger, assuming unsubscribed");
                    false
                }
            },
            Err(_) => false,
        };

        Self { path, subscribed }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    /// Record that the handshake was sent; persists across restarts
    pub fn mark(&mut self) -> Result<()> {
        let record = LedgerRecord {
            subscribed: true,
            marked_at: Some(chrono::Utc::now().to_rfc3339()),
        };

        save_atomically(&self.path, &record)?;
        self.subscribed = true;
        info!(path = %self.path.display(), "subscription recorded");
        Ok(())
    }
}

fn save_atomically(path: &Path, record: &LedgerRecord) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {parent:?}"))?;
    }

    let json = serde_json::to_vec(record).context("failed to serialize ledger")?;

    let temp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp_path)
        .with_context(|| format!("failed to create temp file {temp_path:?}"))?;

    file.write_all(&json).context("failed to write ledger")?;
    file.sync_all().context("failed to sync ledger file")?;

    std::fs::rename(&temp_path, path)
        .with_context(|| format!("failed to rename {temp_path:?} to {path:?}"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_ledger_is_unsubscribed() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = SubscribeLedger::open(dir.path().join("subscription.json"));
        assert!(!ledger.is_subscribed());
    }

    #[test]
    fn test_mark_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subscription.json");

        let mut ledger = SubscribeLedger::open(&path);
        ledger.mark().unwrap();
        assert!(ledger.is_subscribed());

        // A fresh process start finds the flag set and must not
        // subscribe again.
        let reopened = SubscribeLedger::open(&path);
        assert!(reopened.is_subscribed());
    }

    #[test]
    fn test_corrupt_ledger_treated_as_unsubscribed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subscription.json");
        std::fs::write(&path, "not json").unwrap();

        let ledger = SubscribeLedger::open(&path);
        assert!(!ledger.is_subscribed());
    }

    #[test]
    fn test_mark_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/state/subscription.json");

        let mut ledger = SubscribeLedger::open(&path);
        ledger.mark().unwrap();
        assert!(path.exists());
    }
}
