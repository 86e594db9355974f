//! Sample sources consumed by the detection engines
//!
//! This module provides the simple I/O wrappers that feed the core:
//! - System metrics sampled from /proc and df
//! - Incremental log tailing with severity classification
//! - Security event collection (auth logs, ports, connections)
//! - A bounded queue for externally captured network flows

mod logs;
mod queue;
mod security;
mod system;

pub use logs::{LogTailer, SeverityClassifier};
pub use queue::{FlowQueue, OverflowPolicy};
pub use security::SecurityCollector;
pub use system::SystemSampler;

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use tracing::debug;

/// A log file read incrementally by byte offset.
///
/// The offset is seeded at the current end of file on creation, so
/// content written before the agent started is never replayed; a file
/// that shrinks (rotation or truncation) resets the offset to zero.
pub(crate) struct TailedFile {
    pub path: PathBuf,
    offset: u64,
}

impl TailedFile {
    /// Open a tailer positioned at the current end of the file
    pub fn seeded_at_end(path: PathBuf) -> Result<Self> {
        let len = std::fs::metadata(&path)
            .with_context(|| format!("failed to stat {path:?}"))?
            .len();

        Ok(Self { path, offset: len })
    }

    /// Read complete lines appended since the last call
    pub fn read_new_lines(&mut self) -> Result<Vec<String>> {
        let mut file =
            File::open(&self.path).with_context(|| format!("failed to open {:?}", self.path))?;

        let len = file
            .metadata()
            .with_context(|| format!("failed to stat {:?}", self.path))?
            .len();

        if len < self.offset {
            debug!(path = %self.path.display(), "file shrank, restarting from the beginning");
            self.offset = 0;
        }

        if len == self.offset {
            return Ok(Vec::new());
        }

        file.seek(SeekFrom::Start(self.offset))
            .with_context(|| format!("failed to seek in {:?}", self.path))?;

        let mut buf = Vec::with_capacity((len - self.offset) as usize);
        file.read_to_end(&mut buf)
            .with_context(|| format!("failed to read {:?}", self.path))?;
        self.offset = len;

        let text = String::from_utf8_lossy(&buf);
        Ok(text
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_seeded_at_end_skips_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "old line 1\nold line 2\n").unwrap();

        let mut tail = TailedFile::seeded_at_end(path.clone()).unwrap();
        assert!(tail.read_new_lines().unwrap().is_empty());

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, "new line").unwrap();

        assert_eq!(tail.read_new_lines().unwrap(), vec!["new line"]);
    }

    #[test]
    fn test_repeated_reads_are_incremental() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "").unwrap();

        let mut tail = TailedFile::seeded_at_end(path.clone()).unwrap();

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, "one").unwrap();
        writeln!(f, "two").unwrap();
        assert_eq!(tail.read_new_lines().unwrap(), vec!["one", "two"]);

        // Nothing appended: nothing re-read.
        assert!(tail.read_new_lines().unwrap().is_empty());

        writeln!(f, "three").unwrap();
        assert_eq!(tail.read_new_lines().unwrap(), vec!["three"]);
    }

    #[test]
    fn test_truncated_file_restarts_from_beginning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "aaaa\nbbbb\n").unwrap();

        let mut tail = TailedFile::seeded_at_end(path.clone()).unwrap();
        std::fs::write(&path, "fresh\n").unwrap();

        assert_eq!(tail.read_new_lines().unwrap(), vec!["fresh"]);
    }
}
