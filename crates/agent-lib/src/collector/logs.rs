//! Incremental log collection with severity classification
//!
//! Watches a fixed candidate list of well-known log files, reading
//! only bytes appended after agent start. Each line is classified by
//! an ordered table of (pattern, severity) rules so the precedence
//! (error over warning over info) is data, not control flow.

use super::TailedFile;
use crate::models::{LogBatch, LogEntry, LogStats, Severity};
use regex::Regex;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Well-known log files and their categories
const CANDIDATE_LOG_FILES: &[(&str, &str)] = &[
    ("/var/log/syslog", "system"),
    ("/var/log/auth.log", "auth"),
    ("/var/log/secure", "auth"),
    ("/var/log/apache2/access.log", "web"),
    ("/var/log/apache2/error.log", "web"),
    ("/var/log/nginx/access.log", "web"),
    ("/var/log/nginx/error.log", "web"),
    ("/var/log/mysql/error.log", "database"),
    ("/var/log/postgresql/postgresql.log", "database"),
];

/// Ordered (pattern, severity) rules; first match wins
pub struct SeverityClassifier {
    rules: Vec<(Regex, Severity)>,
}

impl SeverityClassifier {
    pub fn new() -> Self {
        let table: &[(&str, Severity)] = &[
            (r"\berror\b", Severity::Error),
            (r"\bfail(ed|ure)\b", Severity::Error),
            (r"\bcritical\b", Severity::Error),
            (r"\bemergency\b", Severity::Error),
            (r"\balert\b", Severity::Error),
            (r"\bwarn(ing)?\b", Severity::Warning),
            (r"\bnotice\b", Severity::Warning),
            (r"\btimeout\b", Severity::Warning),
            (r"\binfo\b", Severity::Info),
            (r"\bstarted\b", Severity::Info),
            (r"\bstopped\b", Severity::Info),
            (r"\bcompleted\b", Severity::Info),
        ];

        let rules = table
            .iter()
            .map(|(pattern, severity)| {
                (
                    Regex::new(pattern).expect("severity pattern is valid"),
                    *severity,
                )
            })
            .collect();

        Self { rules }
    }

    /// Classify one line; unmatched lines default to info
    pub fn classify(&self, line: &str) -> Severity {
        let lowered = line.to_lowercase();
        self.rules
            .iter()
            .find(|(pattern, _)| pattern.is_match(&lowered))
            .map(|(_, severity)| *severity)
            .unwrap_or(Severity::Info)
    }
}

impl Default for SeverityClassifier {
    fn default() -> Self {
        Self::new()
    }
}

struct WatchedLog {
    tail: TailedFile,
    kind: String,
}

/// Collects newly appended log lines from the watched files
pub struct LogTailer {
    files: Vec<WatchedLog>,
    classifier: SeverityClassifier,
}

impl LogTailer {
    /// Watch the candidate files that exist right now
    pub fn new() -> Self {
        let existing: Vec<(PathBuf, String)> = CANDIDATE_LOG_FILES
            .iter()
            .filter(|(path, _)| std::path::Path::new(path).exists())
            .map(|(path, kind)| (PathBuf::from(path), kind.to_string()))
            .collect();

        let tailer = Self::with_files(existing);
        info!(files = tailer.files.len(), "log tailer initialized");
        tailer
    }

    /// Watch an explicit set of (path, category) files
    pub fn with_files(files: Vec<(PathBuf, String)>) -> Self {
        let files = files
            .into_iter()
            .filter_map(|(path, kind)| match TailedFile::seeded_at_end(path) {
                Ok(tail) => Some(WatchedLog { tail, kind }),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable log file");
                    None
                }
            })
            .collect();

        Self {
            files,
            classifier: SeverityClassifier::new(),
        }
    }

    /// Collect lines appended since the last call.
    ///
    /// Returns `None` when nothing new arrived. A file that fails to
    /// read is logged and skipped for the cycle; the others still
    /// contribute.
    pub fn collect(&mut self) -> Option<LogBatch> {
        let mut entries = Vec::new();
        let mut stats = LogStats::default();

        for watched in &mut self.files {
            let lines = match watched.tail.read_new_lines() {
                Ok(lines) => lines,
                Err(e) => {
                    warn!(path = %watched.tail.path.display(), error = %e, "failed to read log file");
                    continue;
                }
            };

            for line in lines {
                let severity = self.classifier.classify(&line);
                stats.total += 1;
                *stats.by_type.entry(watched.kind.clone()).or_insert(0) += 1;
                *stats
                    .by_severity
                    .entry(severity.as_str().to_string())
                    .or_insert(0) += 1;

                entries.push(LogEntry {
                    file: watched.tail.path.display().to_string(),
                    kind: watched.kind.clone(),
                    severity,
                    content: line,
                });
            }
        }

        if entries.is_empty() {
            return None;
        }

        let has_errors = stats.by_severity.get("error").copied().unwrap_or(0) > 0;
        let has_warnings = stats.by_severity.get("warning").copied().unwrap_or(0) > 0;
        let importance = if has_errors {
            "high"
        } else if has_warnings {
            "medium"
        } else {
            "low"
        };

        debug!(total = stats.total, "collected log entries");

        Some(LogBatch {
            timestamp: chrono::Utc::now().to_rfc3339(),
            entries,
            stats,
            has_errors,
            has_warnings,
            importance: importance.to_string(),
        })
    }
}

impl Default for LogTailer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_classifier_basic_severities() {
        let classifier = SeverityClassifier::new();

        assert_eq!(classifier.classify("kernel: disk ERROR detected"), Severity::Error);
        assert_eq!(classifier.classify("connection timeout reached"), Severity::Warning);
        assert_eq!(classifier.classify("service started cleanly"), Severity::Info);
        assert_eq!(classifier.classify("plain unremarkable line"), Severity::Info);
    }

    #[test]
    fn test_classifier_error_beats_warning() {
        let classifier = SeverityClassifier::new();
        // Matches both an error rule and a warning rule; the ordered
        // table keeps error precedence.
        assert_eq!(
            classifier.classify("warning: update failed with timeout"),
            Severity::Error
        );
    }

    #[test]
    fn test_classifier_failure_forms() {
        let classifier = SeverityClassifier::new();
        assert_eq!(classifier.classify("authentication failure for bob"), Severity::Error);
        assert_eq!(classifier.classify("job failed at step 3"), Severity::Error);
    }

    fn tailer_for(dir: &std::path::Path, name: &str, kind: &str) -> (LogTailer, PathBuf) {
        let path = dir.join(name);
        std::fs::write(&path, "historic line that must not be replayed\n").unwrap();
        let tailer = LogTailer::with_files(vec![(path.clone(), kind.to_string())]);
        (tailer, path)
    }

    #[test]
    fn test_collect_skips_historic_content() {
        let dir = tempfile::tempdir().unwrap();
        let (mut tailer, _path) = tailer_for(dir.path(), "syslog", "system");

        assert!(tailer.collect().is_none());
    }

    #[test]
    fn test_collect_classifies_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let (mut tailer, path) = tailer_for(dir.path(), "syslog", "system");

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, "disk error on sda1").unwrap();
        writeln!(f, "cpu temperature warning").unwrap();
        writeln!(f, "service nginx started").unwrap();

        let batch = tailer.collect().expect("batch expected");
        assert_eq!(batch.entries.len(), 3);
        assert!(batch.has_errors);
        assert!(batch.has_warnings);
        assert_eq!(batch.importance, "high");
        assert_eq!(batch.stats.by_type.get("system"), Some(&3));
        assert_eq!(batch.stats.by_severity.get("error"), Some(&1));

        // Second collect over unchanged files yields nothing.
        assert!(tailer.collect().is_none());
    }

    #[test]
    fn test_importance_without_errors() {
        let dir = tempfile::tempdir().unwrap();
        let (mut tailer, path) = tailer_for(dir.path(), "app.log", "web");

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, "request completed in 12ms").unwrap();

        let batch = tailer.collect().expect("batch expected");
        assert!(!batch.has_errors);
        assert!(!batch.has_warnings);
        assert_eq!(batch.importance, "low");
    }

    #[test]
    fn test_missing_candidate_files_are_filtered() {
        let tailer = LogTailer::with_files(vec![(
            PathBuf::from("/definitely/not/here.log"),
            "system".to_string(),
        )]);
        assert!(tailer.files.is_empty());
    }
}
