//! Append-only audit trail.
//!
//! Every assessment produces exactly one entry. Sink failures are traced and
//! swallowed; auditing must never change a verdict.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::context::{AssessmentContext, Decision};
use crate::error::Result;

/// One audited assessment.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub timestamp: DateTime<Utc>,
    pub context: AssessmentContext,
    pub decision: Decision,
    pub duration_ms: u64,
}

impl AuditLogEntry {
    pub fn new(context: AssessmentContext, decision: Decision, duration_ms: u64) -> Self {
        Self {
            timestamp: Utc::now(),
            context,
            decision,
            duration_ms,
        }
    }
}

/// Destination for audit entries.
pub trait AuditSink: Send + Sync {
    fn log(&self, entry: AuditLogEntry);
}

fn default_audit_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".sapperai")
        .join("audit.log")
}

/// JSONL file sink.
pub struct FileAuditLogger {
    file: Mutex<File>,
    path: PathBuf,
}

impl FileAuditLogger {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            file: Mutex::new(file),
            path,
        })
    }

    pub fn with_default_path() -> Result<Self> {
        Self::new(default_audit_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for FileAuditLogger {
    fn log(&self, entry: AuditLogEntry) {
        let line = match serde_json::to_string(&entry) {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(error = %err, "failed to serialize audit entry");
                return;
            }
        };
        match self.file.lock() {
            Ok(mut file) => {
                if let Err(err) = writeln!(file, "{line}") {
                    tracing::warn!(error = %err, path = %self.path.display(), "audit write failed");
                }
            }
            Err(_) => tracing::warn!("audit sink mutex poisoned, dropping entry"),
        }
    }
}

/// Collects entries in memory, for tests and campaign traces.
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditLogEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditLogEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn log(&self, entry: AuditLogEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}

/// Discards everything. Used by in-memory probing, which must leave no trace.
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn log(&self, _entry: AuditLogEntry) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ToolCall;
    use crate::policy::{Action, Policy};
    use serde_json::json;

    fn sample_entry() -> AuditLogEntry {
        let ctx = AssessmentContext::pre_tool_call(
            ToolCall::new("run", json!({"cmd": "ls"})),
            Policy::default(),
        );
        AuditLogEntry::new(ctx, Decision::default_verdict(Action::Allow), 3)
    }

    #[test]
    fn file_sink_appends_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let sink = FileAuditLogger::new(&path).unwrap();
        sink.log(sample_entry());
        sink.log(sample_entry());

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: AuditLogEntry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.duration_ms, 3);
    }

    #[test]
    fn memory_sink_collects_entries() {
        let sink = MemoryAuditSink::new();
        sink.log(sample_entry());
        assert_eq!(sink.entries().len(), 1);
    }
}
