//! Audit trail
//!
//! Every pipeline step produces an [`AuditEntry`]. Sinks must never make a
//! step fail: a write error is logged and swallowed.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Default size at which the log file is rotated (10 MiB)
pub const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024;

/// Rotated generations kept next to the live file
pub const ROTATED_FILES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ValidatePlan,
    RenderPlan,
    CreateCheckpoint,
    DeleteCheckpoint,
    ExecuteCommand,
    ApplyPlan,
    Rollback,
    ValidationTest,
    Decision,
    AutoRollback,
}

impl std::str::FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("unknown audit action: {}", s))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,
    #[serde(default)]
    pub details: serde_json::Value,
}

impl AuditEntry {
    pub fn new(action: AuditAction, success: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            action,
            success,
            checkpoint_id: None,
            details: serde_json::Value::Null,
        }
    }

    pub fn with_checkpoint(mut self, id: impl Into<String>) -> Self {
        self.checkpoint_id = Some(id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Search criteria; unset fields match everything
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditFilter {
    pub action: Option<AuditAction>,
    pub checkpoint_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Keep only the most recent N matches
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.action.map_or(true, |a| a == entry.action)
            && self
                .checkpoint_id
                .as_ref()
                .map_or(true, |id| entry.checkpoint_id.as_ref() == Some(id))
            && self.since.map_or(true, |t| entry.timestamp >= t)
            && self.until.map_or(true, |t| entry.timestamp <= t)
    }

    fn truncate(&self, mut entries: Vec<AuditEntry>) -> Vec<AuditEntry> {
        if let Some(limit) = self.limit {
            if entries.len() > limit {
                entries.drain(..entries.len() - limit);
            }
        }
        entries
    }
}

/// Audit destination
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry);
    /// Matching entries, oldest first
    fn query(&self, filter: &AuditFilter) -> Vec<AuditEntry>;
}

/// Append-only JSON-lines log with size-based rotation
pub struct JsonlAuditLog {
    path: PathBuf,
    max_bytes: u64,
    write_lock: Mutex<()>,
}

impl JsonlAuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_max_bytes(path, DEFAULT_MAX_BYTES)
    }

    pub fn with_max_bytes(path: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self { path: path.into(), max_bytes, write_lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn rotated(&self, n: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{}", n));
        PathBuf::from(name)
    }

    fn rotate_if_needed(&self) -> std::io::Result<()> {
        let size = match fs::metadata(&self.path) {
            Ok(meta) => meta.len(),
            Err(_) => return Ok(()),
        };
        if size < self.max_bytes {
            return Ok(());
        }
        for n in (1..ROTATED_FILES).rev() {
            let from = self.rotated(n);
            if from.exists() {
                fs::rename(&from, self.rotated(n + 1))?;
            }
        }
        fs::rename(&self.path, self.rotated(1))
    }

    fn append(&self, entry: &AuditEntry) -> std::io::Result<()> {
        let _guard = self.write_lock.lock();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.rotate_if_needed()?;
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(line.as_bytes())
    }

    fn read_file(path: &Path, filter: &AuditFilter, out: &mut Vec<AuditEntry>) {
        let file = match fs::File::open(path) {
            Ok(f) => f,
            Err(_) => return,
        };
        for line in BufReader::new(file).lines().map_while(Result::ok) {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(&line) {
                Ok(entry) if filter.matches(&entry) => out.push(entry),
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!("Skipping malformed audit line in {}: {}", path.display(), e)
                }
            }
        }
    }
}

impl AuditSink for JsonlAuditLog {
    fn record(&self, entry: AuditEntry) {
        if let Err(e) = self.append(&entry) {
            tracing::error!("Failed to write audit entry to {}: {}", self.path.display(), e);
        }
    }

    fn query(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        let mut out = Vec::new();
        for n in (1..=ROTATED_FILES).rev() {
            Self::read_file(&self.rotated(n), filter, &mut out);
        }
        Self::read_file(&self.path, filter, &mut out);
        filter.truncate(out)
    }
}

/// In-memory sink
#[derive(Default)]
pub struct MemoryAuditLog {
    entries: RwLock<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().clone()
    }

    pub fn actions(&self) -> Vec<AuditAction> {
        self.entries.read().iter().map(|e| e.action).collect()
    }
}

impl AuditSink for MemoryAuditLog {
    fn record(&self, entry: AuditEntry) {
        self.entries.write().push(entry);
    }

    fn query(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        let matched = self.entries.read().iter().filter(|e| filter.matches(e)).cloned().collect();
        filter.truncate(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_jsonl_roundtrip_and_filter() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlAuditLog::new(dir.path().join("audit.jsonl"));

        log.record(AuditEntry::new(AuditAction::CreateCheckpoint, true).with_checkpoint("ckpt-1"));
        log.record(AuditEntry::new(AuditAction::ApplyPlan, false).with_checkpoint("ckpt-1"));
        log.record(AuditEntry::new(AuditAction::ValidatePlan, true));

        let all = log.query(&AuditFilter::default());
        assert_eq!(all.len(), 3);

        let by_ckpt = log.query(&AuditFilter {
            checkpoint_id: Some("ckpt-1".into()),
            ..Default::default()
        });
        assert_eq!(by_ckpt.len(), 2);

        let by_action = log.query(&AuditFilter {
            action: Some(AuditAction::ApplyPlan),
            ..Default::default()
        });
        assert_eq!(by_action.len(), 1);
        assert!(!by_action[0].success);
    }

    #[test]
    fn test_rotation_keeps_history_searchable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = JsonlAuditLog::with_max_bytes(&path, 64);

        for _ in 0..4 {
            log.record(AuditEntry::new(AuditAction::ExecuteCommand, true));
        }

        assert!(dir.path().join("audit.jsonl.1").exists());
        assert_eq!(log.query(&AuditFilter::default()).len(), 4);
    }

    #[test]
    fn test_time_range_and_limit() {
        let log = MemoryAuditLog::new();
        let mut old = AuditEntry::new(AuditAction::Rollback, true);
        old.timestamp = Utc::now() - Duration::days(3);
        log.record(old);
        log.record(AuditEntry::new(AuditAction::Rollback, true));
        log.record(AuditEntry::new(AuditAction::Rollback, false));

        let recent = log.query(&AuditFilter {
            since: Some(Utc::now() - Duration::days(1)),
            ..Default::default()
        });
        assert_eq!(recent.len(), 2);

        let last = log.query(&AuditFilter { limit: Some(1), ..Default::default() });
        assert_eq!(last.len(), 1);
        assert!(!last[0].success);
    }

    #[test]
    fn test_unwritable_path_does_not_panic() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();
        let log = JsonlAuditLog::new(blocker.join("audit.jsonl"));
        log.record(AuditEntry::new(AuditAction::ApplyPlan, true));
        assert!(log.query(&AuditFilter::default()).is_empty());
    }

    #[test]
    fn test_action_from_str() {
        assert_eq!("apply_plan".parse::<AuditAction>().unwrap(), AuditAction::ApplyPlan);
        assert!("launch".parse::<AuditAction>().is_err());
    }
}
