//! Append-only run history.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::persist::{self, PersistenceError};

/// How a run ended, as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Attempts were made and none was left retryable.
    Succeeded,
    /// Some adjustments succeeded, others were deferred.
    Partial,
    /// Nothing to attempt.
    Idle,
    /// The scan was cut short, the run was cancelled, or every attempt was
    /// blocked.
    Degraded,
    /// The run failed before finishing.
    Aborted,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Succeeded => "succeeded",
            RunOutcome::Partial => "partial",
            RunOutcome::Idle => "idle",
            RunOutcome::Degraded => "degraded",
            RunOutcome::Aborted => "aborted",
        }
    }

    /// Whether the storefront let this run through unhindered.
    pub fn training_label(&self) -> bool {
        !matches!(self, RunOutcome::Degraded | RunOutcome::Aborted)
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub orders_scanned: u32,
    pub eligible: u32,
    pub adjustments_succeeded: u32,
    pub adjustments_failed: u32,
    pub deferred: u32,
    pub outcome: RunOutcome,
}

/// Run records stored as one JSON array, rewritten atomically on append.
#[derive(Debug)]
pub struct RunHistory {
    path: PathBuf,
    records: Mutex<Vec<RunRecord>>,
}

impl RunHistory {
    /// Open the history at `path`; a missing file is an empty history.
    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        let records = persist::read_json(path)?.unwrap_or_default();
        Ok(Self {
            path: path.to_path_buf(),
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RunRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a record. Memory is only updated once the file is written.
    pub fn append(&self, record: RunRecord) -> Result<(), PersistenceError> {
        let mut records = self.lock();
        let mut updated = records.clone();
        updated.push(record);
        persist::write_json(&self.path, &updated, "run history")?;
        *records = updated;
        Ok(())
    }

    /// Re-read the file, picking up runs recorded by another process.
    /// Returns the number of records now held.
    pub fn reload(&self) -> Result<usize, PersistenceError> {
        let mut records = self.lock();
        *records = persist::read_json(&self.path)?.unwrap_or_default();
        Ok(records.len())
    }

    /// All records, oldest first.
    pub fn records(&self) -> Vec<RunRecord> {
        self.lock().clone()
    }

    /// The `n` most recent records, oldest first.
    pub fn recent(&self, n: usize) -> Vec<RunRecord> {
        let records = self.lock();
        let start = records.len().saturating_sub(n);
        records[start..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;
    use chrono::Duration;
    use tempfile::TempDir;

    fn record(hours_ago: i64, outcome: RunOutcome) -> RunRecord {
        let started_at = fixtures::now() - Duration::hours(hours_ago);
        RunRecord {
            id: Uuid::new_v4(),
            started_at,
            finished_at: started_at + Duration::minutes(5),
            orders_scanned: 4,
            eligible: 1,
            adjustments_succeeded: 1,
            adjustments_failed: 0,
            deferred: 0,
            outcome,
        }
    }

    #[test]
    fn test_training_labels() {
        assert!(RunOutcome::Succeeded.training_label());
        assert!(RunOutcome::Partial.training_label());
        assert!(RunOutcome::Idle.training_label());
        assert!(!RunOutcome::Degraded.training_label());
        assert!(!RunOutcome::Aborted.training_label());
    }

    #[test]
    fn test_append_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("runs.json");

        let history = RunHistory::open(&path).unwrap();
        assert!(history.is_empty());
        history.append(record(48, RunOutcome::Idle)).unwrap();
        history.append(record(24, RunOutcome::Succeeded)).unwrap();

        let reopened = RunHistory::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.records(), history.records());
    }

    #[test]
    fn test_reload_sees_other_writer() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("runs.json");
        let ours = RunHistory::open(&path).unwrap();
        let theirs = RunHistory::open(&path).unwrap();

        theirs.append(record(3, RunOutcome::Idle)).unwrap();
        assert!(ours.is_empty());

        assert_eq!(ours.reload().unwrap(), 1);
        ours.append(record(1, RunOutcome::Succeeded)).unwrap();
        assert_eq!(RunHistory::open(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_recent_returns_tail() {
        let dir = TempDir::new().unwrap();
        let history = RunHistory::open(&dir.path().join("runs.json")).unwrap();
        for h in [72, 48, 24] {
            history.append(record(h, RunOutcome::Idle)).unwrap();
        }

        let recent = history.recent(2);

        assert_eq!(recent.len(), 2);
        assert!(recent[0].started_at < recent[1].started_at);
        assert_eq!(history.recent(10).len(), 3);
    }

    #[test]
    fn test_corrupt_history_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("runs.json");
        std::fs::write(&path, "[{not json").unwrap();

        assert!(RunHistory::open(&path).is_err());
    }

    #[test]
    fn test_outcome_serializes_snake_case() {
        let json = serde_json::to_string(&RunOutcome::Degraded).unwrap();
        assert_eq!(json, "\"degraded\"");
    }
}
