//! Types for the run orchestrator.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::catalog::CatalogError;
use crate::scheduler::{RunOutcome, RunRecord, SchedulerError};
use crate::session::SessionError;
use crate::storefront::StorefrontError;

/// Errors that end a run early.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Another run is in progress.
    #[error("a run is already in progress")]
    AlreadyRunning,

    /// Shutdown was requested before the run started.
    #[error("shutting down")]
    ShuttingDown,

    #[error("session: {0}")]
    Session(#[from] SessionError),

    #[error("catalog: {0}")]
    Catalog(#[from] CatalogError),

    #[error("run history: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("run lock: {0}")]
    Lock(#[source] std::io::Error),
}

/// Why the order scan stopped before the last page.
#[derive(Debug, Error)]
#[error("page {page}: {source}")]
pub struct ScanError {
    /// Zero-based page that failed.
    pub page: u32,
    #[source]
    pub source: StorefrontError,
}

/// Phases of a run. `Failed` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Init,
    Authenticated,
    Scanning,
    Processing,
    Reporting,
    Done,
    Failed,
}

impl RunPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::Init => "init",
            RunPhase::Authenticated => "authenticated",
            RunPhase::Scanning => "scanning",
            RunPhase::Processing => "processing",
            RunPhase::Reporting => "reporting",
            RunPhase::Done => "done",
            RunPhase::Failed => "failed",
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Manual,
    Scheduled,
}

impl fmt::Display for RunTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunTrigger::Manual => f.write_str("manual"),
            RunTrigger::Scheduled => f.write_str("scheduled"),
        }
    }
}

/// Summary of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub trigger: RunTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// `Done` or `Failed`.
    pub phase: RunPhase,
    pub orders_scanned: u32,
    /// Orders found eligible this run, including in-flight ones.
    pub eligible: u32,
    pub succeeded: u32,
    /// Orders moved to `failed_terminal` this run.
    pub failed: u32,
    /// Subset of `failed` the storefront refused outright.
    pub not_available: u32,
    /// Orders left `failed_retryable` for a later run.
    pub retrying: u32,
    /// Eligible orders not processed (per-run cap or shutdown).
    pub deferred: u32,
    /// Sum of refunds recorded this run.
    pub refunded: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_truncated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_cause: Option<String>,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
}

impl RunReport {
    pub fn new(trigger: RunTrigger, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            trigger,
            started_at,
            finished_at: started_at,
            phase: RunPhase::Init,
            orders_scanned: 0,
            eligible: 0,
            succeeded: 0,
            failed: 0,
            not_available: 0,
            retrying: 0,
            deferred: 0,
            refunded: Decimal::ZERO,
            scan_truncated: None,
            abort_cause: None,
            cancelled: false,
            next_run_at: None,
        }
    }

    pub fn duration(&self) -> Duration {
        self.finished_at - self.started_at
    }

    pub fn is_aborted(&self) -> bool {
        self.phase == RunPhase::Failed
    }

    /// Orders that reached the storefront this run.
    pub fn processed(&self) -> u32 {
        self.succeeded + self.failed + self.retrying
    }

    pub fn outcome(&self) -> RunOutcome {
        if self.is_aborted() {
            return RunOutcome::Aborted;
        }
        if self.scan_truncated.is_some() || self.cancelled {
            return RunOutcome::Degraded;
        }
        let processed = self.processed();
        if processed == 0 {
            RunOutcome::Idle
        } else if self.retrying == processed {
            RunOutcome::Degraded
        } else if self.retrying > 0 {
            RunOutcome::Partial
        } else {
            RunOutcome::Succeeded
        }
    }

    /// The history entry for this run.
    pub fn to_record(&self) -> RunRecord {
        RunRecord {
            id: self.run_id,
            started_at: self.started_at,
            finished_at: self.finished_at,
            orders_scanned: self.orders_scanned,
            eligible: self.eligible,
            adjustments_succeeded: self.succeeded,
            adjustments_failed: self.failed,
            deferred: self.retrying + self.deferred,
            outcome: self.outcome(),
        }
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.num_seconds().max(0);
    if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.run_id.to_string();
        let short_id = &id[..8];

        if let Some(cause) = &self.abort_cause {
            return write!(
                f,
                "Run {} ({}) aborted after {}: {}",
                short_id,
                self.trigger,
                format_duration(self.duration()),
                cause
            );
        }

        writeln!(
            f,
            "Run {} ({}) finished in {}: {}",
            short_id,
            self.trigger,
            format_duration(self.duration()),
            self.outcome()
        )?;
        writeln!(
            f,
            "  scanned {} orders, {} eligible",
            self.orders_scanned, self.eligible
        )?;
        write!(
            f,
            "  succeeded {}, failed {} ({} not available), retrying {}, deferred {}",
            self.succeeded, self.failed, self.not_available, self.retrying, self.deferred
        )?;
        if self.refunded > Decimal::ZERO {
            write!(f, "\n  refunded {}", self.refunded)?;
        }
        if let Some(note) = &self.scan_truncated {
            write!(f, "\n  scan truncated: {}", note)?;
        }
        if self.cancelled {
            write!(f, "\n  stopped early by shutdown")?;
        }
        if let Some(at) = self.next_run_at {
            write!(f, "\n  next run: {}", at.format("%Y-%m-%d %H:%M UTC"))?;
        }
        Ok(())
    }
}
