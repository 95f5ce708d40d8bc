//! Human-readable per-order status files.
//!
//! One text file per order, named `<STATUS>_<tracking-or-id>.txt`, so the
//! reports directory can be scanned by eye. Writing a new status removes
//! the order's previous file.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::order::{AdjustmentState, Order};
use crate::persist::{atomic_write, PersistenceError};

const STATUS_CODES: [&str; 7] = [
    "UNSEEN",
    "INELIGIBLE",
    "ELIGIBLE",
    "IN_PROGRESS",
    "SUCCEEDED",
    "RETRYING",
    "FAILED",
];

fn status_code(state: AdjustmentState) -> &'static str {
    match state {
        AdjustmentState::Unseen => STATUS_CODES[0],
        AdjustmentState::Ineligible => STATUS_CODES[1],
        AdjustmentState::Eligible => STATUS_CODES[2],
        AdjustmentState::Attempted => STATUS_CODES[3],
        AdjustmentState::Succeeded => STATUS_CODES[4],
        AdjustmentState::FailedRetryable => STATUS_CODES[5],
        AdjustmentState::FailedTerminal => STATUS_CODES[6],
    }
}

fn status_description(state: AdjustmentState) -> &'static str {
    match state {
        AdjustmentState::Unseen => "Not evaluated yet",
        AdjustmentState::Ineligible => "Not eligible for a price adjustment",
        AdjustmentState::Eligible => "Eligible, adjustment not requested yet",
        AdjustmentState::Attempted => "Adjustment request in progress",
        AdjustmentState::Succeeded => "Price adjustment requested successfully",
        AdjustmentState::FailedRetryable => "Adjustment failed, will retry",
        AdjustmentState::FailedTerminal => "Adjustment failed permanently",
    }
}

/// Strip characters that are not allowed in file names.
fn safe_file_stem(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '\\' | '/' | '*' | '?' | ':' | '"' | '<' | '>' | '|'))
        .collect()
}

/// Writes one status file per order into a directory.
#[derive(Debug, Clone)]
pub struct OrderReportWriter {
    dir: PathBuf,
    max_attempts: u32,
}

impl OrderReportWriter {
    pub fn new(dir: impl Into<PathBuf>, max_attempts: u32) -> Self {
        Self {
            dir: dir.into(),
            max_attempts,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write (or replace) the status file for `order`.
    pub fn write(&self, order: &Order, now: DateTime<Utc>) -> Result<PathBuf, PersistenceError> {
        let stem = safe_file_stem(order.tracking_ref.as_deref().unwrap_or(&order.id));
        let code = status_code(order.adjustment_state);
        let path = self.dir.join(format!("{}_{}.txt", code, stem));

        self.remove_stale(&stem, code)?;
        if order.tracking_ref.is_some() {
            // Files written before the tracking number was known.
            self.remove_stale(&safe_file_stem(&order.id), "")?;
        }
        atomic_write(&path, self.render(order, now).as_bytes())?;
        Ok(path)
    }

    fn remove_stale(&self, stem: &str, keep: &str) -> Result<(), PersistenceError> {
        for code in STATUS_CODES.iter().filter(|c| **c != keep) {
            let stale = self.dir.join(format!("{}_{}.txt", code, stem));
            match std::fs::remove_file(&stale) {
                Ok(()) => tracing::debug!("Removed old order file {}", stale.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(PersistenceError::Write {
                        path: stale,
                        source,
                    })
                }
            }
        }
        Ok(())
    }

    fn render(&self, order: &Order, now: DateTime<Utc>) -> String {
        let or_na = |value: Option<String>| value.unwrap_or_else(|| "N/A".to_string());

        let mut out = format!(
            "Updated at: {}\n\n\
             Order ID: {}\n\
             Tracking: {}\n\
             Item count: {}\n\
             Purchased: {}\n\
             Paid: {}\n\
             Current price: {}\n\n\
             ===== ADJUSTMENT STATUS =====\n\
             Status: {}\n\
             Attempts: {}/{}\n",
            now.format("%Y-%m-%d %H:%M:%S UTC"),
            order.id,
            or_na(order.tracking_ref.clone()),
            or_na(order.item_count.map(|n| n.to_string())),
            order.purchase_date.format("%Y-%m-%d"),
            order.paid_price,
            or_na(order.current_price.map(|p| p.to_string())),
            status_description(order.adjustment_state),
            order.attempt_count,
            self.max_attempts,
        );

        if let Some(refund) = order.refund_amount {
            out.push_str(&format!("Refund amount: {}\n", refund));
        }
        if let Some(at) = order.last_attempt_at {
            out.push_str(&format!("Last attempt: {}\n", at.format("%Y-%m-%d %H:%M:%S UTC")));
        }
        out.push_str(&format!(
            "Last reason: {}\n",
            order.reason.as_deref().unwrap_or("none")
        ));
        out
    }
}
