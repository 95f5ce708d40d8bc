//! Run orchestration.
//!
//! A run walks a fixed phase machine:
//! - **Init**: obtain a valid session (cached or fresh login)
//! - **Scanning**: merge the order history into the catalog, re-evaluate eligibility
//! - **Processing**: request adjustments for eligible orders, one at a time
//! - **Reporting**: record the run and plan the next one
//!
//! Any phase may end in `Failed`, which is absorbing.

mod config;
mod lock;
mod runner;
mod types;

pub use config::PipelineConfig;
pub use lock::{RunLock, RunLockGuard};
pub use runner::{Orchestrator, REASON_MAX_RETRIES, REASON_WINDOW_EXPIRED};
pub use types::{PipelineError, RunPhase, RunReport, RunTrigger, ScanError};
