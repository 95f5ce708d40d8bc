//! Adaptive run scheduling.
//!
//! Every finished run is appended to a history file and fed to a small
//! success model. The next run is placed at the hour the model rates most
//! likely to go through, within the configured active hours.

mod config;
mod history;
mod model;
mod runner;

pub use config::{ModelKind, SchedulerConfig};
pub use history::{RunHistory, RunOutcome, RunRecord};
pub use model::{
    create_model, training_set, Features, FrequencyModel, LogisticModel, Sample, SuccessModel,
};
pub use runner::{PlanReason, RunPlan, Scheduler, SchedulerError};
