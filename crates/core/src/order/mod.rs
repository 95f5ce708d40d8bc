//! Orders, their adjustment state machine, and eligibility rules.

mod eligibility;
mod types;

pub use eligibility::{
    evaluate, evaluate_with_window, EligibilityVerdict, IneligibleReason, ELIGIBILITY_WINDOW_DAYS,
};
pub use types::{AdjustmentState, Order, OrderSnapshot, StateChange};
