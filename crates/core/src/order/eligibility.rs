//! Eligibility rules for price adjustments.
//!
//! Pure functions of an order and a calendar date: the same inputs always
//! produce the same verdict, which is what lets the pipeline re-run without
//! a live session in tests.

use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::types::{AdjustmentState, Order};

/// Days after purchase during which an adjustment may be requested.
pub const ELIGIBILITY_WINDOW_DAYS: u32 = 30;

/// Outcome of evaluating one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum EligibilityVerdict {
    Eligible { savings: Decimal },
    Ineligible { reason: IneligibleReason },
}

impl EligibilityVerdict {
    pub fn is_eligible(&self) -> bool {
        matches!(self, EligibilityVerdict::Eligible { .. })
    }

    pub fn savings(&self) -> Option<Decimal> {
        match self {
            EligibilityVerdict::Eligible { savings } => Some(*savings),
            EligibilityVerdict::Ineligible { .. } => None,
        }
    }
}

/// Why an order cannot be adjusted right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IneligibleReason {
    /// Already succeeded or permanently failed.
    Terminal { state: AdjustmentState },
    /// Purchased more than the window ago.
    WindowExpired { age_days: i64 },
    /// The current price could not be looked up.
    PriceUnknown,
    /// Price is not lower than what was paid.
    NoPriceDrop { paid: Decimal, current: Decimal },
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IneligibleReason::Terminal { state } => write!(f, "terminal: {}", state),
            IneligibleReason::WindowExpired { age_days } => {
                write!(f, "window_expired: purchased {} days ago", age_days)
            }
            IneligibleReason::PriceUnknown => f.write_str("price_unknown"),
            IneligibleReason::NoPriceDrop { paid, current } => {
                write!(f, "no_price_drop: paid {}, now {}", paid, current)
            }
        }
    }
}

/// Evaluate an order against the standard 30-day window.
pub fn evaluate(order: &Order, today: NaiveDate) -> EligibilityVerdict {
    evaluate_with_window(order, today, ELIGIBILITY_WINDOW_DAYS)
}

/// Evaluate an order against a custom window.
///
/// Age is counted in whole calendar days, so an order bought exactly
/// `window_days` before `today` is still eligible.
pub fn evaluate_with_window(order: &Order, today: NaiveDate, window_days: u32) -> EligibilityVerdict {
    if order.adjustment_state.is_terminal() {
        return ineligible(IneligibleReason::Terminal {
            state: order.adjustment_state,
        });
    }

    let age_days = (today - order.purchase_date.date_naive()).num_days();
    if age_days > i64::from(window_days) {
        return ineligible(IneligibleReason::WindowExpired { age_days });
    }

    let Some(current) = order.current_price else {
        return ineligible(IneligibleReason::PriceUnknown);
    };

    if current >= order.paid_price {
        return ineligible(IneligibleReason::NoPriceDrop {
            paid: order.paid_price,
            current,
        });
    }

    EligibilityVerdict::Eligible {
        savings: order.paid_price - current,
    }
}

fn ineligible(reason: IneligibleReason) -> EligibilityVerdict {
    EligibilityVerdict::Ineligible { reason }
}
