//! Order records and the adjustment state machine.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Where an order stands in the adjustment workflow.
///
/// States are ranked: `unseen` < `ineligible`/`eligible` < `attempted`/
/// `failed_retryable` < `succeeded`/`failed_terminal`. Orders only move up
/// the ranking, except that the two evaluation states may swap with each
/// other between runs and `attempted`/`failed_retryable` form the retry
/// cycle. Terminal states never change again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentState {
    Unseen,
    Ineligible,
    Eligible,
    Attempted,
    Succeeded,
    FailedRetryable,
    FailedTerminal,
}

impl AdjustmentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentState::Unseen => "unseen",
            AdjustmentState::Ineligible => "ineligible",
            AdjustmentState::Eligible => "eligible",
            AdjustmentState::Attempted => "attempted",
            AdjustmentState::Succeeded => "succeeded",
            AdjustmentState::FailedRetryable => "failed_retryable",
            AdjustmentState::FailedTerminal => "failed_terminal",
        }
    }

    /// Whether the order is frozen for the rest of its lifetime.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AdjustmentState::Succeeded | AdjustmentState::FailedTerminal
        )
    }

    /// Position in the forward ordering.
    pub fn rank(&self) -> u8 {
        match self {
            AdjustmentState::Unseen => 0,
            AdjustmentState::Ineligible | AdjustmentState::Eligible => 1,
            AdjustmentState::Attempted | AdjustmentState::FailedRetryable => 2,
            AdjustmentState::Succeeded | AdjustmentState::FailedTerminal => 3,
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: AdjustmentState) -> bool {
        use AdjustmentState::*;

        match (self, next) {
            (Unseen, Ineligible | Eligible) => true,
            (Ineligible | Eligible, Ineligible | Eligible | Attempted | FailedTerminal) => true,
            (Attempted, Succeeded | FailedRetryable | FailedTerminal) => true,
            (FailedRetryable, Attempted | FailedTerminal) => true,
            _ => false,
        }
    }
}

impl fmt::Display for AdjustmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of an order's audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateChange {
    pub state: AdjustmentState,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// A purchase tracked by the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    /// Site-assigned order identifier.
    pub id: String,
    pub purchase_date: DateTime<Utc>,
    pub paid_price: Decimal,
    /// Latest observed price; `None` when the lookup failed this run.
    #[serde(default)]
    pub current_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_count: Option<u32>,
    pub adjustment_state: AdjustmentState,
    #[serde(default)]
    pub attempt_count: u32,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Human-readable reason attached to the current state, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Amount credited by a successful adjustment, when the site reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_amount: Option<Decimal>,
    pub first_seen_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub history: Vec<StateChange>,
}

impl Order {
    /// Create a catalog record for an order seen for the first time.
    pub fn from_snapshot(snapshot: OrderSnapshot, now: DateTime<Utc>) -> Self {
        Self {
            id: snapshot.id,
            purchase_date: snapshot.purchase_date,
            paid_price: snapshot.paid_price,
            current_price: snapshot.current_price,
            tracking_ref: snapshot.tracking_ref,
            item_count: snapshot.item_count,
            adjustment_state: AdjustmentState::Unseen,
            attempt_count: 0,
            last_attempt_at: None,
            reason: None,
            refund_amount: None,
            first_seen_at: now,
            updated_at: now,
            history: vec![StateChange {
                state: AdjustmentState::Unseen,
                at: now,
                reason: None,
            }],
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.adjustment_state.is_terminal()
    }
}

/// What the order-history listing shows for one order during a scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderSnapshot {
    pub id: String,
    pub purchase_date: DateTime<Utc>,
    pub paid_price: Decimal,
    #[serde(default)]
    pub current_price: Option<Decimal>,
    #[serde(default)]
    pub tracking_ref: Option<String>,
    #[serde(default)]
    pub item_count: Option<u32>,
}
