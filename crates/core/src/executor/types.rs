use std::fmt;

use rust_decimal::Decimal;

use crate::order::AdjustmentState;

/// Reason recorded when the order page cannot be opened.
pub const REASON_NOT_FOUND: &str = "not_found";
/// Reason recorded when the verification challenge could not be solved.
pub const REASON_CAPTCHA_UNSOLVED: &str = "captcha_unsolved";
/// Prefix of the reason recorded when the storefront refuses the request.
pub const REASON_NOT_AVAILABLE: &str = "not_available";

/// How one adjustment attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptStatus {
    /// The storefront confirmed the request.
    Succeeded { refund: Option<Decimal> },
    /// Worth trying again later.
    Retryable { reason: String },
    /// Never worth trying again.
    Terminal { reason: String },
}

impl AttemptStatus {
    /// State the order moves to after this attempt.
    pub fn target_state(&self) -> AdjustmentState {
        match self {
            AttemptStatus::Succeeded { .. } => AdjustmentState::Succeeded,
            AttemptStatus::Retryable { .. } => AdjustmentState::FailedRetryable,
            AttemptStatus::Terminal { .. } => AdjustmentState::FailedTerminal,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            AttemptStatus::Succeeded { .. } => None,
            AttemptStatus::Retryable { reason } | AttemptStatus::Terminal { reason } => {
                Some(reason)
            }
        }
    }

    /// Whether the storefront explicitly refused the adjustment.
    pub fn is_not_available(&self) -> bool {
        matches!(self, AttemptStatus::Terminal { reason } if reason.starts_with(REASON_NOT_AVAILABLE))
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptStatus::Succeeded { refund: Some(amount) } => {
                write!(f, "succeeded (refund {})", amount)
            }
            AttemptStatus::Succeeded { refund: None } => write!(f, "succeeded"),
            AttemptStatus::Retryable { reason } => write!(f, "retryable: {}", reason),
            AttemptStatus::Terminal { reason } => write!(f, "terminal: {}", reason),
        }
    }
}

/// Result of one attempt, with what was learned about the order on the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptResult {
    pub status: AttemptStatus,
    /// Tracking number read from the order page, when shown.
    pub tracking_ref: Option<String>,
}

impl AttemptResult {
    pub fn new(status: AttemptStatus) -> Self {
        Self {
            status,
            tracking_ref: None,
        }
    }

    pub fn with_tracking(mut self, tracking_ref: Option<String>) -> Self {
        self.tracking_ref = tracking_ref;
        self
    }
}
