//! Drives one adjustment attempt against the storefront.
//!
//! The executor never touches the catalog; the orchestrator persists every
//! result it returns.

mod types;

pub use types::*;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::captcha::CaptchaResolver;
use crate::order::Order;
use crate::pacing::Pacer;
use crate::session::{Session, SessionError};
use crate::storefront::{AdjustmentOutcome, AdjustmentPrompt, Storefront, StorefrontError};

/// Runs the open → request → (challenge) → confirm flow for one order.
pub struct AdjustmentExecutor {
    storefront: Arc<dyn Storefront>,
    resolver: Arc<dyn CaptchaResolver>,
    captcha_timeout: Duration,
    pacer: Pacer,
}

impl AdjustmentExecutor {
    pub fn new(
        storefront: Arc<dyn Storefront>,
        resolver: Arc<dyn CaptchaResolver>,
        captcha_timeout: Duration,
        pacer: Pacer,
    ) -> Self {
        Self {
            storefront,
            resolver,
            captcha_timeout,
            pacer,
        }
    }

    /// Attempt the adjustment for `order`.
    ///
    /// Only an expired session is an error; every other failure is folded
    /// into the returned status. Ambiguous outcomes are never reported as
    /// success.
    pub async fn attempt(
        &self,
        order: &Order,
        session: &Session,
    ) -> Result<AttemptResult, SessionError> {
        info!(
            "Requesting adjustment for {} (attempt {})",
            order.id, order.attempt_count
        );

        let details = match self.storefront.open_order(session, &order.id).await {
            Ok(details) => details,
            Err(StorefrontError::OrderNotFound(_)) | Err(StorefrontError::Layout(_)) => {
                warn!("Order page for {} not found", order.id);
                return Ok(AttemptResult::new(AttemptStatus::Terminal {
                    reason: REASON_NOT_FOUND.to_string(),
                }));
            }
            Err(e) => return transport_failure(&order.id, e).map(AttemptResult::new),
        };
        let tracking_ref = details.tracking_ref;

        if !details.adjustable {
            debug!("No adjustment entry point on {}", order.id);
            return Ok(AttemptResult::new(AttemptStatus::Retryable {
                reason: "adjustment_button_missing".to_string(),
            })
            .with_tracking(tracking_ref));
        }
        self.pacer.short("order page opened").await;

        let status = self.request(order, session).await?;
        info!("Order {}: {}", order.id, status);
        Ok(AttemptResult::new(status).with_tracking(tracking_ref))
    }

    async fn request(
        &self,
        order: &Order,
        session: &Session,
    ) -> Result<AttemptStatus, SessionError> {
        let prompt = match self.storefront.request_adjustment(session, &order.id).await {
            Ok(prompt) => prompt,
            Err(e) => return transport_failure(&order.id, e),
        };

        let challenge = match prompt {
            AdjustmentPrompt::Outcome(outcome) => return Ok(classify(outcome)),
            AdjustmentPrompt::Challenge(challenge) => challenge,
        };

        info!(
            "Solving challenge for {} with {} resolver",
            order.id,
            self.resolver.name()
        );
        let solution = match self.resolver.solve(&challenge, self.captcha_timeout).await {
            Ok(solution) => solution,
            Err(e) => {
                warn!("Challenge for {} unsolved: {}", order.id, e);
                return Ok(AttemptStatus::Retryable {
                    reason: REASON_CAPTCHA_UNSOLVED.to_string(),
                });
            }
        };
        self.pacer.short("challenge solved").await;

        match self
            .storefront
            .submit_challenge(session, &order.id, &challenge, &solution)
            .await
        {
            Ok(outcome) => Ok(classify(outcome)),
            Err(e) => transport_failure(&order.id, e),
        }
    }
}

fn classify(outcome: AdjustmentOutcome) -> AttemptStatus {
    match outcome {
        AdjustmentOutcome::Accepted { refund } => AttemptStatus::Succeeded { refund },
        AdjustmentOutcome::Rejected { reason } => AttemptStatus::Terminal {
            reason: format!("{}: {}", REASON_NOT_AVAILABLE, reason),
        },
        AdjustmentOutcome::Ambiguous { detail } => AttemptStatus::Retryable {
            reason: format!("ambiguous: {}", detail),
        },
    }
}

/// Session expiry aborts the run; anything else is worth retrying later.
fn transport_failure(order_id: &str, err: StorefrontError) -> Result<AttemptStatus, SessionError> {
    match err {
        StorefrontError::SessionExpired => Err(SessionError::Expired),
        StorefrontError::Timeout(what) => Ok(AttemptStatus::Retryable {
            reason: format!("timeout: {}", what),
        }),
        other => {
            warn!("Attempt for {} failed: {}", order_id, other);
            Ok(AttemptStatus::Retryable {
                reason: other.to_string(),
            })
        }
    }
}
