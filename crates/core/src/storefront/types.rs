//! Storefront automation seam: listing orders and driving the adjustment flow.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::captcha::{Challenge, SolvedChallenge};
use crate::order::OrderSnapshot;
use crate::session::Session;

/// Errors that can occur while driving the storefront.
#[derive(Debug, Error)]
pub enum StorefrontError {
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Unexpected page layout: {0}")]
    Layout(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("Storefront session expired")]
    SessionExpired,

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
}

/// Position in the lazily expanded order history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageCursor {
    /// Number of "view more" expansions performed before this page.
    pub page: u32,
    /// Number of orders already returned by earlier pages.
    pub offset: usize,
}

/// One page of the order history.
#[derive(Debug, Clone, Default)]
pub struct OrderPage {
    pub orders: Vec<OrderSnapshot>,
    /// Cursor for the following page; `None` when the history is exhausted.
    pub next: Option<PageCursor>,
}

/// What the order detail page shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDetails {
    pub id: String,
    pub tracking_ref: Option<String>,
    /// Whether the page offers the price adjustment entry point.
    pub adjustable: bool,
}

/// Result of submitting an adjustment request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdjustmentOutcome {
    /// The storefront confirmed the request.
    Accepted { refund: Option<Decimal> },
    /// The storefront refused the request for this order.
    Rejected { reason: String },
    /// Neither confirmation nor refusal could be read.
    Ambiguous { detail: String },
}

/// What the storefront shows after the adjustment request is started.
#[derive(Debug, Clone, PartialEq)]
pub enum AdjustmentPrompt {
    /// The flow finished without a verification step.
    Outcome(AdjustmentOutcome),
    /// A challenge must be solved before the request goes through.
    Challenge(Challenge),
}

/// Storefront automation backend.
#[async_trait]
pub trait Storefront: Send + Sync {
    /// Read one page of the order history, starting at `cursor`.
    async fn list_orders(
        &self,
        session: &Session,
        cursor: PageCursor,
    ) -> Result<OrderPage, StorefrontError>;

    /// Open the detail page of one order.
    async fn open_order(
        &self,
        session: &Session,
        order_id: &str,
    ) -> Result<OrderDetails, StorefrontError>;

    /// Start the adjustment flow on the currently open order.
    async fn request_adjustment(
        &self,
        session: &Session,
        order_id: &str,
    ) -> Result<AdjustmentPrompt, StorefrontError>;

    /// Answer the challenge and read the final outcome.
    async fn submit_challenge(
        &self,
        session: &Session,
        order_id: &str,
        challenge: &Challenge,
        solution: &SolvedChallenge,
    ) -> Result<AdjustmentOutcome, StorefrontError>;
}
