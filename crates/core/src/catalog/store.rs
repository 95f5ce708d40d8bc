//! Order catalog trait and types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::order::{AdjustmentState, Order, OrderSnapshot};
use crate::persist::PersistenceError;

/// Error type for catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Order not found.
    #[error("order not found: {0}")]
    NotFound(String),

    /// The requested state change breaks the forward-only ordering.
    #[error("cannot move order {order_id} from {from} to {to}")]
    InvalidTransition {
        order_id: String,
        from: AdjustmentState,
        to: AdjustmentState,
    },

    /// The backing file could not be read or written.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Result of merging one listing snapshot into the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// First time this order was seen.
    Created,
    /// Existing order, price or tracking data changed.
    Refreshed,
    /// Existing order, nothing changed.
    Unchanged,
    /// Existing terminal order; left untouched.
    Frozen,
}

/// A requested state change.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub to: AdjustmentState,
    pub reason: Option<String>,
    pub refund_amount: Option<Decimal>,
    /// Tracking number discovered while handling the order.
    pub tracking_ref: Option<String>,
}

impl Transition {
    pub fn to(state: AdjustmentState) -> Self {
        Self {
            to: state,
            reason: None,
            refund_amount: None,
            tracking_ref: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_refund(mut self, amount: Option<Decimal>) -> Self {
        self.refund_amount = amount;
        self
    }

    pub fn with_tracking(mut self, tracking_ref: Option<String>) -> Self {
        self.tracking_ref = tracking_ref;
        self
    }
}

/// Filter for querying orders.
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    /// Only orders currently in one of these states (empty = any).
    pub states: Vec<AdjustmentState>,
    /// Skip terminal orders.
    pub exclude_terminal: bool,
    /// Maximum number of results (0 = unlimited).
    pub limit: usize,
}

impl OrderFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(mut self, state: AdjustmentState) -> Self {
        self.states.push(state);
        self
    }

    pub fn non_terminal(mut self) -> Self {
        self.exclude_terminal = true;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn matches(&self, order: &Order) -> bool {
        if self.exclude_terminal && order.is_terminal() {
            return false;
        }
        self.states.is_empty() || self.states.contains(&order.adjustment_state)
    }
}

/// Durable record of every order ever seen.
///
/// Implementations persist each mutation before returning, and never delete
/// or truncate: orders only move forward through their states.
pub trait OrderCatalog: Send + Sync {
    /// Get an order by ID.
    fn get(&self, id: &str) -> Result<Option<Order>, CatalogError>;

    /// List orders matching the filter, oldest purchase first.
    fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, CatalogError>;

    /// Count orders matching the filter.
    fn count(&self, filter: &OrderFilter) -> Result<usize, CatalogError>;

    /// Create the order if new, otherwise refresh its listing data unless it
    /// is terminal.
    fn merge_snapshot(
        &self,
        snapshot: OrderSnapshot,
        now: DateTime<Utc>,
    ) -> Result<MergeOutcome, CatalogError>;

    /// Re-read durable state written by another process.
    ///
    /// Called at the start of every run, while the run lock is held.
    fn reload(&self) -> Result<(), CatalogError>;

    /// Apply a state change, rejecting anything the state ordering forbids.
    ///
    /// Entering `attempted` increments the attempt counter.
    fn transition(
        &self,
        id: &str,
        transition: Transition,
        now: DateTime<Utc>,
    ) -> Result<Order, CatalogError>;
}
