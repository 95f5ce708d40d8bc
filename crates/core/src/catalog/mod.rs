//! Order catalog - the durable record of every order ever seen.
//!
//! Orders are created the first time they show up in the order history and
//! are never deleted, only moved forward to a terminal state. This keeps an
//! audit trail and guarantees at most one successful adjustment per order
//! across restarts.

mod json;
mod report;
mod store;

pub use json::JsonOrderCatalog;
pub use report::OrderReportWriter;
pub use store::{CatalogError, MergeOutcome, OrderCatalog, OrderFilter, Transition};
