//! Testing utilities and mock implementations for pipeline tests.
//!
//! This module provides mock implementations of the storefront, the
//! authenticator and the CAPTCHA resolver, plus a controllable clock, so a
//! full run can be exercised without a browser or network access.
//!
//! # Example
//!
//! ```rust,ignore
//! use priceguard_core::testing::{fixtures, FixedClock, MockResolver, MockStorefront};
//!
//! let storefront = MockStorefront::new();
//! let resolver = MockResolver::new();
//! let clock = FixedClock::new(fixtures::now());
//!
//! // Configure the order history
//! storefront.set_pages(vec![vec![fixtures::dropped_snapshot("PO-1", 3, fixtures::now())]]).await;
//!
//! // Build an Orchestrator around them...
//! ```

mod mock_clock;
mod mock_resolver;
mod mock_storefront;

pub use mock_clock::FixedClock;
pub use mock_resolver::MockResolver;
pub use mock_storefront::{MockAttempt, MockOperation, MockStorefront};

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use crate::order::OrderSnapshot;
    use crate::session::{Cookie, Credentials, Session};

    /// Reference instant used across tests: Sunday 2024-03-10 12:00 UTC.
    pub fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0)
            .single()
            .unwrap_or_default()
    }

    /// An order bought `days_ago` days before `now` whose price did not move.
    pub fn snapshot(id: &str, days_ago: i64, now: DateTime<Utc>) -> OrderSnapshot {
        OrderSnapshot {
            id: id.to_string(),
            purchase_date: now - Duration::days(days_ago),
            paid_price: Decimal::new(2000, 2),
            current_price: Some(Decimal::new(2000, 2)),
            tracking_ref: None,
            item_count: Some(1),
        }
    }

    /// An order bought `days_ago` days before `now`, paid 20.00, now 12.00.
    pub fn dropped_snapshot(id: &str, days_ago: i64, now: DateTime<Utc>) -> OrderSnapshot {
        OrderSnapshot {
            current_price: Some(Decimal::new(1200, 2)),
            ..snapshot(id, days_ago, now)
        }
    }

    /// A session created at `created_at`, valid for 72 hours.
    pub fn session(created_at: DateTime<Utc>) -> Session {
        Session {
            cookies: vec![Cookie {
                name: "api_uid".to_string(),
                value: "mock-session".to_string(),
                domain: Some(".shop.test".to_string()),
                path: Some("/".to_string()),
                secure: Some(true),
                http_only: Some(true),
                expiry: None,
            }],
            created_at,
            expires_at: created_at + Duration::hours(72),
        }
    }

    pub fn credentials() -> Credentials {
        Credentials {
            email: "shopper@example.com".to_string(),
            password: "hunter2".to_string(),
        }
    }
}
