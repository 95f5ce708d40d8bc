//! Mock storefront for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::captcha::{Challenge, ChallengeKind, SolvedChallenge};
use crate::order::OrderSnapshot;
use crate::session::{Credentials, Session, SessionAuthenticator, SessionError};
use crate::storefront::{
    AdjustmentOutcome, AdjustmentPrompt, OrderDetails, OrderPage, PageCursor, Storefront,
    StorefrontError,
};

use super::fixtures;

/// Scripted behavior for one adjustment attempt on one order.
#[derive(Debug)]
pub enum MockAttempt {
    /// The request finishes without a challenge.
    Outcome(AdjustmentOutcome),
    /// A challenge is shown; submitting an answer yields this outcome.
    Challenge(AdjustmentOutcome),
    /// Opening the order page fails.
    OpenError(StorefrontError),
    /// Starting the adjustment flow fails.
    RequestError(StorefrontError),
    /// The order page has no adjustment entry point.
    NotAdjustable,
}

/// An operation performed against the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOperation {
    ListOrders { page: u32 },
    OpenOrder { order_id: String },
    RequestAdjustment { order_id: String },
    SubmitChallenge { order_id: String, answer: String },
    Verify,
    Login,
}

/// Mock implementation of `Storefront` and `SessionAuthenticator`.
///
/// Provides controllable behavior for testing:
/// - Serve a fixed order history split into pages
/// - Script the outcome of each adjustment attempt per order
/// - Simulate failed logins, rejected sessions and page errors
/// - Record every operation for assertions
///
/// Unscripted attempts are accepted without a refund amount.
///
/// # Example
///
/// ```rust,ignore
/// let storefront = MockStorefront::new();
/// storefront.set_pages(vec![vec![fixtures::dropped_snapshot("PO-1", 3, now)]]).await;
/// storefront
///     .script_attempt("PO-1", MockAttempt::Challenge(AdjustmentOutcome::Accepted { refund: None }))
///     .await;
///
/// // ... run the pipeline ...
///
/// assert_eq!(storefront.adjustment_requests().await, vec!["PO-1"]);
/// ```
#[derive(Debug)]
pub struct MockStorefront {
    pages: Arc<RwLock<Vec<Vec<OrderSnapshot>>>>,
    page_errors: Arc<RwLock<HashMap<u32, StorefrontError>>>,
    scripts: Arc<RwLock<HashMap<String, VecDeque<MockAttempt>>>>,
    pending_outcomes: Arc<RwLock<HashMap<String, AdjustmentOutcome>>>,
    tracking: Arc<RwLock<HashMap<String, String>>>,
    operations: Arc<RwLock<Vec<MockOperation>>>,
    session_valid: Arc<RwLock<bool>>,
    failing_logins: Arc<RwLock<u32>>,
    login_time: Arc<RwLock<DateTime<Utc>>>,
}

impl Default for MockStorefront {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStorefront {
    pub fn new() -> Self {
        Self {
            pages: Arc::new(RwLock::new(Vec::new())),
            page_errors: Arc::new(RwLock::new(HashMap::new())),
            scripts: Arc::new(RwLock::new(HashMap::new())),
            pending_outcomes: Arc::new(RwLock::new(HashMap::new())),
            tracking: Arc::new(RwLock::new(HashMap::new())),
            operations: Arc::new(RwLock::new(Vec::new())),
            session_valid: Arc::new(RwLock::new(true)),
            failing_logins: Arc::new(RwLock::new(0)),
            login_time: Arc::new(RwLock::new(fixtures::now())),
        }
    }

    /// Replace the order history; each inner vec is one page.
    pub async fn set_pages(&self, pages: Vec<Vec<OrderSnapshot>>) {
        *self.pages.write().await = pages;
    }

    /// Make listing page `page` fail once with `error`.
    pub async fn fail_page(&self, page: u32, error: StorefrontError) {
        self.page_errors.write().await.insert(page, error);
    }

    /// Queue the behavior of the next attempt on `order_id`.
    pub async fn script_attempt(&self, order_id: &str, attempt: MockAttempt) {
        self.scripts
            .write()
            .await
            .entry(order_id.to_string())
            .or_default()
            .push_back(attempt);
    }

    pub async fn set_tracking(&self, order_id: &str, tracking_ref: &str) {
        self.tracking
            .write()
            .await
            .insert(order_id.to_string(), tracking_ref.to_string());
    }

    /// Whether `verify` accepts restored sessions.
    pub async fn set_session_valid(&self, valid: bool) {
        *self.session_valid.write().await = valid;
    }

    /// Make the next `count` logins fail.
    pub async fn fail_logins(&self, count: u32) {
        *self.failing_logins.write().await = count;
    }

    /// Creation time of sessions returned by `login`.
    pub async fn set_login_time(&self, at: DateTime<Utc>) {
        *self.login_time.write().await = at;
    }

    /// All recorded operations, in order.
    pub async fn operations(&self) -> Vec<MockOperation> {
        self.operations.read().await.clone()
    }

    pub async fn clear_recorded(&self) {
        self.operations.write().await.clear();
    }

    /// Order ids passed to `request_adjustment`, in order.
    pub async fn adjustment_requests(&self) -> Vec<String> {
        self.operations
            .read()
            .await
            .iter()
            .filter_map(|op| match op {
                MockOperation::RequestAdjustment { order_id } => Some(order_id.clone()),
                _ => None,
            })
            .collect()
    }

    /// `(order_id, answer)` pairs passed to `submit_challenge`.
    pub async fn challenge_submissions(&self) -> Vec<(String, String)> {
        self.operations
            .read()
            .await
            .iter()
            .filter_map(|op| match op {
                MockOperation::SubmitChallenge { order_id, answer } => {
                    Some((order_id.clone(), answer.clone()))
                }
                _ => None,
            })
            .collect()
    }

    pub async fn login_count(&self) -> usize {
        self.count(|op| matches!(op, MockOperation::Login)).await
    }

    pub async fn listed_pages(&self) -> usize {
        self.count(|op| matches!(op, MockOperation::ListOrders { .. }))
            .await
    }

    async fn count(&self, pred: impl Fn(&MockOperation) -> bool) -> usize {
        self.operations.read().await.iter().filter(|op| pred(op)).count()
    }

    async fn record(&self, op: MockOperation) {
        self.operations.write().await.push(op);
    }

    /// Pop the script entry for `order_id` if `pred` accepts it.
    async fn take_script(
        &self,
        order_id: &str,
        pred: impl Fn(&MockAttempt) -> bool,
    ) -> Option<MockAttempt> {
        let mut scripts = self.scripts.write().await;
        let queue = scripts.get_mut(order_id)?;
        if queue.front().is_some_and(pred) {
            queue.pop_front()
        } else {
            None
        }
    }
}

fn mock_challenge(order_id: &str) -> Challenge {
    Challenge {
        kind: ChallengeKind::ImageText,
        image_base64: "bW9jaw==".to_string(),
        page_url: format!("https://shop.test/order/{}", order_id),
    }
}

#[async_trait]
impl Storefront for MockStorefront {
    async fn list_orders(
        &self,
        _session: &Session,
        cursor: PageCursor,
    ) -> Result<OrderPage, StorefrontError> {
        self.record(MockOperation::ListOrders { page: cursor.page })
            .await;
        if let Some(error) = self.page_errors.write().await.remove(&cursor.page) {
            return Err(error);
        }

        let pages = self.pages.read().await;
        let Some(orders) = pages.get(cursor.page as usize) else {
            return Ok(OrderPage::default());
        };
        let next = (cursor.page as usize + 1 < pages.len()).then(|| PageCursor {
            page: cursor.page + 1,
            offset: cursor.offset + orders.len(),
        });
        Ok(OrderPage {
            orders: orders.clone(),
            next,
        })
    }

    async fn open_order(
        &self,
        _session: &Session,
        order_id: &str,
    ) -> Result<OrderDetails, StorefrontError> {
        self.record(MockOperation::OpenOrder {
            order_id: order_id.to_string(),
        })
        .await;

        let scripted = self
            .take_script(order_id, |a| {
                matches!(a, MockAttempt::OpenError(_) | MockAttempt::NotAdjustable)
            })
            .await;
        let adjustable = match scripted {
            Some(MockAttempt::OpenError(error)) => return Err(error),
            Some(_) => false,
            None => true,
        };

        Ok(OrderDetails {
            id: order_id.to_string(),
            tracking_ref: self.tracking.read().await.get(order_id).cloned(),
            adjustable,
        })
    }

    async fn request_adjustment(
        &self,
        _session: &Session,
        order_id: &str,
    ) -> Result<AdjustmentPrompt, StorefrontError> {
        self.record(MockOperation::RequestAdjustment {
            order_id: order_id.to_string(),
        })
        .await;

        match self.take_script(order_id, |_| true).await {
            Some(MockAttempt::Outcome(outcome)) => Ok(AdjustmentPrompt::Outcome(outcome)),
            Some(MockAttempt::Challenge(outcome)) => {
                self.pending_outcomes
                    .write()
                    .await
                    .insert(order_id.to_string(), outcome);
                Ok(AdjustmentPrompt::Challenge(mock_challenge(order_id)))
            }
            Some(MockAttempt::RequestError(error)) | Some(MockAttempt::OpenError(error)) => {
                Err(error)
            }
            Some(MockAttempt::NotAdjustable) => Err(StorefrontError::Layout(
                "adjustment button not found".to_string(),
            )),
            None => Ok(AdjustmentPrompt::Outcome(AdjustmentOutcome::Accepted {
                refund: None,
            })),
        }
    }

    async fn submit_challenge(
        &self,
        _session: &Session,
        order_id: &str,
        _challenge: &Challenge,
        solution: &SolvedChallenge,
    ) -> Result<AdjustmentOutcome, StorefrontError> {
        self.record(MockOperation::SubmitChallenge {
            order_id: order_id.to_string(),
            answer: solution.answer.clone(),
        })
        .await;

        Ok(self
            .pending_outcomes
            .write()
            .await
            .remove(order_id)
            .unwrap_or(AdjustmentOutcome::Accepted { refund: None }))
    }
}

#[async_trait]
impl SessionAuthenticator for MockStorefront {
    async fn verify(&self, _session: &Session) -> Result<bool, SessionError> {
        self.record(MockOperation::Verify).await;
        Ok(*self.session_valid.read().await)
    }

    async fn login(&self, _credentials: &Credentials) -> Result<Session, SessionError> {
        self.record(MockOperation::Login).await;

        let mut failing = self.failing_logins.write().await;
        if *failing > 0 {
            *failing -= 1;
            return Err(SessionError::AuthenticationFailed(
                "mock login failure".to_string(),
            ));
        }
        Ok(fixtures::session(*self.login_time.read().await))
    }
}
