//! Storefront driven through a real browser.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::captcha::{CaptchaResolver, Challenge, ChallengeKind, SolvedChallenge};
use crate::clock::Clock;
use crate::config::{SelectorConfig, StorefrontConfig};
use crate::order::OrderSnapshot;
use crate::pacing::Pacer;
use crate::session::{Credentials, Session, SessionAuthenticator, SessionError};

use super::parse::{self, DialogKind};
use super::webdriver::{BrowserOptions, ElementRef, WebDriverClient, WebDriverError};
use super::{
    AdjustmentOutcome, AdjustmentPrompt, OrderDetails, OrderPage, PageCursor, Storefront,
    StorefrontError,
};

/// How long to look for the account marker when checking a restored session.
const VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for the adjustment dialog to open.
const DIALOG_TIMEOUT: Duration = Duration::from_secs(5);

/// `Storefront` and `SessionAuthenticator` backed by a WebDriver browser.
pub struct WebDriverStorefront {
    driver: WebDriverClient,
    config: StorefrontConfig,
    pacer: Pacer,
    clock: Arc<dyn Clock>,
    /// Answers challenges shown during login.
    resolver: Option<Arc<dyn CaptchaResolver>>,
    captcha_timeout: Duration,
    /// `created_at` of the session whose cookies are loaded in the browser.
    loaded_session: Mutex<Option<DateTime<Utc>>>,
}

impl WebDriverStorefront {
    pub fn new(
        config: StorefrontConfig,
        pacer: Pacer,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StorefrontError> {
        let driver = WebDriverClient::new(
            &config.webdriver_url,
            BrowserOptions {
                headless: config.headless,
                page_load_timeout: Duration::from_secs(config.page_timeout_secs as u64),
            },
        )?;

        Ok(Self {
            driver,
            config,
            pacer,
            clock,
            resolver: None,
            captcha_timeout: Duration::ZERO,
            loaded_session: Mutex::new(None),
        })
    }

    /// Solve login challenges with `resolver` instead of giving up on them.
    pub fn with_resolver(mut self, resolver: Arc<dyn CaptchaResolver>, timeout: Duration) -> Self {
        self.resolver = Some(resolver);
        self.captcha_timeout = timeout;
        self
    }

    fn selectors(&self) -> &SelectorConfig {
        &self.config.selectors
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn orders_url(&self) -> String {
        self.url("bgt_orders.html")
    }

    fn order_url(&self, order_id: &str) -> String {
        self.url(&format!(
            "bgt_order_detail.html?parent_order_sn={}",
            urlencoding::encode(order_id)
        ))
    }

    /// Close the browser.
    pub async fn shutdown(&self) {
        if let Err(e) = self.driver.quit().await {
            warn!("Browser shutdown failed: {}", e);
        }
        *self.loaded_session.lock().await = None;
    }

    /// Load `session`'s cookies into the browser unless they already are.
    async fn restore(&self, session: &Session) -> Result<(), WebDriverError> {
        let mut loaded = self.loaded_session.lock().await;
        if *loaded == Some(session.created_at) {
            return Ok(());
        }

        debug!("Restoring {} session cookies", session.cookies.len());
        // Cookies can only be set for the domain currently displayed.
        self.driver.navigate(&self.url("")).await?;
        self.driver.delete_cookies().await?;
        for cookie in &session.cookies {
            if let Err(e) = self.driver.add_cookie(cookie).await {
                debug!("Skipping cookie {}: {}", cookie.name, e);
            }
        }
        *loaded = Some(session.created_at);
        Ok(())
    }

    /// Fail with `SessionExpired` when the storefront bounced us to login.
    async fn ensure_logged_in(&self) -> Result<(), StorefrontError> {
        let url = self.driver.current_url().await?;
        if url.contains("login") {
            *self.loaded_session.lock().await = None;
            return Err(StorefrontError::SessionExpired);
        }
        Ok(())
    }

    async fn read_card(&self, card: &ElementRef) -> Option<OrderSnapshot> {
        let text = self.driver.text(card).await.ok()?;
        let today = self.clock.now().date_naive();
        let paid_price = self.card_price(card, &self.selectors().card_paid_price).await;
        let current_price = self
            .card_price(card, &self.selectors().card_current_price)
            .await;

        match parse::card_snapshot(&text, today, paid_price, current_price) {
            Ok(snapshot) => Some(snapshot),
            Err(skip) => {
                warn!("Skipping card: {}", skip);
                None
            }
        }
    }

    async fn card_price(&self, card: &ElementRef, xpath: &str) -> Option<Decimal> {
        let element = self.driver.find_in(card, xpath).await.ok()?;
        parse::parse_price(&self.driver.text(&element).await.ok()?)
    }

    async fn capture_challenge(&self, element: &ElementRef) -> Result<Challenge, StorefrontError> {
        let image_base64 = self.driver.screenshot(element).await?;
        let page_url = self.driver.current_url().await?;
        let kind = if self
            .driver
            .try_find(&self.selectors().challenge_input)
            .await?
            .is_some()
        {
            ChallengeKind::ImageText
        } else {
            ChallengeKind::Puzzle
        };
        Ok(Challenge {
            kind,
            image_base64,
            page_url,
        })
    }

    /// Get an answer for a login challenge. Each challenge is solved once.
    async fn answer_login_challenge(
        &self,
        challenge: &Challenge,
    ) -> Result<SolvedChallenge, SessionError> {
        let Some(resolver) = &self.resolver else {
            warn!("Login challenge shown and no resolver is set");
            return Err(SessionError::ChallengeRequired);
        };

        info!("Solving login challenge with {} resolver", resolver.name());
        resolver
            .solve(challenge, self.captcha_timeout)
            .await
            .map_err(|e| {
                warn!("Login challenge not solved: {}", e);
                SessionError::ChallengeRequired
            })
    }

    /// Capture the challenge in `element`, answer it and submit the answer.
    async fn pass_login_challenge(&self, element: &ElementRef) -> Result<(), SessionError> {
        let failed = |e: WebDriverError| SessionError::AuthenticationFailed(e.to_string());

        let challenge = self
            .capture_challenge(element)
            .await
            .map_err(|e| SessionError::AuthenticationFailed(e.to_string()))?;
        let solution = self.answer_login_challenge(&challenge).await?;

        let input = self
            .driver
            .find(&self.selectors().challenge_input)
            .await
            .map_err(failed)?;
        self.driver
            .send_keys(&input, &solution.answer)
            .await
            .map_err(failed)?;
        let submit = self
            .driver
            .find(&self.selectors().challenge_submit)
            .await
            .map_err(failed)?;
        self.driver.script_click(&submit).await.map_err(failed)?;
        self.pacer.short("login challenge submitted").await;
        Ok(())
    }

    /// Read the page after a request was submitted.
    async fn read_outcome(&self) -> Result<AdjustmentOutcome, StorefrontError> {
        let timeout = self.driver.page_timeout();
        let confirmation = match self
            .driver
            .wait_for(&self.selectors().confirmation, timeout)
            .await
        {
            Ok(element) => element,
            Err(WebDriverError::Timeout(_)) => {
                self.ensure_logged_in().await?;
                if let Some(dialog) = self.driver.try_find(&self.selectors().dialog).await? {
                    let text = self.driver.text(&dialog).await?;
                    if let DialogKind::NotAvailable(phrase) = parse::classify_dialog(&text) {
                        return Ok(AdjustmentOutcome::Rejected { reason: phrase });
                    }
                }
                return Ok(AdjustmentOutcome::Ambiguous {
                    detail: "confirmation message not found".to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let text = self.driver.text(&confirmation).await?;
        if !parse::is_confirmation(&text) {
            return Ok(AdjustmentOutcome::Ambiguous {
                detail: format!("unrecognized confirmation: {}", truncate(&text, 80)),
            });
        }

        let mut refund = None;
        for element in self.driver.find_all(&self.selectors().refund_amount).await? {
            let amount_text = self.driver.text(&element).await?;
            if amount_text.contains('$') {
                refund = parse::parse_price(&amount_text);
                break;
            }
        }
        info!("Adjustment confirmed (refund: {:?})", refund);
        Ok(AdjustmentOutcome::Accepted { refund })
    }
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[async_trait]
impl SessionAuthenticator for WebDriverStorefront {
    async fn verify(&self, session: &Session) -> Result<bool, SessionError> {
        let unavailable = |e: WebDriverError| SessionError::Unavailable(e.to_string());

        self.restore(session).await.map_err(unavailable)?;
        self.driver
            .navigate(&self.url(""))
            .await
            .map_err(unavailable)?;

        match self
            .driver
            .wait_for(&self.selectors().account_marker, VERIFY_TIMEOUT)
            .await
        {
            Ok(_) => Ok(true),
            Err(WebDriverError::Timeout(_)) | Err(WebDriverError::NoSuchElement(_)) => {
                *self.loaded_session.lock().await = None;
                Ok(false)
            }
            Err(e) => Err(unavailable(e)),
        }
    }

    async fn login(&self, credentials: &Credentials) -> Result<Session, SessionError> {
        let failed = |e: WebDriverError| SessionError::AuthenticationFailed(e.to_string());
        let selectors = self.selectors();
        let timeout = self.driver.page_timeout();

        *self.loaded_session.lock().await = None;
        self.driver.delete_cookies().await.map_err(failed)?;
        self.driver
            .navigate(&self.url("login.html"))
            .await
            .map_err(failed)?;
        self.pacer.short("login page loaded").await;

        // Some variants ask for the email on its own step first.
        match self.driver.try_find(&selectors.login_email).await.map_err(failed)? {
            Some(email) => {
                self.driver
                    .send_keys(&email, &credentials.email)
                    .await
                    .map_err(failed)?;
                let submit = self
                    .driver
                    .find(&selectors.login_submit)
                    .await
                    .map_err(failed)?;
                self.driver.click(&submit).await.map_err(failed)?;
                self.pacer.short("email submitted").await;
            }
            None => debug!("Email field not shown, going straight to password"),
        }

        let password = match self.driver.wait_for(&selectors.login_password, timeout).await {
            Ok(element) => element,
            Err(WebDriverError::Timeout(_)) => {
                let Some(challenge) = self
                    .driver
                    .try_find(&selectors.challenge)
                    .await
                    .map_err(failed)?
                else {
                    return Err(SessionError::AuthenticationFailed(
                        "password field not shown".to_string(),
                    ));
                };
                self.pass_login_challenge(&challenge).await?;
                match self.driver.wait_for(&selectors.login_password, timeout).await {
                    Ok(element) => element,
                    Err(WebDriverError::Timeout(_)) => return Err(SessionError::ChallengeRequired),
                    Err(e) => return Err(failed(e)),
                }
            }
            Err(e) => return Err(failed(e)),
        };
        self.driver
            .send_keys(&password, &credentials.password)
            .await
            .map_err(failed)?;
        let submit = self
            .driver
            .find(&selectors.login_submit)
            .await
            .map_err(failed)?;
        self.driver.click(&submit).await.map_err(failed)?;

        if let Err(e) = self.driver.wait_for(&selectors.account_marker, timeout).await {
            let Some(challenge) = self
                .driver
                .try_find(&selectors.challenge)
                .await
                .map_err(failed)?
            else {
                return Err(failed(e));
            };
            self.pass_login_challenge(&challenge).await?;

            if let Err(e) = self.driver.wait_for(&selectors.account_marker, timeout).await {
                if self
                    .driver
                    .try_find(&selectors.challenge)
                    .await
                    .map_err(failed)?
                    .is_some()
                {
                    return Err(SessionError::ChallengeRequired);
                }
                return Err(failed(e));
            }
        }

        let cookies = self.driver.cookies().await.map_err(failed)?;
        let now = self.clock.now();
        let session = Session {
            cookies,
            created_at: now,
            expires_at: now + ChronoDuration::hours(self.config.session_ttl_hours as i64),
        };
        *self.loaded_session.lock().await = Some(session.created_at);
        info!("Logged in, captured {} cookies", session.cookies.len());
        Ok(session)
    }
}

#[async_trait]
impl Storefront for WebDriverStorefront {
    async fn list_orders(
        &self,
        session: &Session,
        cursor: PageCursor,
    ) -> Result<OrderPage, StorefrontError> {
        self.restore(session).await?;
        let selectors = self.selectors();

        if cursor.page == 0 {
            self.driver.navigate(&self.orders_url()).await?;
            self.ensure_logged_in().await?;
        } else {
            let view_more = self.driver.find(&selectors.view_more).await?;
            self.driver.script_click(&view_more).await?;
            self.pacer.long("after expanding order list").await;
        }

        let cards = match self
            .driver
            .wait_for(&selectors.order_card, self.driver.page_timeout())
            .await
        {
            Ok(_) => self.driver.find_all(&selectors.order_card).await?,
            Err(WebDriverError::Timeout(_)) if cursor.page == 0 => {
                self.ensure_logged_in().await?;
                info!("Order history is empty");
                return Ok(OrderPage::default());
            }
            Err(e) => return Err(e.into()),
        };

        let mut orders = Vec::new();
        for card in cards.iter().skip(cursor.offset) {
            if let Some(snapshot) = self.read_card(card).await {
                orders.push(snapshot);
            }
        }
        debug!(
            "Page {}: {} new cards, {} parsed",
            cursor.page,
            cards.len().saturating_sub(cursor.offset),
            orders.len()
        );

        let has_more = self.driver.try_find(&selectors.view_more).await?.is_some();
        let next = (has_more && cursor.page + 1 < self.config.max_pages).then_some(PageCursor {
            page: cursor.page + 1,
            offset: cards.len(),
        });

        Ok(OrderPage { orders, next })
    }

    async fn open_order(
        &self,
        session: &Session,
        order_id: &str,
    ) -> Result<OrderDetails, StorefrontError> {
        self.restore(session).await?;
        let selectors = self.selectors();

        self.driver.navigate(&self.order_url(order_id)).await?;
        self.ensure_logged_in().await?;
        match self
            .driver
            .wait_for(&selectors.order_detail_marker, self.driver.page_timeout())
            .await
        {
            Ok(_) => {}
            Err(WebDriverError::Timeout(_)) => {
                return Err(StorefrontError::OrderNotFound(order_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        }

        let tracking_ref = match self.driver.try_find(&selectors.tracking_number).await? {
            Some(element) => parse::parse_tracking(&self.driver.text(&element).await?),
            None => None,
        };
        let adjustable = self
            .driver
            .try_find(&selectors.adjustment_button)
            .await?
            .is_some();

        Ok(OrderDetails {
            id: order_id.to_string(),
            tracking_ref,
            adjustable,
        })
    }

    async fn request_adjustment(
        &self,
        session: &Session,
        order_id: &str,
    ) -> Result<AdjustmentPrompt, StorefrontError> {
        self.restore(session).await?;
        let selectors = self.selectors();

        let button = self.driver.find(&selectors.adjustment_button).await?;
        self.driver.script_click(&button).await?;

        let dialog = match self.driver.wait_for(&selectors.dialog, DIALOG_TIMEOUT).await {
            Ok(dialog) => dialog,
            Err(WebDriverError::Timeout(_)) => {
                return Ok(AdjustmentPrompt::Outcome(AdjustmentOutcome::Ambiguous {
                    detail: "adjustment dialog did not open".to_string(),
                }))
            }
            Err(e) => return Err(e.into()),
        };
        self.pacer.short("adjustment dialog opened").await;

        let text = self.driver.text(&dialog).await?;
        match parse::classify_dialog(&text) {
            DialogKind::NotAvailable(phrase) => {
                info!("Adjustment not available for {}: {}", order_id, phrase);
                return Ok(AdjustmentPrompt::Outcome(AdjustmentOutcome::Rejected {
                    reason: phrase,
                }));
            }
            DialogKind::Unknown => {
                warn!("Unrecognized adjustment dialog for {}", order_id);
                return Ok(AdjustmentPrompt::Outcome(AdjustmentOutcome::Ambiguous {
                    detail: format!("unknown dialog: {}", truncate(&text, 80)),
                }));
            }
            DialogKind::RequestForm => debug!("Adjustment form shown for {}", order_id),
        }

        let request = self.driver.find(&selectors.request_button).await?;
        self.driver.script_click(&request).await?;
        self.pacer.short("request button clicked").await;

        if let Some(method) = self.driver.try_find(&selectors.refund_method).await? {
            self.driver.script_click(&method).await?;
            self.pacer.short("refund method selected").await;
        }

        let submit = self.driver.find(&selectors.submit_button).await?;
        self.driver.script_click(&submit).await?;
        self.pacer.short("request submitted").await;

        if let Some(challenge) = self.driver.try_find(&selectors.challenge).await? {
            info!("Verification challenge shown for {}", order_id);
            return Ok(AdjustmentPrompt::Challenge(
                self.capture_challenge(&challenge).await?,
            ));
        }

        Ok(AdjustmentPrompt::Outcome(self.read_outcome().await?))
    }

    async fn submit_challenge(
        &self,
        session: &Session,
        order_id: &str,
        _challenge: &Challenge,
        solution: &SolvedChallenge,
    ) -> Result<AdjustmentOutcome, StorefrontError> {
        self.restore(session).await?;
        let selectors = self.selectors();

        debug!("Submitting challenge answer for {}", order_id);
        let input = self.driver.find(&selectors.challenge_input).await?;
        self.driver.send_keys(&input, &solution.answer).await?;
        let submit = self.driver.find(&selectors.challenge_submit).await?;
        self.driver.script_click(&submit).await?;
        self.pacer.short("challenge submitted").await;

        self.read_outcome().await
    }
}
