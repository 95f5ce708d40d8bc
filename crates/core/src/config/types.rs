use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::pacing::PacingConfig;
use crate::pipeline::PipelineConfig;
use crate::scheduler::SchedulerConfig;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub account: AccountConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub storefront: StorefrontConfig,
    #[serde(default)]
    pub captcha: CaptchaConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storefront account credentials
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AccountConfig {
    pub email: String,
    pub password: String,
}

/// Where durable state lives
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_catalog_file")]
    pub catalog_file: String,
    #[serde(default = "default_session_file")]
    pub session_file: String,
    #[serde(default = "default_history_file")]
    pub history_file: String,
    /// Per-order human-readable status files
    #[serde(default = "default_reports_dir")]
    pub reports_dir: String,
}

impl StorageConfig {
    pub fn catalog_path(&self) -> PathBuf {
        self.data_dir.join(&self.catalog_file)
    }

    pub fn session_path(&self) -> PathBuf {
        self.data_dir.join(&self.session_file)
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join(&self.history_file)
    }

    pub fn reports_path(&self) -> PathBuf {
        self.data_dir.join(&self.reports_dir)
    }

    /// Held by whichever process is running, see `RunLock`.
    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join("priceguard.lock")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            catalog_file: default_catalog_file(),
            session_file: default_session_file(),
            history_file: default_history_file(),
            reports_dir: default_reports_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_catalog_file() -> String {
    "orders.json".to_string()
}

fn default_session_file() -> String {
    "session.json".to_string()
}

fn default_history_file() -> String {
    "runs.json".to_string()
}

fn default_reports_dir() -> String {
    "orders".to_string()
}

/// Browser automation settings for the storefront driver
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorefrontConfig {
    /// Storefront root URL (e.g., "https://www.temu.com")
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// WebDriver endpoint (e.g., chromedriver on "http://localhost:9515")
    #[serde(default = "default_webdriver_url")]
    pub webdriver_url: String,
    #[serde(default)]
    pub headless: bool,
    /// How long to wait for a page element (default: 30)
    #[serde(default = "default_page_timeout")]
    pub page_timeout_secs: u32,
    /// Lifetime assigned to a freshly captured session (default: 72)
    #[serde(default = "default_session_ttl")]
    pub session_ttl_hours: u32,
    /// Upper bound on "view more" expansions per scan (default: 20)
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default)]
    pub selectors: SelectorConfig,
}

impl Default for StorefrontConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            webdriver_url: default_webdriver_url(),
            headless: false,
            page_timeout_secs: default_page_timeout(),
            session_ttl_hours: default_session_ttl(),
            max_pages: default_max_pages(),
            selectors: SelectorConfig::default(),
        }
    }
}

fn default_base_url() -> String {
    "https://www.temu.com".to_string()
}

fn default_webdriver_url() -> String {
    "http://localhost:9515".to_string()
}

fn default_page_timeout() -> u32 {
    30
}

fn default_session_ttl() -> u32 {
    72
}

fn default_max_pages() -> u32 {
    20
}

/// XPath selectors used by the WebDriver storefront.
///
/// The storefront's markup changes often; every selector can be overridden
/// from the config file without a rebuild.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SelectorConfig {
    pub account_marker: String,
    pub login_email: String,
    pub login_password: String,
    pub login_submit: String,
    pub order_card: String,
    pub card_paid_price: String,
    pub card_current_price: String,
    pub view_more: String,
    pub order_detail_marker: String,
    pub tracking_number: String,
    pub adjustment_button: String,
    pub dialog: String,
    pub request_button: String,
    pub refund_method: String,
    pub submit_button: String,
    pub confirmation: String,
    pub refund_amount: String,
    pub challenge: String,
    pub challenge_input: String,
    pub challenge_submit: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            account_marker: "//div[text()='Orders & Account']".to_string(),
            login_email: "//input[@aria-label='Email or phone number']".to_string(),
            login_password: "//input[@aria-label='Password']".to_string(),
            login_submit: "//button[@id='submit-button']".to_string(),
            order_card: "//div[contains(@class, '_2DCuXnC8') and @data-uniqid]".to_string(),
            card_paid_price: ".//span[contains(@class, 'order-total')]".to_string(),
            card_current_price: ".//span[contains(@class, 'current-price')]".to_string(),
            view_more: "//span[contains(text(),'View more')]/parent::div[@role='button']"
                .to_string(),
            order_detail_marker: "//div[@class='_3ofg55P_']".to_string(),
            tracking_number: "//div[contains(text(), 'Tracking Number:')]".to_string(),
            adjustment_button:
                "//div[@role='button' and (contains(., 'Price adjustment') or contains(., 'Ajuste de preço'))]"
                    .to_string(),
            dialog: "//div[@role='dialog']".to_string(),
            request_button:
                "//div[@role='button' and (contains(., 'Request a price adjustment') or contains(., 'Request adjustment'))]"
                    .to_string(),
            refund_method:
                "//div[contains(., 'Receive in seconds') or contains(., 'Instant refund')]"
                    .to_string(),
            submit_button:
                "//div[@role='button' and (contains(., 'Submit') or contains(., 'Confirm'))]"
                    .to_string(),
            confirmation:
                "//*[contains(text(), 'Your refund is being processed') or contains(text(), 'request has been submitted') or contains(text(), 'successfully requested')]"
                    .to_string(),
            refund_amount: "//div[contains(@class, 'refund-amount')]".to_string(),
            challenge: "//div[contains(@class, 'captcha') or contains(@id, 'captcha')]"
                .to_string(),
            challenge_input: "//input[contains(@name, 'captcha')]".to_string(),
            challenge_submit:
                "//div[@role='button' and (contains(., 'Verify') or contains(., 'Confirm'))]"
                    .to_string(),
        }
    }
}

/// CAPTCHA solving service configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptchaConfig {
    /// Task API root (createTask/getTaskResult protocol)
    #[serde(default = "default_captcha_url")]
    pub api_url: String,
    /// Service API key; without one every challenge fails as retryable
    #[serde(default)]
    pub api_key: Option<String>,
    /// Upper bound on one solve (default: 120)
    #[serde(default = "default_captcha_timeout")]
    pub timeout_secs: u32,
    /// How often to poll for a result (default: 5000)
    #[serde(default = "default_captcha_poll")]
    pub poll_interval_ms: u64,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            api_url: default_captcha_url(),
            api_key: None,
            timeout_secs: default_captcha_timeout(),
            poll_interval_ms: default_captcha_poll(),
        }
    }
}

fn default_captcha_url() -> String {
    "https://api.capsolver.com".to_string()
}

fn default_captcha_timeout() -> u32 {
    120
}

fn default_captcha_poll() -> u64 {
    5000
}

/// Log output format
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// Optional log file, truncated at startup
    #[serde(default)]
    pub file: Option<PathBuf>,
}

/// Sanitized config for logging (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub account: SanitizedAccountConfig,
    pub storage: StorageConfig,
    pub storefront: SanitizedStorefrontConfig,
    pub captcha: SanitizedCaptchaConfig,
    pub pipeline: PipelineConfig,
    pub pacing: PacingConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedAccountConfig {
    pub email: String,
    pub password_configured: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedStorefrontConfig {
    pub base_url: String,
    pub webdriver_url: String,
    pub headless: bool,
    pub max_pages: u32,
}

/// Sanitized captcha config (API key hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedCaptchaConfig {
    pub api_url: String,
    pub api_key_configured: bool,
    pub timeout_secs: u32,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            account: SanitizedAccountConfig {
                email: config.account.email.clone(),
                password_configured: !config.account.password.is_empty(),
            },
            storage: config.storage.clone(),
            storefront: SanitizedStorefrontConfig {
                base_url: config.storefront.base_url.clone(),
                webdriver_url: config.storefront.webdriver_url.clone(),
                headless: config.storefront.headless,
                max_pages: config.storefront.max_pages,
            },
            captcha: SanitizedCaptchaConfig {
                api_url: config.captcha.api_url.clone(),
                api_key_configured: config
                    .captcha
                    .api_key
                    .as_ref()
                    .is_some_and(|k| !k.is_empty()),
                timeout_secs: config.captcha.timeout_secs,
            },
            pipeline: config.pipeline.clone(),
            pacing: config.pacing.clone(),
            scheduler: config.scheduler.clone(),
        }
    }
}
