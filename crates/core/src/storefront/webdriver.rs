//! Minimal W3C WebDriver client (chromedriver, geckodriver).

use std::time::Duration;

use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::session::Cookie;

use super::StorefrontError;

/// Key under which W3C drivers return element references.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// How often `wait_for` polls the page.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Errors reported by the driver.
#[derive(Debug, Error)]
pub enum WebDriverError {
    #[error("no such element: {0}")]
    NoSuchElement(String),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("driver connection failed: {0}")]
    Connection(String),

    #[error("{error}: {message}")]
    Command { error: String, message: String },

    #[error("invalid driver response: {0}")]
    InvalidResponse(String),
}

impl From<WebDriverError> for StorefrontError {
    fn from(err: WebDriverError) -> Self {
        match err {
            WebDriverError::NoSuchElement(what) => StorefrontError::Layout(what),
            WebDriverError::Timeout(what) => StorefrontError::Timeout(what),
            WebDriverError::Connection(msg) => StorefrontError::ConnectionFailed(msg),
            other => StorefrontError::Driver(other.to_string()),
        }
    }
}

/// Reference to an element on the current page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementRef(String);

#[derive(Debug, Deserialize)]
struct Envelope {
    value: Value,
}

/// Browser launch options.
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub headless: bool,
    pub page_load_timeout: Duration,
}

/// HTTP client for one browser driven through a WebDriver endpoint.
///
/// The browser is started lazily on first use and kept until `quit`.
pub struct WebDriverClient {
    client: Client,
    endpoint: String,
    options: BrowserOptions,
    session_id: RwLock<Option<String>>,
}

impl WebDriverClient {
    pub fn new(endpoint: &str, options: BrowserOptions) -> Result<Self, WebDriverError> {
        let client = Client::builder()
            .timeout(options.page_load_timeout + Duration::from_secs(30))
            .build()
            .map_err(|e| WebDriverError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            options,
            session_id: RwLock::new(None),
        })
    }

    /// Timeout used when waiting for page elements.
    pub fn page_timeout(&self) -> Duration {
        self.options.page_load_timeout
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, WebDriverError> {
        let url = format!("{}{}", self.endpoint, path);
        let mut request = self.client.request(method, &url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                WebDriverError::Timeout(path.to_string())
            } else {
                WebDriverError::Connection(e.to_string())
            }
        })?;

        let status = response.status();
        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| WebDriverError::InvalidResponse(e.to_string()))?;

        if status.is_success() {
            Ok(envelope.value)
        } else {
            Err(command_error(&envelope.value))
        }
    }

    async fn session_id(&self) -> Result<String, WebDriverError> {
        if let Some(id) = self.session_id.read().await.as_ref() {
            return Ok(id.clone());
        }

        let mut guard = self.session_id.write().await;
        if let Some(id) = guard.as_ref() {
            return Ok(id.clone());
        }

        let value = self
            .send(
                Method::POST,
                "/session",
                Some(capabilities(&self.options)),
            )
            .await?;
        let id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| WebDriverError::InvalidResponse("missing sessionId".into()))?
            .to_string();

        info!("Browser session started ({})", id);
        *guard = Some(id.clone());
        Ok(id)
    }

    async fn command(
        &self,
        method: Method,
        suffix: &str,
        body: Option<Value>,
    ) -> Result<Value, WebDriverError> {
        let id = self.session_id().await?;
        self.send(method, &format!("/session/{}{}", id, suffix), body)
            .await
    }

    pub async fn navigate(&self, url: &str) -> Result<(), WebDriverError> {
        debug!("Navigating to {}", url);
        self.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await?;
        Ok(())
    }

    pub async fn current_url(&self) -> Result<String, WebDriverError> {
        let value = self.command(Method::GET, "/url", None).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| WebDriverError::InvalidResponse("url is not a string".into()))
    }

    pub async fn find(&self, xpath: &str) -> Result<ElementRef, WebDriverError> {
        let value = self
            .command(Method::POST, "/element", Some(locator(xpath)))
            .await
            .map_err(|e| not_found_as(e, xpath))?;
        element_ref(&value)
    }

    pub async fn find_all(&self, xpath: &str) -> Result<Vec<ElementRef>, WebDriverError> {
        let value = self
            .command(Method::POST, "/elements", Some(locator(xpath)))
            .await?;
        element_refs(&value)
    }

    /// Find a descendant of `parent`; `xpath` should start with `.`.
    pub async fn find_in(
        &self,
        parent: &ElementRef,
        xpath: &str,
    ) -> Result<ElementRef, WebDriverError> {
        let value = self
            .command(
                Method::POST,
                &format!("/element/{}/element", parent.0),
                Some(locator(xpath)),
            )
            .await
            .map_err(|e| not_found_as(e, xpath))?;
        element_ref(&value)
    }

    /// Optional lookup: `Ok(None)` when nothing matches.
    pub async fn try_find(&self, xpath: &str) -> Result<Option<ElementRef>, WebDriverError> {
        Ok(self.find_all(xpath).await?.into_iter().next())
    }

    /// Poll until `xpath` matches or `timeout` elapses.
    pub async fn wait_for(
        &self,
        xpath: &str,
        timeout: Duration,
    ) -> Result<ElementRef, WebDriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(element) = self.try_find(xpath).await? {
                return Ok(element);
            }
            if Instant::now() >= deadline {
                return Err(WebDriverError::Timeout(xpath.to_string()));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn text(&self, element: &ElementRef) -> Result<String, WebDriverError> {
        let value = self
            .command(Method::GET, &format!("/element/{}/text", element.0), None)
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    pub async fn click(&self, element: &ElementRef) -> Result<(), WebDriverError> {
        self.command(
            Method::POST,
            &format!("/element/{}/click", element.0),
            Some(json!({})),
        )
        .await?;
        Ok(())
    }

    /// Click through script, for elements covered by overlays.
    pub async fn script_click(&self, element: &ElementRef) -> Result<(), WebDriverError> {
        self.command(
            Method::POST,
            "/execute/sync",
            Some(json!({
                "script": "arguments[0].scrollIntoView({block: 'center'}); arguments[0].click();",
                "args": [{ ELEMENT_KEY: element.0 }],
            })),
        )
        .await?;
        Ok(())
    }

    pub async fn send_keys(&self, element: &ElementRef, text: &str) -> Result<(), WebDriverError> {
        self.command(
            Method::POST,
            &format!("/element/{}/clear", element.0),
            Some(json!({})),
        )
        .await?;
        self.command(
            Method::POST,
            &format!("/element/{}/value", element.0),
            Some(json!({ "text": text })),
        )
        .await?;
        Ok(())
    }

    /// Base64 PNG of one element.
    pub async fn screenshot(&self, element: &ElementRef) -> Result<String, WebDriverError> {
        let value = self
            .command(
                Method::GET,
                &format!("/element/{}/screenshot", element.0),
                None,
            )
            .await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| WebDriverError::InvalidResponse("screenshot is not a string".into()))
    }

    pub async fn cookies(&self) -> Result<Vec<Cookie>, WebDriverError> {
        let value = self.command(Method::GET, "/cookie", None).await?;
        serde_json::from_value(value).map_err(|e| WebDriverError::InvalidResponse(e.to_string()))
    }

    pub async fn add_cookie(&self, cookie: &Cookie) -> Result<(), WebDriverError> {
        self.command(Method::POST, "/cookie", Some(json!({ "cookie": cookie })))
            .await?;
        Ok(())
    }

    pub async fn delete_cookies(&self) -> Result<(), WebDriverError> {
        self.command(Method::DELETE, "/cookie", None).await?;
        Ok(())
    }

    /// Close the browser. A no-op when none was started.
    pub async fn quit(&self) -> Result<(), WebDriverError> {
        let Some(id) = self.session_id.write().await.take() else {
            return Ok(());
        };
        info!("Closing browser session ({})", id);
        if let Err(e) = self
            .send(Method::DELETE, &format!("/session/{}", id), None)
            .await
        {
            warn!("Failed to close browser session: {}", e);
        }
        Ok(())
    }
}

fn capabilities(options: &BrowserOptions) -> Value {
    let mut args = vec![
        "--disable-blink-features=AutomationControlled",
        "--window-size=1366,900",
        "--lang=en-US",
    ];
    if options.headless {
        args.push("--headless=new");
    }

    json!({
        "capabilities": {
            "alwaysMatch": {
                "browserName": "chrome",
                "pageLoadStrategy": "normal",
                "timeouts": { "pageLoad": options.page_load_timeout.as_millis() as u64 },
                "goog:chromeOptions": {
                    "args": args,
                    "excludeSwitches": ["enable-automation"],
                },
            }
        }
    })
}

fn locator(xpath: &str) -> Value {
    json!({ "using": "xpath", "value": xpath })
}

fn element_ref(value: &Value) -> Result<ElementRef, WebDriverError> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(|id| ElementRef(id.to_string()))
        .ok_or_else(|| WebDriverError::InvalidResponse(format!("not an element: {}", value)))
}

fn element_refs(value: &Value) -> Result<Vec<ElementRef>, WebDriverError> {
    value
        .as_array()
        .ok_or_else(|| WebDriverError::InvalidResponse("expected element list".into()))?
        .iter()
        .map(element_ref)
        .collect()
}

fn command_error(value: &Value) -> WebDriverError {
    let field = |name: &str| {
        value
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let error = field("error");
    let message = field("message");
    match error.as_str() {
        "no such element" => WebDriverError::NoSuchElement(message),
        "timeout" | "script timeout" => WebDriverError::Timeout(message),
        "" => WebDriverError::InvalidResponse(value.to_string()),
        _ => WebDriverError::Command { error, message },
    }
}

fn not_found_as(err: WebDriverError, xpath: &str) -> WebDriverError {
    match err {
        WebDriverError::NoSuchElement(_) => WebDriverError::NoSuchElement(xpath.to_string()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_ref_parsing() {
        let value = json!({ ELEMENT_KEY: "abc-123" });
        assert_eq!(element_ref(&value).unwrap(), ElementRef("abc-123".into()));

        let list = json!([{ ELEMENT_KEY: "a" }, { ELEMENT_KEY: "b" }]);
        assert_eq!(element_refs(&list).unwrap().len(), 2);

        assert!(element_ref(&json!({ "other": 1 })).is_err());
    }

    #[test]
    fn test_command_error_mapping() {
        let err = command_error(&json!({ "error": "no such element", "message": "gone" }));
        assert!(matches!(err, WebDriverError::NoSuchElement(_)));

        let err = command_error(&json!({ "error": "timeout", "message": "slow" }));
        assert!(matches!(err, WebDriverError::Timeout(_)));

        let err = command_error(&json!({ "error": "invalid session id", "message": "x" }));
        assert!(matches!(err, WebDriverError::Command { ref error, .. } if error == "invalid session id"));
    }

    #[test]
    fn test_storefront_error_conversion() {
        let err: StorefrontError = WebDriverError::NoSuchElement("//div".into()).into();
        assert!(matches!(err, StorefrontError::Layout(_)));

        let err: StorefrontError = WebDriverError::Connection("refused".into()).into();
        assert!(matches!(err, StorefrontError::ConnectionFailed(_)));
    }

    #[test]
    fn test_capabilities_headless_flag() {
        let options = BrowserOptions {
            headless: true,
            page_load_timeout: Duration::from_secs(30),
        };
        let caps = capabilities(&options);
        let args = caps["capabilities"]["alwaysMatch"]["goog:chromeOptions"]["args"]
            .as_array()
            .unwrap();
        assert!(args.iter().any(|a| a == "--headless=new"));
        assert_eq!(
            caps["capabilities"]["alwaysMatch"]["timeouts"]["pageLoad"],
            30_000
        );
    }
}
