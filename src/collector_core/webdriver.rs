//! W3C WebDriver adapter for the Source trait
//!
//! Minimal client over a running driver (chromedriver, geckodriver, a
//! Selenium grid): one session per collector, locators are XPath
//! expressions. Transport timeouts map to `SourceError::Timeout`; every
//! other transport or protocol failure maps to `SourceError::Unavailable`,
//! which is what triggers the collector's re-navigation path.

use super::source::{Locator, Source, SourceError, SourceFactory};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

/// Element key mandated by the W3C WebDriver wire protocol
const W3C_ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Per-request deadline; anything slower counts as a resolution timeout
const REQUEST_TIMEOUT_SECS: u64 = 30;

pub struct WebDriverSource {
    http: reqwest::Client,
    base: String,
    session: String,
}

impl WebDriverSource {
    /// Open a fresh driver session
    pub async fn connect(base_url: &str) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| SourceError::Unavailable(format!("http client: {}", e)))?;

        let base = base_url.trim_end_matches('/').to_string();
        let body = json!({ "capabilities": { "alwaysMatch": {} } });
        let value = post_json(&http, &format!("{}/session", base), &body).await?;

        let session = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                SourceError::Unavailable("driver returned no sessionId".to_string())
            })?
            .to_string();

        log::info!("🔌 WebDriver session {} opened at {}", session, base);
        Ok(Self { http, base, session })
    }

    fn session_url(&self, tail: &str) -> String {
        format!("{}/session/{}/{}", self.base, self.session, tail)
    }

    /// All element ids matching an XPath expression
    async fn find_elements(&self, xpath: &str) -> Result<Vec<String>, SourceError> {
        let body = json!({ "using": "xpath", "value": xpath });
        let value = post_json(&self.http, &self.session_url("elements"), &body).await?;
        Ok(extract_element_ids(&value))
    }

    /// First element id for a locator, or Unavailable if nothing matches
    async fn require_element(&self, locator: &Locator) -> Result<String, SourceError> {
        self.find_elements(&locator.0)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| SourceError::Unavailable(format!("no element for {}", locator)))
    }
}

#[async_trait]
impl Source for WebDriverSource {
    async fn navigate(&mut self, url: &str) -> Result<(), SourceError> {
        let body = json!({ "url": url });
        post_json(&self.http, &self.session_url("url"), &body).await?;
        Ok(())
    }

    async fn is_visible(&mut self, locator: &Locator) -> Result<bool, SourceError> {
        let ids = self.find_elements(&locator.0).await?;
        let id = match ids.into_iter().next() {
            Some(id) => id,
            None => return Ok(false),
        };
        let url = self.session_url(&format!("element/{}/displayed", id));
        let value = get_json(&self.http, &url).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn click(&mut self, locator: &Locator) -> Result<(), SourceError> {
        let id = self.require_element(locator).await?;
        let url = self.session_url(&format!("element/{}/click", id));
        post_json(&self.http, &url, &json!({})).await?;
        Ok(())
    }

    async fn read_text(&mut self, locator: &Locator) -> Result<String, SourceError> {
        let id = self.require_element(locator).await?;
        let url = self.session_url(&format!("element/{}/text", id));
        let value = get_json(&self.http, &url).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn locate_by_text(
        &mut self,
        text: &str,
        exact: bool,
    ) -> Result<Vec<Locator>, SourceError> {
        let xpath = text_xpath(text, exact);
        let ids = self.find_elements(&xpath).await?;
        // Re-query by position so the locator survives a page refresh
        Ok(ids
            .iter()
            .enumerate()
            .map(|(i, _)| Locator::new(format!("({})[{}]", xpath, i + 1)))
            .collect())
    }
}

/// XPath matching elements by their normalized text
fn text_xpath(text: &str, exact: bool) -> String {
    let literal = xpath_literal(text);
    if exact {
        format!("//*[normalize-space(.)={}]", literal)
    } else {
        format!("//*[contains(normalize-space(.),{})]", literal)
    }
}

/// Quote arbitrary text as an XPath string literal
///
/// XPath 1.0 has no escaping, so text containing single quotes is spliced
/// with concat().
fn xpath_literal(text: &str) -> String {
    if !text.contains('\'') {
        return format!("'{}'", text);
    }
    let parts: Vec<String> = text
        .split('\'')
        .map(|part| format!("'{}'", part))
        .collect();
    format!("concat({})", parts.join(",\"'\","))
}

fn extract_element_ids(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get(W3C_ELEMENT_KEY))
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn map_transport_error(err: reqwest::Error) -> SourceError {
    if err.is_timeout() {
        SourceError::Timeout(err.to_string())
    } else {
        SourceError::Unavailable(err.to_string())
    }
}

/// POST a JSON body and return the protocol `value` field
async fn post_json(
    http: &reqwest::Client,
    url: &str,
    body: &Value,
) -> Result<Value, SourceError> {
    let resp = http
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(map_transport_error)?;
    unwrap_protocol_value(resp).await
}

async fn get_json(http: &reqwest::Client, url: &str) -> Result<Value, SourceError> {
    let resp = http.get(url).send().await.map_err(map_transport_error)?;
    unwrap_protocol_value(resp).await
}

async fn unwrap_protocol_value(resp: reqwest::Response) -> Result<Value, SourceError> {
    let status = resp.status();
    let payload: Value = resp.json().await.map_err(map_transport_error)?;
    let value = payload.get("value").cloned().unwrap_or(Value::Null);

    if !status.is_success() {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unspecified driver error");
        return Err(SourceError::Unavailable(format!(
            "driver responded {}: {}",
            status, message
        )));
    }
    Ok(value)
}

/// Builds one WebDriver session per entity task
pub struct WebDriverFactory {
    base_url: String,
}

impl WebDriverFactory {
    pub fn new(
        base_url: impl Into<String>,
        username: Option<String>,
        password: Option<String>,
    ) -> Self {
        // Credentials are carried for feeds that require a signed-in
        // session; the sign-in flow itself lives outside this system and
        // the driver profile is expected to arrive already authenticated.
        if username.is_some() || password.is_some() {
            log::info!("🔑 Upstream credentials provided (session assumed pre-authenticated)");
        }
        Self {
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl SourceFactory for WebDriverFactory {
    async fn create(&self, entity: &str) -> Result<Box<dyn Source>, SourceError> {
        log::debug!("🔌 [{}] opening WebDriver session", entity);
        let source = WebDriverSource::connect(&self.base_url).await?;
        Ok(Box::new(source))
    }
}
