//! W3C WebDriver client (chromedriver) over reqwest.

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{Browser, BrowserError, ElementId, Key, Locator};

/// Key under which WebDriver returns element references
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Per-request timeout; page loads are bounded by the driver itself
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

pub struct WebDriverBrowser {
    client: reqwest::Client,
    base_url: String,
    session_id: String,
}

impl WebDriverBrowser {
    /// Start a new Chrome session on the WebDriver server at `webdriver_url`.
    pub async fn connect(webdriver_url: &str, headless: bool) -> Result<Self, BrowserError> {
        let base_url = webdriver_url.trim_end_matches('/').to_string();
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        let value = send(
            client
                .post(format!("{base_url}/session"))
                .json(&Self::capabilities(headless)),
        )
        .await?;

        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                BrowserError::UnexpectedResponse("new session without sessionId".to_string())
            })?
            .to_string();

        info!(
            event = "browser_session_started",
            session_id = %session_id,
            headless,
            "Browser session started"
        );

        Ok(Self {
            client,
            base_url,
            session_id,
        })
    }

    /// New-session capabilities for Chrome.
    pub fn capabilities(headless: bool) -> Value {
        let mut args = vec![
            "--window-size=1920,1080",
            "--disable-gpu",
            "--no-sandbox",
            "--disable-dev-shm-usage",
        ];
        if headless {
            args.push("--headless=new");
        }
        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "pageLoadStrategy": "normal",
                    "goog:chromeOptions": { "args": args }
                }
            }
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/session/{}/{}", self.base_url, self.session_id, path)
    }

    async fn get(&self, path: &str) -> Result<Value, BrowserError> {
        send(self.client.get(self.url(path))).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, BrowserError> {
        send(self.client.post(self.url(path)).json(&body)).await
    }
}

async fn send(request: reqwest::RequestBuilder) -> Result<Value, BrowserError> {
    let response = request.send().await?;
    let status = response.status();
    let body: Value = response.json().await?;
    let value = body.get("value").cloned().unwrap_or(Value::Null);
    if !status.is_success() {
        return Err(protocol_error(&value));
    }
    Ok(value)
}

fn protocol_error(value: &Value) -> BrowserError {
    let error = value
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if error == "stale element reference" {
        BrowserError::StaleElement(message)
    } else {
        BrowserError::Protocol { error, message }
    }
}

fn element_ref(element: &ElementId) -> Value {
    let mut map = Map::new();
    map.insert(ELEMENT_KEY.to_string(), Value::String(element.0.clone()));
    Value::Object(map)
}

fn element_ids(value: &Value) -> Result<Vec<ElementId>, BrowserError> {
    let items = value
        .as_array()
        .ok_or_else(|| {
            BrowserError::UnexpectedResponse(format!("expected element list, got {value}"))
        })?;
    items
        .iter()
        .map(|item| {
            item.get(ELEMENT_KEY)
                .and_then(Value::as_str)
                .map(ElementId::new)
                .ok_or_else(|| {
                    BrowserError::UnexpectedResponse(format!("not an element reference: {item}"))
                })
        })
        .collect()
}

fn as_string(value: Value) -> Result<String, BrowserError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(BrowserError::UnexpectedResponse(format!("expected string, got {other}"))),
    }
}

fn key_actions(key: Key) -> Value {
    let code = key.code_point().to_string();
    json!({
        "actions": [{
            "type": "key",
            "id": "keyboard",
            "actions": [
                { "type": "keyDown", "value": code },
                { "type": "keyUp", "value": code }
            ]
        }]
    })
}

#[async_trait]
impl Browser for WebDriverBrowser {
    async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        debug!(url = %url, "Navigating");
        self.post("url", json!({ "url": url })).await.map(|_| ())
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        as_string(self.get("url").await?)
    }

    async fn find_all(&self, locator: &Locator) -> Result<Vec<ElementId>, BrowserError> {
        let value = self
            .post(
                "elements",
                json!({ "using": locator.strategy(), "value": locator.value() }),
            )
            .await?;
        element_ids(&value)
    }

    async fn is_displayed(&self, element: &ElementId) -> Result<bool, BrowserError> {
        let value = self.get(&format!("element/{}/displayed", element.0)).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn is_enabled(&self, element: &ElementId) -> Result<bool, BrowserError> {
        let value = self.get(&format!("element/{}/enabled", element.0)).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn click(&self, element: &ElementId) -> Result<(), BrowserError> {
        self.post(&format!("element/{}/click", element.0), json!({}))
            .await
            .map(|_| ())
    }

    async fn clear(&self, element: &ElementId) -> Result<(), BrowserError> {
        self.post(&format!("element/{}/clear", element.0), json!({}))
            .await
            .map(|_| ())
    }

    async fn type_text(&self, element: &ElementId, text: &str) -> Result<(), BrowserError> {
        self.post(&format!("element/{}/value", element.0), json!({ "text": text }))
            .await
            .map(|_| ())
    }

    async fn text(&self, element: &ElementId) -> Result<String, BrowserError> {
        as_string(self.get(&format!("element/{}/text", element.0)).await?)
    }

    async fn attribute(
        &self,
        element: &ElementId,
        name: &str,
    ) -> Result<Option<String>, BrowserError> {
        let value = self
            .get(&format!("element/{}/attribute/{}", element.0, name))
            .await?;
        Ok(value.as_str().map(str::to_string))
    }

    async fn press_key(&self, key: Key) -> Result<(), BrowserError> {
        self.post("actions", key_actions(key)).await.map(|_| ())
    }

    async fn switch_to_frame(&self, frame: &ElementId) -> Result<(), BrowserError> {
        self.post("frame", json!({ "id": element_ref(frame) }))
            .await
            .map(|_| ())
    }

    async fn switch_to_parent_frame(&self) -> Result<(), BrowserError> {
        self.post("frame/parent", json!({})).await.map(|_| ())
    }

    async fn screenshot_png(&self) -> Result<Vec<u8>, BrowserError> {
        let encoded = as_string(self.get("screenshot").await?)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| BrowserError::UnexpectedResponse(format!("screenshot is not base64: {e}")))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        let url = format!("{}/session/{}", self.base_url, self.session_id);
        match send(self.client.delete(url)).await {
            Ok(_) => {
                info!(
                    event = "browser_session_closed",
                    session_id = %self.session_id,
                    "Browser session closed"
                );
                Ok(())
            }
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "Failed to close browser session");
                Err(e)
            }
        }
    }
}
