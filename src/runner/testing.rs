//! Test doubles: a local HTTP target and a scripted in-memory browser page.

use anyhow::{bail, Result};
use async_trait::async_trait;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::routing::{any, get};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use super::expect::QUERY_ELEMENT_JS;
use super::matchers::READ_ELEMENT_JS;
use crate::driver::traits::{
    BrowserLauncher, BrowserPage, Credentials, Geolocation, NavigationOptions, PageEvent,
    SelectorWait, Viewport,
};
use crate::utils::config::RunnerConfig;

/// Serve a few fixed routes on an ephemeral port, returns the base url
pub async fn spawn_http_fixture() -> String {
    let app = Router::new()
        .route("/ok", get(|| async { Json(json!({ "ok": true })) }))
        .route(
            "/fail",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "ok": false }))) }),
        )
        .route(
            "/redirect",
            get(|| async { (StatusCode::FOUND, [(header::LOCATION, "/ok")]) }),
        )
        .route(
            "/echo",
            any(
                |method: Method, uri: Uri, headers: HeaderMap, body: String| async move {
                    Json(json!({
                        "method": method.as_str(),
                        "query": uri.query().unwrap_or_default(),
                        "trace": headers.get("x-trace").and_then(|v| v.to_str().ok()),
                        "body": body,
                    }))
                },
            ),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://{}", addr)
}

#[derive(Debug, Clone, Default)]
pub struct FakeElement {
    pub visible: bool,
    pub text: String,
    pub attributes: BTreeMap<String, String>,
    pub styles: BTreeMap<String, String>,
}

impl FakeElement {
    pub fn visible(text: &str) -> Self {
        Self {
            visible: true,
            text: text.to_string(),
            ..Default::default()
        }
    }

    pub fn hidden(text: &str) -> Self {
        Self {
            visible: false,
            text: text.to_string(),
            ..Default::default()
        }
    }

    pub fn attribute(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn style(mut self, name: &str, value: &str) -> Self {
        self.styles.insert(name.to_string(), value.to_string());
        self
    }
}

/// In-memory page. Records every call as a short line in `calls`.
///
/// `click` wakes pending `wait_for_navigation` calls, so a navigation wait
/// only finishes when a click happens while it is being polled.
#[derive(Default)]
pub struct FakePage {
    dom: BTreeMap<String, FakeElement>,
    calls: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
    events: Mutex<Vec<PageEvent>>,
    failing: Vec<String>,
    hanging: Vec<String>,
    panicking: Vec<String>,
    navigation: Notify,
}

impl FakePage {
    pub fn with_element(mut self, selector: &str, element: FakeElement) -> Self {
        self.dom.insert(selector.to_string(), element);
        self
    }

    /// Events reported on the next drain
    pub fn with_events(self, events: Vec<PageEvent>) -> Self {
        *self.events.lock().unwrap() = events;
        self
    }

    /// Make `operation` return an error
    pub fn failing(mut self, operation: &str) -> Self {
        self.failing.push(operation.to_string());
        self
    }

    /// Make `operation` never complete
    pub fn hanging(mut self, operation: &str) -> Self {
        self.hanging.push(operation.to_string());
        self
    }

    /// Make `operation` panic
    pub fn panicking(mut self, operation: &str) -> Self {
        self.panicking.push(operation.to_string());
        self
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        self.calls.clone()
    }

    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closed.clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    async fn gate(&self, operation: &str) -> Result<()> {
        if self.panicking.iter().any(|op| op == operation) {
            panic!("page crashed during {}", operation);
        }
        if self.hanging.iter().any(|op| op == operation) {
            std::future::pending::<()>().await;
        }
        if self.failing.iter().any(|op| op == operation) {
            bail!("net::ERR_CONNECTION_REFUSED during {}", operation);
        }
        Ok(())
    }

    fn element(&self, selector: &str) -> Result<&FakeElement> {
        match self.dom.get(selector) {
            Some(el) => Ok(el),
            None => bail!("No element matches selector '{}'", selector),
        }
    }

    fn read_element(&self, arg: &Value) -> Value {
        let selector = arg["selector"].as_str().unwrap_or_default();
        let name = arg["name"].as_str().unwrap_or_default();
        let Some(el) = self.dom.get(selector) else {
            return json!({ "found": false, "value": null });
        };
        let value = match arg["read"].as_str().unwrap_or_default() {
            "visible" => json!(el.visible),
            "attribute" => json!(el.attributes.get(name)),
            "style" => json!(el.styles.get(name).cloned().unwrap_or_default()),
            "text" => json!(el.text),
            _ => json!(true),
        };
        json!({ "found": true, "value": value })
    }

    fn query_element(&self, arg: &Value) -> Value {
        let selector = arg["selector"].as_str().unwrap_or_default();
        let Some(el) = self.dom.get(selector) else {
            return json!({ "found": false, "defined": true, "value": null });
        };
        let value = match arg["property"].as_str() {
            None => json!({ "tagName": "DIV", "id": "", "text": el.text.trim() }),
            Some("textContent") | Some("innerText") => json!(el.text),
            Some("getAttribute") => {
                let name = arg["arg"].as_str().unwrap_or_default();
                json!(el.attributes.get(name))
            }
            Some(_) => return json!({ "found": true, "defined": false, "value": null }),
        };
        json!({ "found": true, "defined": true, "value": value })
    }
}

#[async_trait]
impl BrowserPage for FakePage {
    async fn goto(&self, url: &str, options: &NavigationOptions) -> Result<()> {
        self.gate("goto").await?;
        self.record(format!(
            "goto {} {:?} {}",
            url, options.wait_until, options.timeout_ms
        ));
        Ok(())
    }

    async fn reload(&self, _options: &NavigationOptions) -> Result<()> {
        self.gate("reload").await?;
        self.record("reload".to_string());
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.gate("click").await?;
        self.element(selector)?;
        self.record(format!("click {}", selector));
        self.navigation.notify_waiters();
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str, _delay_ms: Option<u64>) -> Result<()> {
        self.gate("type").await?;
        self.element(selector)?;
        self.record(format!("type {} {}", selector, text));
        Ok(())
    }

    async fn wait_for_navigation(&self, _options: &NavigationOptions) -> Result<()> {
        self.gate("wait_for_navigation").await?;
        self.navigation.notified().await;
        self.record("navigated".to_string());
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, options: &SelectorWait) -> Result<()> {
        self.gate("wait_for_selector").await?;
        let ready = match self.dom.get(selector) {
            Some(el) if options.hidden => !el.visible,
            Some(el) if options.visible => el.visible,
            Some(_) => true,
            None => options.hidden,
        };
        if !ready {
            std::future::pending::<()>().await;
        }
        self.record(format!("wait {}", selector));
        Ok(())
    }

    async fn set_extra_headers(&self, headers: &BTreeMap<String, String>) -> Result<()> {
        let pairs: Vec<String> = headers.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        self.record(format!("headers {}", pairs.join(",")));
        Ok(())
    }

    async fn set_geolocation(&self, location: &Geolocation) -> Result<()> {
        self.record(format!(
            "geolocation {},{}",
            location.latitude, location.longitude
        ));
        Ok(())
    }

    async fn set_user_agent(&self, user_agent: &str) -> Result<()> {
        self.record(format!("useragent {}", user_agent));
        Ok(())
    }

    async fn set_viewport(&self, viewport: &Viewport) -> Result<()> {
        self.record(format!("viewport {}x{}", viewport.width, viewport.height));
        Ok(())
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<()> {
        self.record(format!("authenticate {}", credentials.username));
        Ok(())
    }

    async fn evaluate(&self, script: &str, arg: Value) -> Result<Value> {
        self.gate("evaluate").await?;
        if script == READ_ELEMENT_JS {
            return Ok(self.read_element(&arg));
        }
        if script == QUERY_ELEMENT_JS {
            return Ok(self.query_element(&arg));
        }
        Ok(Value::Null)
    }

    fn drain_events(&self) -> Vec<PageEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out one prepared page, or refuses to launch
#[derive(Default)]
pub struct FakeLauncher {
    page: Mutex<Option<FakePage>>,
}

impl FakeLauncher {
    pub fn new(page: FakePage) -> Self {
        Self {
            page: Mutex::new(Some(page)),
        }
    }

    pub fn failing() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self, _config: &RunnerConfig) -> Result<Box<dyn BrowserPage>> {
        let page = self.page.lock().unwrap().take();
        match page {
            Some(page) => Ok(Box::new(page)),
            None => bail!("Executable doesn't exist at /opt/chromium/chrome"),
        }
    }
}
