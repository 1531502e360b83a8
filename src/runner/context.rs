//! Execution context of one run.
//!
//! The context owns the automation handle (HTTP defaults or a browser page)
//! and the state captured while steps execute. It is created for a single run
//! and never shared.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::error::StepError;
use super::expect;
use crate::driver::http::{self, CapturedResponse, HttpRequestConfig};
use crate::driver::traits::{
    BrowserLauncher, BrowserPage, ConsoleLevel, Credentials, Geolocation, NavigationOptions,
    PageEvent, SelectorWait, Viewport, WaitUntil,
};
use crate::parser::types::{ActionKind, ContextKind, Step, TestType};
use crate::utils::config::RunnerConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsoleEntry {
    pub text: String,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsoleBuffer {
    pub logs: Vec<ConsoleEntry>,
    pub warnings: Vec<ConsoleEntry>,
    pub errors: Vec<ConsoleEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Epoch milliseconds when the last navigation started
    pub start_time: Option<i64>,
    /// Milliseconds the last navigation took
    pub duration: Option<u64>,
    /// Sum of every response body seen by the page, in bytes
    pub pagesize: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub url: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub size: u64,
}

/// Everything a run captured so far, what `expect` steps look at
#[derive(Debug, Clone, Default)]
pub struct ExecutionState {
    pub last_response: Option<CapturedResponse>,
    pub console: ConsoleBuffer,
    pub metrics: Metrics,
    pub resources: Vec<Resource>,
}

impl ExecutionState {
    pub fn apply(&mut self, event: PageEvent) {
        match event {
            PageEvent::Console {
                level,
                text,
                location,
            } => {
                let entry = ConsoleEntry { text, location };
                match level {
                    ConsoleLevel::Log => self.console.logs.push(entry),
                    ConsoleLevel::Warning => self.console.warnings.push(entry),
                    ConsoleLevel::Error => self.console.errors.push(entry),
                }
            }
            PageEvent::PageError { message } => self.console.errors.push(ConsoleEntry {
                text: message,
                location: None,
            }),
            PageEvent::Dialog { message } => {
                log::debug!("Page opened a dialog: {}", message);
            }
            PageEvent::Response {
                url,
                resource_type,
                status,
                status_text,
                headers,
                size,
            } => {
                self.metrics.pagesize += size;
                if resource_type == "document" && status == 200 {
                    self.last_response = Some(CapturedResponse {
                        url: url.clone(),
                        status: Some(status),
                        status_text: Some(status_text),
                        headers,
                        ..Default::default()
                    });
                }
                self.resources.push(Resource {
                    url,
                    kind: resource_type,
                    size,
                });
            }
        }
    }

    /// The JSON view of one context, the root that subject paths resolve against
    pub fn context_value(&self, context: ContextKind) -> Value {
        match context {
            ContextKind::Response => self
                .last_response
                .as_ref()
                .map(CapturedResponse::to_value)
                .unwrap_or(Value::Null),
            ContextKind::Metrics => serde_json::to_value(&self.metrics).unwrap_or(Value::Null),
            ContextKind::ResourceList => {
                serde_json::to_value(&self.resources).unwrap_or(Value::Null)
            }
            ContextKind::Console => serde_json::to_value(&self.console).unwrap_or(Value::Null),
            ContextKind::Document => Value::Null,
        }
    }

    fn start_metrics(&mut self) -> Instant {
        self.metrics.start_time = Some(chrono::Utc::now().timestamp_millis());
        self.metrics.duration = None;
        Instant::now()
    }

    fn finish_metrics(&mut self, started: Instant) {
        self.metrics.duration = Some(started.elapsed().as_millis() as u64);
    }
}

/// One run's automation handle, selected once from the test type
pub enum ExecutionContext {
    Basic(BasicRunner),
    Browser(BrowserRunner),
}

impl ExecutionContext {
    /// Prepare the context for a run. Browser runs open their page here.
    pub async fn acquire(
        kind: TestType,
        config: &RunnerConfig,
        launcher: &dyn BrowserLauncher,
    ) -> Result<Self> {
        match kind {
            TestType::Basic => Ok(ExecutionContext::Basic(BasicRunner {
                config: config.clone(),
                state: ExecutionState::default(),
            })),
            TestType::Browser => {
                let page = launcher.launch(config).await?;
                Ok(ExecutionContext::Browser(BrowserRunner {
                    config: config.clone(),
                    page: Arc::from(page),
                    state: ExecutionState::default(),
                    closed: false,
                }))
            }
        }
    }

    pub fn kind(&self) -> TestType {
        match self {
            ExecutionContext::Basic(_) => TestType::Basic,
            ExecutionContext::Browser(_) => TestType::Browser,
        }
    }

    pub fn state(&self) -> &ExecutionState {
        match self {
            ExecutionContext::Basic(runner) => &runner.state,
            ExecutionContext::Browser(runner) => &runner.state,
        }
    }

    /// Run one step
    pub async fn perform(&mut self, step: &Step) -> Result<(), StepError> {
        let action = step.action_kind()?;
        let variant = self.kind();
        let unsupported = || StepError::UnsupportedAction {
            action: step.action.clone(),
            variant: Some(variant),
        };

        match self {
            ExecutionContext::Basic(runner) => match action {
                ActionKind::Navigate => runner.navigate(step).await,
                ActionKind::Expect => expect::run(step, &runner.state, None).await,
                _ => Err(unsupported()),
            },
            ExecutionContext::Browser(runner) => {
                let result = runner.perform(action, step).await;
                runner.absorb_events();
                result
            }
        }
    }

    /// Release the browser. Safe to call for basic runs.
    ///
    /// A browser context dropped without `close` (a cancelled run) closes its
    /// page in the background.
    pub async fn close(&mut self) {
        if let ExecutionContext::Browser(runner) = self {
            runner.absorb_events();
            runner.closed = true;
            if let Err(e) = runner.page.close().await {
                log::warn!("Failed to close browser page: {:#}", e);
            }
        }
    }
}

pub struct BasicRunner {
    config: RunnerConfig,
    state: ExecutionState,
}

impl BasicRunner {
    /// Transport errors and unusable configs are captured, so this never fails
    async fn navigate(&mut self, step: &Step) -> Result<(), StepError> {
        let started = self.state.start_metrics();
        let response = match step.settings_as::<HttpRequestConfig>() {
            Ok(request) => {
                let response = http::send(&request, &self.config).await;
                log::debug!(
                    "{} {} -> {:?}",
                    request.method.as_deref().unwrap_or("GET"),
                    request.url,
                    response.status
                );
                response
            }
            Err(e) => {
                let settings = step.settings();
                let url = settings.get("url").and_then(Value::as_str).unwrap_or_default();
                log::debug!("Request to '{}' not sent: {}", url, e);
                CapturedResponse::invalid_request(url, e.to_string())
            }
        };
        self.state.finish_metrics(started);
        self.state.last_response = Some(response);
        Ok(())
    }
}

pub struct BrowserRunner {
    config: RunnerConfig,
    page: Arc<dyn BrowserPage>,
    state: ExecutionState,
    closed: bool,
}

impl Drop for BrowserRunner {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let page = Arc::clone(&self.page);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                log::debug!("Browser run dropped before close, closing page");
                handle.spawn(async move {
                    if let Err(e) = page.close().await {
                        log::warn!("Failed to close browser page: {:#}", e);
                    }
                });
            }
            Err(_) => log::warn!("Browser page dropped outside a runtime, left open"),
        }
    }
}

/// `waitUntil` accepts a single milestone or a list
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum WaitList {
    One(WaitUntil),
    Many(Vec<WaitUntil>),
}

impl WaitList {
    fn into_vec(self) -> Vec<WaitUntil> {
        match self {
            WaitList::One(w) => vec![w],
            WaitList::Many(list) => list,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NavigateConfig {
    url: String,
    #[serde(default)]
    wait_until: Option<WaitList>,
    #[serde(default)]
    timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NavigationWaitConfig {
    #[serde(default)]
    wait_until: Option<WaitList>,
    #[serde(default)]
    timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClickConfig {
    #[serde(alias = "subject")]
    selector: String,
    #[serde(default)]
    navigate: bool,
    #[serde(default)]
    wait_until: Option<WaitList>,
    #[serde(default)]
    timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TypeConfig {
    #[serde(alias = "subject")]
    selector: String,
    text: String,
    #[serde(default)]
    delay: Option<u64>,
    #[serde(default)]
    timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SelectorWaitConfig {
    #[serde(alias = "subject")]
    selector: String,
    #[serde(default)]
    visible: bool,
    #[serde(default)]
    hidden: bool,
    #[serde(default)]
    timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TimeoutConfig {
    #[serde(default)]
    timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserAgentConfig {
    #[serde(alias = "useragent", alias = "user_agent", alias = "value")]
    user_agent: String,
}

impl BrowserRunner {
    async fn perform(&mut self, action: ActionKind, step: &Step) -> Result<(), StepError> {
        let default_timeout = self.config.default_timeout_ms;
        let page = &*self.page;

        match action {
            ActionKind::Navigate => {
                let config: NavigateConfig = step.settings_as()?;
                let options = navigation_options(
                    config.wait_until,
                    &[WaitUntil::DomContentLoaded, WaitUntil::NetworkIdle],
                    config.timeout.unwrap_or(default_timeout),
                );
                let started = self.state.start_metrics();
                let result = bounded(action, options.timeout_ms, page.goto(&config.url, &options)).await;
                self.state.finish_metrics(started);
                result
            }
            ActionKind::Reload => {
                let config: NavigationWaitConfig = step.settings_as()?;
                let options = navigation_options(
                    config.wait_until,
                    &[WaitUntil::DomContentLoaded, WaitUntil::NetworkIdle],
                    config.timeout.unwrap_or(default_timeout),
                );
                bounded(action, options.timeout_ms, page.reload(&options)).await
            }
            ActionKind::WaitForNavigation => {
                let config: NavigationWaitConfig = step.settings_as()?;
                let options = navigation_options(
                    config.wait_until,
                    &[WaitUntil::NetworkIdle],
                    config.timeout.unwrap_or(default_timeout),
                );
                bounded(action, options.timeout_ms, page.wait_for_navigation(&options)).await
            }
            ActionKind::Click => {
                let config: ClickConfig = step.settings_as()?;
                let timeout_ms = config.timeout.unwrap_or(default_timeout);
                if !config.navigate {
                    return bounded(action, timeout_ms, page.click(&config.selector)).await;
                }

                let options =
                    navigation_options(config.wait_until, &[WaitUntil::NetworkIdle], timeout_ms);
                bounded(action, timeout_ms, async {
                    tokio::try_join!(
                        page.wait_for_navigation(&options),
                        page.click(&config.selector)
                    )?;
                    Ok::<(), anyhow::Error>(())
                })
                .await
            }
            ActionKind::Type => {
                let config: TypeConfig = step.settings_as()?;
                bounded(
                    action,
                    config.timeout.unwrap_or(default_timeout),
                    page.type_text(&config.selector, &config.text, config.delay),
                )
                .await
            }
            ActionKind::WaitForSelector => {
                let config: SelectorWaitConfig = step.settings_as()?;
                let wait = SelectorWait {
                    timeout_ms: config.timeout.unwrap_or(default_timeout),
                    visible: config.visible,
                    hidden: config.hidden,
                };
                bounded(
                    action,
                    wait.timeout_ms,
                    page.wait_for_selector(&config.selector, &wait),
                )
                .await
            }
            ActionKind::WaitForTimeout => {
                let config: TimeoutConfig = step.settings_as()?;
                tokio::time::sleep(Duration::from_millis(config.timeout.unwrap_or(0))).await;
                Ok(())
            }
            ActionKind::Header => {
                let headers = header_map(&step.settings());
                bounded(action, default_timeout, page.set_extra_headers(&headers)).await
            }
            ActionKind::Geolocation => {
                let location: Geolocation = step.settings_as()?;
                bounded(action, default_timeout, page.set_geolocation(&location)).await
            }
            ActionKind::UserAgent => {
                let config: UserAgentConfig = step.settings_as()?;
                bounded(action, default_timeout, page.set_user_agent(&config.user_agent)).await
            }
            ActionKind::Viewport => {
                let viewport: Viewport = step.settings_as()?;
                bounded(action, default_timeout, page.set_viewport(&viewport)).await
            }
            ActionKind::Authenticate => {
                let credentials: Credentials = step.settings_as()?;
                bounded(action, default_timeout, page.authenticate(&credentials)).await
            }
            ActionKind::Expect => {
                for event in page.drain_events() {
                    self.state.apply(event);
                }
                expect::run(step, &self.state, Some(page)).await
            }
        }
    }

    fn absorb_events(&mut self) {
        for event in self.page.drain_events() {
            self.state.apply(event);
        }
    }
}

fn navigation_options(
    wait_until: Option<WaitList>,
    defaults: &[WaitUntil],
    timeout_ms: u64,
) -> NavigationOptions {
    NavigationOptions {
        timeout_ms,
        wait_until: wait_until
            .map(WaitList::into_vec)
            .unwrap_or_else(|| defaults.to_vec()),
    }
}

/// Headers come either as the step settings themselves or under `headers`
fn header_map(settings: &Map<String, Value>) -> BTreeMap<String, String> {
    let source = match settings.get("headers") {
        Some(Value::Object(headers)) => headers,
        _ => settings,
    };
    source
        .iter()
        .map(|(name, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (name.clone(), value)
        })
        .collect()
}

/// Run one page call under the action timeout
async fn bounded<T, F>(action: ActionKind, timeout_ms: u64, fut: F) -> Result<T, StepError>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(StepError::driver(action.as_str(), e)),
        Err(_) => Err(StepError::Timeout {
            action: action.to_string(),
            timeout_ms,
        }),
    }
}
