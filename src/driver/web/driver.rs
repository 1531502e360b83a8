//! Browser pages backed by Playwright.
//!
//! Each launch starts its own Chromium with a fresh context, so runs never
//! share cookies, headers or permissions.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use futures_util::StreamExt;
use playwright::api::page::Event;
use playwright::api::{Browser, BrowserContext, DocumentLoadState, Page, Viewport as PwViewport};
use playwright::Playwright;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::driver::traits::{
    BrowserLauncher, BrowserPage, ConsoleLevel, Credentials, Geolocation, NavigationOptions,
    PageEvent, SelectorWait, Viewport, WaitUntil,
};
use crate::utils::config::RunnerConfig;

/// Quiet period that counts as network idle
const NETWORK_IDLE_WINDOW: Duration = Duration::from_millis(500);

const VISIBLE_JS: &str = r#"(selector) => {
    const el = document.querySelector(selector);
    if (!el) return false;
    const style = window.getComputedStyle(el);
    return style.display !== 'none' && style.visibility !== 'hidden' && style.opacity !== '0';
}"#;

/// Launches headless Chromium pages
#[derive(Debug, Default, Clone, Copy)]
pub struct PlaywrightLauncher;

#[async_trait]
impl BrowserLauncher for PlaywrightLauncher {
    async fn launch(&self, config: &RunnerConfig) -> Result<Box<dyn BrowserPage>> {
        let page = WebPage::launch(config).await?;
        Ok(Box::new(page))
    }
}

/// One Chromium page and the browser that owns it
pub struct WebPage {
    #[allow(dead_code)]
    playwright: Arc<Playwright>,
    browser: Arc<Browser>,
    context: Arc<BrowserContext>,
    page: Arc<Mutex<Page>>,
    /// Custom headers, user agent and credentials merged into one header set
    headers: StdMutex<BTreeMap<String, String>>,
    events: StdMutex<mpsc::UnboundedReceiver<PageEvent>>,
    forwarder: JoinHandle<()>,
    closed: AtomicBool,
}

impl WebPage {
    pub async fn launch(config: &RunnerConfig) -> Result<Self> {
        let playwright = Playwright::initialize()
            .await
            .context("Failed to initialize Playwright")?;

        let chromium = playwright.chromium();
        let browser = launch_chromium_browser(&chromium, config).await?;
        let context = browser
            .context_builder()
            .build()
            .await
            .context("Failed to create browser context")?;
        let page = context.new_page().await.context("Failed to open page")?;

        page.set_viewport_size(PwViewport {
            width: config.viewport_width as i32,
            height: config.viewport_height as i32,
        })
        .await?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let stream = page
            .subscribe_event()
            .context("Failed to subscribe to page events")?;
        let forwarder = tokio::spawn(forward_events(Box::pin(stream), sender));

        Ok(Self {
            playwright: Arc::new(playwright),
            browser: Arc::new(browser),
            context: Arc::new(context),
            page: Arc::new(Mutex::new(page)),
            headers: StdMutex::new(BTreeMap::new()),
            events: StdMutex::new(receiver),
            forwarder,
            closed: AtomicBool::new(false),
        })
    }

    /// Merge `update` into the header set and push the result to the context
    async fn merge_headers(&self, update: BTreeMap<String, String>) -> Result<()> {
        let merged = {
            let mut headers = self.headers.lock().unwrap_or_else(|e| e.into_inner());
            headers.extend(update);
            headers.clone()
        };
        self.context
            .set_extra_http_headers(merged)
            .await
            .context("Failed to set extra HTTP headers")?;
        Ok(())
    }

    async fn is_visible(&self, selector: &str) -> Result<bool> {
        let page = self.page.lock().await;
        let visible: bool = page.evaluate(VISIBLE_JS, selector.to_string()).await?;
        Ok(visible)
    }
}

/// Turn Playwright page events into [`PageEvent`]s until the page goes away.
///
/// Page errors and dialogs are not forwarded; the playwright crate does not
/// expose their payloads.
async fn forward_events<S, E>(
    mut stream: std::pin::Pin<Box<S>>,
    sender: mpsc::UnboundedSender<PageEvent>,
) where
    S: futures_util::Stream<Item = Result<Event, E>> + Send + 'static,
    E: Send + 'static,
{
    while let Some(item) = stream.next().await {
        let Ok(event) = item else {
            continue;
        };
        match event {
            Event::Console(msg) => {
                let level = ConsoleLevel::from_type(&msg.r#type().unwrap_or_default());
                let _ = sender.send(PageEvent::Console {
                    level,
                    text: msg.text().unwrap_or_default(),
                    location: None,
                });
            }
            Event::Response(res) => {
                let sender = sender.clone();
                // Bodies arrive after the response event, read them off the event loop
                tokio::spawn(async move {
                    let size = res.body().await.map(|b| b.len() as u64).unwrap_or(0);
                    let headers: BTreeMap<String, String> = res
                        .headers()
                        .await
                        .map(|h| h.into_iter().map(Into::into).collect())
                        .unwrap_or_default();
                    let _ = sender.send(PageEvent::Response {
                        url: res.url().unwrap_or_default(),
                        resource_type: res.request().resource_type().unwrap_or_default(),
                        status: res.status().unwrap_or_default() as u16,
                        status_text: res.status_text().unwrap_or_default(),
                        headers,
                        size,
                    });
                });
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Activity {
    Started,
    Settled,
    Other,
}

impl Activity {
    fn of<E>(event: &Result<Event, E>) -> Self {
        match event {
            Ok(Event::Request(_)) => Activity::Started,
            Ok(Event::RequestFinished(_)) | Ok(Event::RequestFailed(_)) => Activity::Settled,
            _ => Activity::Other,
        }
    }
}

/// Requests still in flight, for the network idle wait.
///
/// Counting starts at the load event, so requests issued earlier only
/// settle the count down to zero.
#[derive(Debug, Default)]
struct InFlight(usize);

impl InFlight {
    fn observe(&mut self, activity: Activity) {
        match activity {
            Activity::Started => self.0 += 1,
            Activity::Settled => self.0 = self.0.saturating_sub(1),
            Activity::Other => {}
        }
    }

    fn idle(&self) -> bool {
        self.0 == 0
    }
}

fn load_state(wait_until: WaitUntil) -> DocumentLoadState {
    match wait_until {
        WaitUntil::DomContentLoaded => DocumentLoadState::DomContentLoaded,
        WaitUntil::Load => DocumentLoadState::Load,
        WaitUntil::NetworkIdle => DocumentLoadState::NetworkIdle,
    }
}

#[async_trait]
impl BrowserPage for WebPage {
    async fn goto(&self, url: &str, options: &NavigationOptions) -> Result<()> {
        let page = self.page.lock().await;
        page.goto_builder(url)
            .timeout(options.timeout_ms as f64)
            .wait_until(load_state(options.strictest()))
            .goto()
            .await
            .context("Failed to navigate")?;
        Ok(())
    }

    async fn reload(&self, options: &NavigationOptions) -> Result<()> {
        let page = self.page.lock().await;
        page.reload_builder()
            .timeout(options.timeout_ms as f64)
            .wait_until(load_state(options.strictest()))
            .reload()
            .await
            .context("Failed to reload")?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let page = self.page.lock().await;
        page.click_builder(selector)
            .click()
            .await
            .with_context(|| format!("Failed to click '{}'", selector))?;
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str, delay_ms: Option<u64>) -> Result<()> {
        let page = self.page.lock().await;
        page.click_builder(selector)
            .click()
            .await
            .with_context(|| format!("Failed to focus '{}'", selector))?;

        match delay_ms.filter(|ms| *ms > 0) {
            None => page.keyboard.input_text(text).await?,
            Some(ms) => {
                for ch in text.chars() {
                    page.keyboard.input_text(&ch.to_string()).await?;
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                }
            }
        }
        Ok(())
    }

    async fn wait_for_navigation(&self, options: &NavigationOptions) -> Result<()> {
        // Subscribe before anything can trigger the navigation, then release the page
        let mut stream = {
            let page = self.page.lock().await;
            Box::pin(page.subscribe_event()?)
        };
        let wanted = options.strictest();
        let mut in_flight = InFlight::default();

        loop {
            let Some(item) = stream.next().await else {
                anyhow::bail!("Page closed before navigation finished");
            };
            in_flight.observe(Activity::of(&item));
            match item {
                Ok(Event::DomContentLoaded) if wanted == WaitUntil::DomContentLoaded => {
                    return Ok(())
                }
                Ok(Event::Load) => break,
                _ => {}
            }
        }
        if wanted != WaitUntil::NetworkIdle {
            return Ok(());
        }

        // No request in flight for a whole quiet window
        loop {
            match tokio::time::timeout(NETWORK_IDLE_WINDOW, stream.next()).await {
                Err(_) if in_flight.idle() => return Ok(()),
                Err(_) => {}
                Ok(Some(item)) => in_flight.observe(Activity::of(&item)),
                Ok(None) => anyhow::bail!("Page closed before the network went idle"),
            }
        }
    }

    async fn wait_for_selector(&self, selector: &str, options: &SelectorWait) -> Result<()> {
        if options.hidden {
            // Poll until the element is gone or hidden
            let start = std::time::Instant::now();
            while start.elapsed().as_millis() < options.timeout_ms as u128 {
                if !self.is_visible(selector).await? {
                    return Ok(());
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            anyhow::bail!("'{}' still visible after {}ms", selector, options.timeout_ms);
        }

        let page = self.page.lock().await;
        page.wait_for_selector_builder(selector)
            .timeout(options.timeout_ms as f64)
            .wait_for_selector()
            .await
            .with_context(|| format!("Waiting for '{}' failed", selector))?;
        Ok(())
    }

    async fn set_extra_headers(&self, headers: &BTreeMap<String, String>) -> Result<()> {
        self.merge_headers(headers.clone()).await
    }

    async fn set_geolocation(&self, location: &Geolocation) -> Result<()> {
        let permissions = vec!["geolocation".to_string()];
        self.context.grant_permissions(&permissions, None).await?;
        self.context
            .set_geolocation(Some(&playwright::api::Geolocation {
                latitude: location.latitude,
                longitude: location.longitude,
                accuracy: location.accuracy,
            }))
            .await?;
        Ok(())
    }

    async fn set_user_agent(&self, user_agent: &str) -> Result<()> {
        let mut update = BTreeMap::new();
        update.insert("User-Agent".to_string(), user_agent.to_string());
        self.merge_headers(update).await
    }

    async fn set_viewport(&self, viewport: &Viewport) -> Result<()> {
        let page = self.page.lock().await;
        page.set_viewport_size(PwViewport {
            width: viewport.width as i32,
            height: viewport.height as i32,
        })
        .await?;
        Ok(())
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<()> {
        let token = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", credentials.username, credentials.password));
        let mut update = BTreeMap::new();
        update.insert("Authorization".to_string(), format!("Basic {}", token));
        self.merge_headers(update).await
    }

    async fn evaluate(&self, script: &str, arg: Value) -> Result<Value> {
        let page = self.page.lock().await;
        let value: Value = page
            .evaluate(script, arg)
            .await
            .context("Script evaluation failed")?;
        Ok(value)
    }

    fn drain_events(&self) -> Vec<PageEvent> {
        let mut receiver = self.events.lock().unwrap_or_else(|e| e.into_inner());
        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        events
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.forwarder.abort();
        self.context.close().await.ok();
        self.browser.close().await.context("Failed to close browser")?;
        Ok(())
    }
}

impl Drop for WebPage {
    fn drop(&mut self) {
        self.forwarder.abort();
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let browser = Arc::clone(&self.browser);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                browser.close().await.ok();
            });
        }
    }
}

/// Launch a new Chromium browser
async fn launch_chromium_browser(
    chromium: &playwright::api::BrowserType,
    config: &RunnerConfig,
) -> Result<Browser> {
    let mut launcher = chromium.launcher();
    launcher = launcher.headless(config.headless);

    if let Some(ref path) = config.browser_executable {
        log::info!("Using browser from env: {}", path.display());
        launcher = launcher.executable(path);
    }

    let args: Vec<String> = vec![
        "--no-sandbox",
        "--disable-setuid-sandbox",
        "--disable-dev-shm-usage",
        "--disable-gpu",
        "--ignore-certificate-errors",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    launcher = launcher.args(&args);

    launcher.launch().await.context("Failed to launch Chromium")
}
