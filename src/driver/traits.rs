use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::utils::config::RunnerConfig;

/// Page load milestone a navigation waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WaitUntil {
    #[serde(rename = "domcontentloaded")]
    DomContentLoaded,
    #[serde(rename = "load")]
    Load,
    #[serde(
        rename = "networkidle",
        alias = "networkidle0",
        alias = "networkidle2"
    )]
    NetworkIdle,
}

/// Options shared by goto, reload and navigation waits
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationOptions {
    pub timeout_ms: u64,
    /// Every listed milestone must be reached
    pub wait_until: Vec<WaitUntil>,
}

impl NavigationOptions {
    /// The strictest milestone requested, the one a driver has to wait for
    pub fn strictest(&self) -> WaitUntil {
        self.wait_until
            .iter()
            .copied()
            .max()
            .unwrap_or(WaitUntil::Load)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectorWait {
    pub timeout_ms: u64,
    pub visible: bool,
    pub hidden: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geolocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Log,
    Warning,
    Error,
}

impl ConsoleLevel {
    /// Map a browser console message type
    pub fn from_type(kind: &str) -> Self {
        match kind {
            "error" => ConsoleLevel::Error,
            "warning" | "warn" => ConsoleLevel::Warning,
            _ => ConsoleLevel::Log,
        }
    }
}

/// Something the page reported while steps were running.
///
/// Drivers queue these as they happen; the runner drains the queue into the
/// execution state between steps.
#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    Console {
        level: ConsoleLevel,
        text: String,
        location: Option<String>,
    },
    PageError {
        message: String,
    },
    Dialog {
        message: String,
    },
    Response {
        url: String,
        resource_type: String,
        status: u16,
        status_text: String,
        headers: BTreeMap<String, String>,
        /// Body length in bytes, 0 when the body could not be read
        size: u64,
    },
}

/// A live browser page.
///
/// All calls take `&self` so a click and a navigation wait can be polled
/// together.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn goto(&self, url: &str, options: &NavigationOptions) -> Result<()>;

    async fn reload(&self, options: &NavigationOptions) -> Result<()>;

    async fn click(&self, selector: &str) -> Result<()>;

    /// Focus `selector` and type `text` key by key
    async fn type_text(&self, selector: &str, text: &str, delay_ms: Option<u64>) -> Result<()>;

    /// Resolve once the next navigation of the main frame reaches the
    /// strictest requested milestone. Network idle means no request in flight
    /// for 500ms after the load event.
    async fn wait_for_navigation(&self, options: &NavigationOptions) -> Result<()>;

    async fn wait_for_selector(&self, selector: &str, options: &SelectorWait) -> Result<()>;

    /// Extra headers sent with every request. Replaces previously set custom headers.
    async fn set_extra_headers(&self, headers: &BTreeMap<String, String>) -> Result<()>;

    async fn set_geolocation(&self, location: &Geolocation) -> Result<()>;

    async fn set_user_agent(&self, user_agent: &str) -> Result<()>;

    async fn set_viewport(&self, viewport: &Viewport) -> Result<()>;

    /// HTTP authentication for every following request
    async fn authenticate(&self, credentials: &Credentials) -> Result<()>;

    /// Evaluate a JS function expression with one JSON argument
    async fn evaluate(&self, script: &str, arg: Value) -> Result<Value>;

    /// Take the events queued since the last call
    fn drain_events(&self) -> Vec<PageEvent>;

    async fn close(&self) -> Result<()>;
}

/// Opens a fresh, exclusive page for one run
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, config: &RunnerConfig) -> Result<Box<dyn BrowserPage>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_until_accepts_puppeteer_names() {
        let parsed: Vec<WaitUntil> =
            serde_json::from_str(r#"["domcontentloaded", "networkidle2", "load", "networkidle0"]"#)
                .unwrap();
        assert_eq!(
            parsed,
            vec![
                WaitUntil::DomContentLoaded,
                WaitUntil::NetworkIdle,
                WaitUntil::Load,
                WaitUntil::NetworkIdle
            ]
        );
    }

    #[test]
    fn test_strictest_milestone() {
        let options = NavigationOptions {
            timeout_ms: 5000,
            wait_until: vec![WaitUntil::NetworkIdle, WaitUntil::DomContentLoaded],
        };
        assert_eq!(options.strictest(), WaitUntil::NetworkIdle);

        let empty = NavigationOptions {
            timeout_ms: 5000,
            wait_until: vec![],
        };
        assert_eq!(empty.strictest(), WaitUntil::Load);
    }

    #[test]
    fn test_console_level_mapping() {
        assert_eq!(ConsoleLevel::from_type("error"), ConsoleLevel::Error);
        assert_eq!(ConsoleLevel::from_type("warning"), ConsoleLevel::Warning);
        assert_eq!(ConsoleLevel::from_type("info"), ConsoleLevel::Log);
    }
}
