use std::path::PathBuf;

/// Runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Timeout for every network or navigation action (ms)
    pub default_timeout_ms: u64,

    /// Redirects followed by basic HTTP navigation, 0 disables following
    pub max_redirects: usize,

    /// Run the browser without a window
    pub headless: bool,

    /// Browser binary to launch instead of the Playwright default
    pub browser_executable: Option<PathBuf>,

    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 5000,
            max_redirects: 0,
            headless: true,
            browser_executable: None,
            viewport_width: 1280,
            viewport_height: 720,
        }
    }
}

impl RunnerConfig {
    /// Defaults overridden by `LUMI_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(v) = lookup("LUMI_HEADLESS") {
            config.headless = v == "true" || v == "1";
        }
        if let Some(ms) = lookup("LUMI_DEFAULT_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            config.default_timeout_ms = ms;
        }
        if let Some(n) = lookup("LUMI_MAX_REDIRECTS").and_then(|v| v.parse().ok()) {
            config.max_redirects = n;
        }
        config.browser_executable = lookup("PLAYWRIGHT_CHROMIUM_EXECUTABLE_PATH").map(PathBuf::from);

        config
    }
}
