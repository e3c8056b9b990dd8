use super::config::BrowserConfig;
use super::page::{ChromePage, Page};
use super::pool::{Worker, WorkerLauncher};
use crate::bypass::stealth;
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::sync::Arc;

/// A launched Chrome process; one per pool
pub struct BrowserManager {
    browser: Arc<Browser>,
    config: BrowserConfig,
}

impl BrowserManager {
    /// Launch Chrome with the given configuration. Blocks until the DevTools
    /// endpoint is reachable.
    pub fn new(config: BrowserConfig) -> Result<Self, BrowserError> {
        let flags = config.launch_flags();
        let launch_options = Self::build_launch_options(&config, &flags)?;

        let browser = Browser::new(launch_options)
            .map_err(|e| BrowserError::InitializationError(e.to_string()))?;

        log::info!(
            "Launched Chrome worker (headless: {}, {} flags)",
            config.headless,
            flags.len()
        );

        Ok(Self {
            browser: Arc::new(browser),
            config,
        })
    }

    fn build_launch_options<'a>(
        config: &BrowserConfig,
        flags: &'a [String],
    ) -> Result<LaunchOptions<'a>, BrowserError> {
        let args: Vec<&OsStr> = flags.iter().map(OsStr::new).collect();

        LaunchOptions::default_builder()
            .headless(config.headless)
            .window_size(Some((config.window_size.0, config.window_size.1)))
            .idle_browser_timeout(config.idle_timeout())
            .args(args)
            .build()
            .map_err(|e| BrowserError::ConfigurationError(e.to_string()))
    }

    /// Create a tab carrying the per-request customisation: viewport, user
    /// agent and fingerprint overrides. The shared process is never touched.
    fn prepare_tab(browser: &Browser, config: &BrowserConfig) -> Result<Arc<Tab>, BrowserError> {
        let tab = browser
            .new_tab()
            .map_err(|e| BrowserError::TabCreationError(e.to_string()))?;

        let user_agent = config
            .user_agent
            .clone()
            .unwrap_or_else(|| stealth::random_user_agent().to_string());
        tab.set_user_agent(&user_agent, Some("en-US,en;q=0.9"), None)
            .map_err(|e| BrowserError::TabCreationError(format!("user agent: {}", e)))?;

        let (width, height) = config.window_size;
        if let Err(e) = tab.set_bounds(headless_chrome::types::Bounds::Normal {
            left: Some(0),
            top: Some(0),
            width: Some(width as f64),
            height: Some(height as f64),
        }) {
            log::debug!("Could not set tab bounds: {}", e);
        }

        // Best effort: about:blank may reject some overrides
        if let Err(e) = tab.evaluate(&stealth::fingerprint_script(), false) {
            log::debug!("Stealth script not applied: {}", e);
        }

        Ok(tab)
    }

    /// Get the browser configuration
    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }
}

#[async_trait]
impl Worker for BrowserManager {
    async fn open_page(&self) -> Result<Box<dyn Page>, BrowserError> {
        let timeout = self.config.timeout();
        let browser = self.browser.clone();
        let config = self.config.clone();
        let tab = tokio::task::spawn_blocking(move || Self::prepare_tab(&browser, &config))
            .await
            .map_err(|e| BrowserError::TaskFailed(e.to_string()))??;
        Ok(Box::new(ChromePage::new(tab, timeout)))
    }
}

/// Launches `BrowserManager` workers for a `BrowserPool`
pub struct ChromeLauncher {
    config: BrowserConfig,
}

impl ChromeLauncher {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl WorkerLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Arc<dyn Worker>, BrowserError> {
        let config = self.config.clone();
        let manager = tokio::task::spawn_blocking(move || BrowserManager::new(config))
            .await
            .map_err(|e| BrowserError::TaskFailed(e.to_string()))??;
        Ok(Arc::new(manager))
    }
}

/// Errors that can occur during browser operations
#[derive(Debug, thiserror::Error)]
pub enum BrowserError {
    #[error("Browser initialization failed: {0}")]
    InitializationError(String),

    #[error("Browser configuration error: {0}")]
    ConfigurationError(String),

    #[error("Tab creation failed: {0}")]
    TabCreationError(String),

    #[error("Navigation error: {0}")]
    NavigationError(String),

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("JavaScript execution error: {0}")]
    JavaScriptError(String),

    #[error("HTML extraction error: {0}")]
    HtmlExtractionError(String),

    #[error("Blocking browser task failed: {0}")]
    TaskFailed(String),
}

impl BrowserError {
    /// The worker process or its DevTools connection is gone; opening another
    /// page on it will keep failing.
    pub fn is_worker_lost(&self) -> bool {
        matches!(self, BrowserError::TabCreationError(_) | BrowserError::TaskFailed(_))
    }
}
