use super::manager::BrowserError;
use async_trait::async_trait;
use headless_chrome::Tab;
use scraper::{Html, Selector};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// A single rendered page (tab) obtained from a worker.
///
/// Everything the navigator and the image extractor do to a live page goes
/// through this trait, so both can be driven by in-memory fakes in tests.
#[async_trait]
pub trait Page: Send + Sync {
    /// Navigate and wait for the load to finish
    async fn goto(&self, url: &str) -> Result<(), BrowserError>;

    /// Serialized DOM of the current document
    async fn content(&self) -> Result<String, BrowserError>;

    /// Evaluate `script`, optionally awaiting a returned promise
    async fn evaluate(
        &self,
        script: &str,
        await_promise: bool,
    ) -> Result<Option<serde_json::Value>, BrowserError>;

    async fn wait_for_selector(&self, selector: &str, timeout: Duration)
        -> Result<(), BrowserError>;

    /// Wait until a new document replaces the one loaded when this is
    /// called (e.g. a challenge redirect or reload) and finishes loading.
    /// A page that stays put is a `Timeout`, never an early success.
    async fn wait_for_navigation(&self, timeout: Duration) -> Result<(), BrowserError>;

    /// Dispatch a synthetic pointer movement to viewport coordinates
    async fn move_pointer(&self, x: f64, y: f64) -> Result<(), BrowserError>;

    fn url(&self) -> String;
}

/// Whether `html` contains at least one element matching `selector`
pub fn html_has_selector(html: &str, selector: &str) -> bool {
    match Selector::parse(selector) {
        Ok(sel) => Html::parse_document(html).select(&sel).next().is_some(),
        Err(_) => false,
    }
}

/// Poll the page until one of `selectors` matches, returning the first hit in
/// priority order. Returns `Ok(None)` when none appears before `timeout`.
pub async fn wait_for_any(
    page: &dyn Page,
    selectors: &[String],
    timeout: Duration,
) -> Result<Option<String>, BrowserError> {
    let start = Instant::now();
    loop {
        let html = page.content().await?;
        if let Some(hit) = first_matching_selector(&html, selectors) {
            return Ok(Some(hit));
        }
        if start.elapsed() >= timeout {
            return Ok(None);
        }
        sleep(Duration::from_millis(250)).await;
    }
}

fn first_matching_selector(html: &str, selectors: &[String]) -> Option<String> {
    let document = Html::parse_document(html);
    selectors.iter().find_map(|s| {
        let sel = Selector::parse(s).ok()?;
        document.select(&sel).next().map(|_| s.clone())
    })
}

const NAVIGATION_POLL: Duration = Duration::from_millis(250);

/// `Page` backed by a headless Chrome tab.
///
/// `headless_chrome` is a blocking API, so every call runs on the blocking pool.
pub struct ChromePage {
    tab: Arc<Tab>,
    timeout: Duration,
}

impl ChromePage {
    pub fn new(tab: Arc<Tab>, timeout: Duration) -> Self {
        tab.set_default_timeout(timeout);
        Self { tab, timeout }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, BrowserError>
    where
        F: FnOnce(Arc<Tab>) -> Result<T, BrowserError> + Send + 'static,
        T: Send + 'static,
    {
        let tab = self.tab.clone();
        tokio::task::spawn_blocking(move || f(tab))
            .await
            .map_err(|e| BrowserError::TaskFailed(e.to_string()))?
    }

    /// Get a reference to the underlying tab
    pub fn tab(&self) -> &Arc<Tab> {
        &self.tab
    }

    /// `performance.timeOrigin` of the current document; every new document
    /// gets a fresh one, including same-URL reloads
    async fn document_origin(&self) -> Option<String> {
        match self.evaluate("performance.timeOrigin", false).await {
            Ok(Some(value)) => Some(value.to_string()),
            _ => None,
        }
    }
}

#[async_trait]
impl Page for ChromePage {
    async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        let url = url.to_string();
        self.blocking(move |tab| {
            tab.navigate_to(&url).map_err(|e| {
                BrowserError::NavigationError(format!("Failed to navigate to {}: {}", url, e))
            })?;
            tab.wait_until_navigated().map_err(|e| {
                BrowserError::NavigationError(format!("Navigation timeout for {}: {}", url, e))
            })?;
            Ok(())
        })
        .await
    }

    async fn content(&self) -> Result<String, BrowserError> {
        self.blocking(|tab| {
            tab.get_content()
                .map_err(|e| BrowserError::HtmlExtractionError(e.to_string()))
        })
        .await
    }

    async fn evaluate(
        &self,
        script: &str,
        await_promise: bool,
    ) -> Result<Option<serde_json::Value>, BrowserError> {
        let script = script.to_string();
        self.blocking(move |tab| {
            tab.evaluate(&script, await_promise)
                .map(|result| result.value)
                .map_err(|e| BrowserError::JavaScriptError(e.to_string()))
        })
        .await
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let selector = selector.to_string();
        self.blocking(move |tab| {
            tab.wait_for_element_with_custom_timeout(&selector, timeout)
                .map(|_| ())
                .map_err(|_| BrowserError::Timeout(format!("Waiting for selector: {}", selector)))
        })
        .await
    }

    async fn wait_for_navigation(&self, timeout: Duration) -> Result<(), BrowserError> {
        let start = Instant::now();
        let url = self.url();
        let origin = self.document_origin().await;

        loop {
            if start.elapsed() >= timeout {
                return Err(BrowserError::Timeout("Waiting for navigation".to_string()));
            }
            sleep(NAVIGATION_POLL).await;

            // No origin while the old document is being torn down
            let current = self.document_origin().await;
            if self.url() != url || (current.is_some() && current != origin) {
                break;
            }
        }

        let remaining = timeout.saturating_sub(start.elapsed());
        let default_timeout = self.timeout;
        self.blocking(move |tab| {
            tab.set_default_timeout(remaining.max(NAVIGATION_POLL));
            let result = tab
                .wait_until_navigated()
                .map(|_| ())
                .map_err(|_| BrowserError::Timeout("Waiting for navigation to settle".to_string()));
            tab.set_default_timeout(default_timeout);
            result
        })
        .await
    }

    async fn move_pointer(&self, x: f64, y: f64) -> Result<(), BrowserError> {
        let script = format!(
            "document.dispatchEvent(new MouseEvent('mousemove', {{ clientX: {x}, clientY: {y}, bubbles: true }}));"
        );
        self.evaluate(&script, false).await.map(|_| ())
    }

    fn url(&self) -> String {
        self.tab.get_url()
    }
}

impl Drop for ChromePage {
    fn drop(&mut self) {
        let tab = self.tab.clone();
        let close = move || {
            if let Err(e) = tab.close(false) {
                log::debug!("Failed to close tab: {}", e);
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(close);
            }
            Err(_) => close(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_has_selector() {
        let html = r#"<div id="readerarea"><img src="a.jpg"></div>"#;
        assert!(html_has_selector(html, "#readerarea img"));
        assert!(!html_has_selector(html, ".reading-content"));
        assert!(!html_has_selector(html, "<<invalid"));
    }

    #[test]
    fn test_first_matching_selector_respects_priority() {
        let html = r#"<div class="b"></div><div class="a"></div>"#;
        let selectors = vec![".missing".to_string(), ".a".to_string(), ".b".to_string()];
        assert_eq!(first_matching_selector(html, &selectors), Some(".a".to_string()));
    }
}
