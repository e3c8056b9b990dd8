//! Chapter image extraction from rendered reader pages

pub mod rules;

pub use rules::{
    builtin_layouts, collect_image_urls, dedupe_urls, finalize_urls, is_acceptable_image_url,
    page_number, sort_by_page_number, ImageProxy, LayoutRule, DEFAULT_LAZY_ATTRIBUTES,
};

use crate::browser::page::wait_for_any;
use crate::browser::{BrowserError, Page};
use crate::config::ExtractorSettings;
use std::time::Duration;
use tokio::time::sleep;

/// Disable animations and remove overlays that shift or hide the reader
const STABILIZE_SCRIPT: &str = r#"
(() => {
    const style = document.createElement('style');
    style.innerHTML = '*, *::before, *::after { transition: none !important; animation: none !important; }';
    document.head && document.head.appendChild(style);
    const junk = ['.modal', '.modal-backdrop', '.popup', '.overlay', '[id^="ads"]', '.ads', 'iframe[src*="ads"]', '#disqus_thread'];
    junk.forEach(sel => document.querySelectorAll(sel).forEach(el => el.remove()));
    document.body && (document.body.style.overflow = 'auto');
    return true;
})()
"#;

/// Scroll to the bottom in small increments until the height stops growing
const AUTO_SCROLL_SCRIPT: &str = r#"
new Promise(resolve => {
    let last = -1, stable = 0;
    const timer = setInterval(() => {
        window.scrollBy(0, 800);
        const height = document.body.scrollHeight;
        if (window.innerHeight + window.scrollY >= height - 2 && height === last) {
            stable += 1;
        } else {
            stable = 0;
        }
        last = height;
        if (stable >= 3) { clearInterval(timer); resolve(true); }
    }, 200);
    setTimeout(() => { clearInterval(timer); resolve(false); }, 30000);
})
"#;

fn force_lazy_script(attributes: &[String]) -> String {
    let attrs = serde_json::to_string(attributes).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"(() => {{
    const attrs = {attrs};
    let forced = 0;
    document.querySelectorAll('img').forEach(img => {{
        for (const a of attrs) {{
            const v = img.getAttribute(a);
            if (v && !v.startsWith('data:') && img.getAttribute('src') !== v) {{
                img.setAttribute('src', v);
                forced += 1;
                break;
            }}
        }}
    }});
    return forced;
}})()"#
    )
}

fn scroll_step_script(step: u32, total: u32) -> String {
    format!(
        "window.scrollTo(0, document.body.scrollHeight * {} / {});",
        step, total
    )
}

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub scroll_steps: u32,
    pub image_threshold: usize,
    pub container_wait: Duration,
    pub step_pause: Duration,
    pub settle: Duration,
}

impl From<&ExtractorSettings> for ExtractorConfig {
    fn from(s: &ExtractorSettings) -> Self {
        Self {
            scroll_steps: s.scroll_steps.max(1),
            image_threshold: s.image_threshold.max(1),
            container_wait: Duration::from_secs(10),
            step_pause: Duration::from_millis(400),
            settle: Duration::from_millis(1500),
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self::from(&ExtractorSettings::default())
    }
}

/// Finds, orders and proxy-rewrites the page images of a rendered chapter
pub struct ImageExtractor {
    layouts: Vec<LayoutRule>,
    config: ExtractorConfig,
    proxy: ImageProxy,
}

impl ImageExtractor {
    pub fn new(layouts: Vec<LayoutRule>, config: ExtractorConfig, proxy: ImageProxy) -> Self {
        Self {
            layouts,
            config,
            proxy,
        }
    }

    pub fn from_settings(settings: &ExtractorSettings) -> Self {
        Self::new(
            builtin_layouts(),
            ExtractorConfig::from(settings),
            ImageProxy::new(settings.image_proxy.clone()),
        )
    }

    pub fn proxy(&self) -> &ImageProxy {
        &self.proxy
    }

    /// Same extractor with a different layout list (site-specific selectors
    /// first, then the built-ins)
    pub fn with_layouts(&self, layouts: Vec<LayoutRule>) -> Self {
        Self::new(layouts, self.config.clone(), self.proxy.clone())
    }

    /// Detect the layout by the first container present, or fall back to the
    /// generic rule
    async fn detect_layout(&self, page: &dyn Page) -> Result<LayoutRule, BrowserError> {
        let containers: Vec<String> = self
            .layouts
            .iter()
            .flat_map(|l| l.container_selectors.iter().cloned())
            .collect();

        if containers.is_empty() {
            return Ok(LayoutRule::generic());
        }

        let hit = wait_for_any(page, &containers, self.config.container_wait).await?;
        let layout = hit.and_then(|sel| {
            self.layouts
                .iter()
                .find(|l| l.container_selectors.contains(&sel))
                .cloned()
        });

        Ok(layout.unwrap_or_else(|| {
            log::debug!("No known reader container on {}, using generic strategy", page.url());
            LayoutRule::generic()
        }))
    }

    async fn run_script(page: &dyn Page, script: &str, await_promise: bool) {
        if let Err(e) = page.evaluate(script, await_promise).await {
            log::debug!("Extractor script failed: {}", e);
        }
    }

    /// Extract the ordered image list of the chapter currently loaded in
    /// `page`. An empty list means extraction failed; the caller decides on
    /// a fallback.
    pub async fn extract(&self, page: &dyn Page) -> Result<Vec<String>, BrowserError> {
        let layout = self.detect_layout(page).await?;
        log::debug!("Extracting images with '{}' layout", layout.name);

        Self::run_script(page, STABILIZE_SCRIPT, false).await;
        let force_lazy = force_lazy_script(&layout.lazy_attributes);

        let urls = if layout.streaming {
            self.extract_streaming(page, &layout, &force_lazy).await?
        } else {
            self.extract_paged(page, &layout, &force_lazy).await?
        };

        let urls = finalize_urls(urls, &self.proxy);
        log::info!("Extracted {} images ({} layout)", urls.len(), layout.name);
        Ok(urls)
    }

    async fn extract_streaming(
        &self,
        page: &dyn Page,
        layout: &LayoutRule,
        force_lazy: &str,
    ) -> Result<Vec<String>, BrowserError> {
        if let Some(first) = layout.image_selectors.first() {
            if let Err(e) = page.wait_for_selector(first, self.config.container_wait).await {
                log::debug!("No image appeared for '{}': {}", first, e);
            }
        }

        Self::run_script(page, AUTO_SCROLL_SCRIPT, true).await;
        Self::run_script(page, force_lazy, false).await;
        sleep(self.config.settle).await;

        let html = page.content().await?;
        Ok(collect_image_urls(
            &html,
            &layout.image_selectors,
            &layout.lazy_attributes,
            layout.strict_urls,
        ))
    }

    async fn extract_paged(
        &self,
        page: &dyn Page,
        layout: &LayoutRule,
        force_lazy: &str,
    ) -> Result<Vec<String>, BrowserError> {
        let mut urls: Vec<String> = Vec::new();
        let steps = self.config.scroll_steps;

        for step in 1..=steps {
            Self::run_script(page, &scroll_step_script(step, steps), false).await;
            Self::run_script(page, force_lazy, false).await;
            sleep(self.config.step_pause).await;

            let html = page.content().await?;
            urls.extend(collect_image_urls(
                &html,
                &layout.image_selectors,
                &layout.lazy_attributes,
                layout.strict_urls,
            ));
            urls = dedupe_urls(urls);

            if urls.len() >= self.config.image_threshold {
                log::debug!("Image threshold reached after {} scroll steps", step);
                break;
            }
        }

        Ok(urls)
    }
}
