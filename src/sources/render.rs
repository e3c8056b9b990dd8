use crate::browser::BrowserPool;
use crate::bypass::Navigator;
use crate::error::ScrapeError;
use crate::extract::{builtin_layouts, ImageExtractor, LayoutRule};
use std::sync::Arc;

/// What a render-backed source needs to load a page: the shared worker pool,
/// the bypass navigator and the image extractor
pub struct RenderContext {
    pool: Arc<BrowserPool>,
    navigator: Navigator,
    extractor: ImageExtractor,
}

impl RenderContext {
    pub fn new(pool: Arc<BrowserPool>, navigator: Navigator, extractor: ImageExtractor) -> Self {
        Self {
            pool,
            navigator,
            extractor,
        }
    }

    pub fn pool(&self) -> &Arc<BrowserPool> {
        &self.pool
    }

    /// Load `url` on a fresh page and return its serialized DOM once any of
    /// `ready_selectors` is present on a clean page
    pub async fn fetch_html(&self, url: &str, ready_selectors: &[String]) -> Result<String, ScrapeError> {
        let lease = self.pool.acquire().await?;
        let page = lease.open_page().await?;
        self.navigator.navigate(page.as_ref(), url, ready_selectors).await
    }

    /// Load a chapter reader and extract its images, trying `site_layouts`
    /// before the built-in layouts
    pub async fn extract_images(
        &self,
        url: &str,
        ready_selectors: &[String],
        site_layouts: &[LayoutRule],
    ) -> Result<Vec<String>, ScrapeError> {
        let lease = self.pool.acquire().await?;
        let page = lease.open_page().await?;
        self.navigator.navigate(page.as_ref(), url, ready_selectors).await?;

        let images = if site_layouts.is_empty() {
            self.extractor.extract(page.as_ref()).await?
        } else {
            let mut layouts = site_layouts.to_vec();
            layouts.extend(builtin_layouts());
            self.extractor.with_layouts(layouts).extract(page.as_ref()).await?
        };
        Ok(images)
    }
}
