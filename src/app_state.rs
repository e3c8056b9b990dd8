//! Application state for the Actix-web server
//!
//! `AppState` is wrapped in `web::Data` and shared by every handler. It owns
//! the boundary service and the browser pool, which the binary stops on
//! shutdown.

use crate::aggregator::{Aggregator, AggregatorConfig};
use crate::browser::{BrowserPool, ChromeLauncher};
use crate::bypass::{BypassConfig, Navigator};
use crate::config::Config;
use crate::error::ScrapeError;
use crate::extract::{ImageExtractor, ImageProxy};
use crate::http_client::{EnhancedHttpClient, HttpClientConfig};
use crate::metrics::MetricsTracker;
use crate::models::SourceKind;
use crate::service::ScraperService;
use crate::sources::mangadex::MangaDexSource;
use crate::sources::webtoon::WebtoonSource;
use crate::sources::wp_manga::{known_sites, WpMangaSource};
use crate::sources::{RenderContext, SourceRegistry};
use std::sync::Arc;
use std::time::Duration;

/// Shared application state for Actix-web handlers
pub struct AppState {
    pub service: ScraperService,
    /// Browser pool behind every render-backed source
    pub pool: Arc<BrowserPool>,
    pub registry: Arc<SourceRegistry>,
    pub config: Config,
}

impl AppState {
    /// Wire clients, sources and the service from configuration.
    ///
    /// The browser is not launched here; see [`AppState::warm_up`].
    pub fn build(config: Config) -> Result<Self, ScrapeError> {
        let http = Arc::new(EnhancedHttpClient::with_config(HttpClientConfig {
            timeout: Duration::from_secs(config.scraping.http_timeout_secs),
            max_attempts: config.scraping.retry_attempts,
            retry_delay: config.retry_delay(),
            ..HttpClientConfig::default()
        })?);

        let pool = Arc::new(BrowserPool::new(Arc::new(ChromeLauncher::new(
            config.browser.clone(),
        ))));
        let render = Arc::new(RenderContext::new(
            pool.clone(),
            Navigator::new(BypassConfig::from(&config.bypass)),
            ImageExtractor::from_settings(&config.extractor),
        ));

        let registry = Arc::new(build_registry(&config, http, render));
        let metrics = Arc::new(MetricsTracker::new());
        let aggregator = Arc::new(Aggregator::new(
            registry.clone(),
            metrics.clone(),
            AggregatorConfig::from(&config.scraping),
            ImageProxy::new(config.extractor.image_proxy.clone()),
        ));
        let service = ScraperService::new(aggregator, metrics, &config);

        Ok(Self {
            service,
            pool,
            registry,
            config,
        })
    }

    /// Launch the browser up front when render-backed sources are in use
    pub async fn warm_up(&self) {
        if !self.config.scraping.use_browser {
            return;
        }
        if let Err(e) = self.pool.start().await {
            log::warn!("Browser warm-up failed, will retry on first use: {}", e);
        }
    }
}

/// Register every source in query order, applying the enable flags from
/// configuration. Render-backed sources stay registered but disabled when the
/// browser is turned off.
pub fn build_registry(
    config: &Config,
    http: Arc<EnhancedHttpClient>,
    render: Arc<RenderContext>,
) -> SourceRegistry {
    let registry = SourceRegistry::new();
    registry.register(Arc::new(MangaDexSource::new(http)));
    registry.register(Arc::new(WebtoonSource::new(render.clone())));
    for site in known_sites() {
        registry.register(Arc::new(WpMangaSource::new(site, render.clone())));
    }

    if !config.scraping.use_browser {
        for (descriptor, _) in registry.descriptors() {
            if descriptor.kind == SourceKind::Rendered {
                registry.disable(&descriptor.id);
            }
        }
    }
    for id in &config.scraping.disabled_sources {
        if !registry.disable(id) {
            log::warn!("Unknown source in disabled_sources: {}", id);
        }
    }

    log::info!(
        "Registered {} sources ({} enabled)",
        registry.len(),
        registry.enabled().len()
    );
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_respects_config() {
        let mut config = Config::default();
        config.scraping.use_browser = false;
        config.scraping.disabled_sources = vec!["nope".to_string()];

        let state = AppState::build(config).unwrap();
        let registry = &state.registry;
        assert!(registry.is_enabled("mangadex"));
        assert!(!registry.is_enabled("webtoon"));
        assert!(registry
            .descriptors()
            .iter()
            .filter(|(d, _)| d.kind == SourceKind::Rendered)
            .all(|(_, enabled)| !enabled));
        assert_eq!(registry.enabled().len(), 1);
    }

    #[test]
    fn test_disabled_sources() {
        let mut config = Config::default();
        config.scraping.disabled_sources = vec!["mangadex".to_string(), "asurascans".to_string()];

        let state = AppState::build(config).unwrap();
        assert!(!state.registry.is_enabled("mangadex"));
        assert!(!state.registry.is_enabled("asurascans"));
        assert!(state.registry.is_enabled("webtoon"));
        assert_eq!(state.registry.enabled()[0].id(), "webtoon");
    }
}
