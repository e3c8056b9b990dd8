use crate::browser::BrowserConfig;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Prefix for environment overrides, e.g. `MANGA_SCRAPER_MAX_QUEUE_SIZE=50`
pub const ENV_PREFIX: &str = "MANGA_SCRAPER_";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Address the HTTP boundary binds to
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default)]
    pub scraping: ScrapingConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub browser: BrowserConfig,

    #[serde(default)]
    pub bypass: BypassSettings,

    #[serde(default)]
    pub extractor: ExtractorSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScrapingConfig {
    /// Sources queried concurrently in one aggregation batch
    #[serde(default = "default_concurrent_sources")]
    pub concurrent_sources: usize,

    /// Query every batch instead of stopping at the first one with results
    #[serde(default = "default_false")]
    pub exhaustive_search: bool,

    /// Scrapes allowed to run at the same time
    #[serde(default = "default_max_concurrent_scrapes")]
    pub max_concurrent_scrapes: usize,

    /// Waiting plus running scrapes before new requests are rejected
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,

    /// Attempts per HTTP call before giving up
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Fixed delay between HTTP attempts in milliseconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Requests allowed per client inside one window
    #[serde(default = "default_rate_limit_requests")]
    pub rate_limit_requests: usize,

    /// Rate-limit window in milliseconds
    #[serde(default = "default_rate_limit_window")]
    pub rate_limit_window_ms: u64,

    /// Upper bound for a single source call in seconds
    #[serde(default = "default_source_timeout")]
    pub source_timeout_secs: u64,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout")]
    pub http_timeout_secs: u64,

    /// Register render-backed sources (requires Chrome/Chromium)
    #[serde(default = "default_true")]
    pub use_browser: bool,

    /// Source ids registered but disabled at startup
    #[serde(default)]
    pub disabled_sources: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_search_ttl")]
    pub search_ttl_secs: u64,

    #[serde(default = "default_chapters_ttl")]
    pub chapters_ttl_secs: u64,

    #[serde(default = "default_images_ttl")]
    pub images_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BypassSettings {
    #[serde(default = "default_bypass_retries")]
    pub max_retries: u32,

    #[serde(default = "default_jitter_min")]
    pub jitter_min_ms: u64,

    #[serde(default = "default_jitter_max")]
    pub jitter_max_ms: u64,

    #[serde(default = "default_mitigation_timeout")]
    pub mitigation_timeout_ms: u64,

    #[serde(default = "default_pointer_moves")]
    pub pointer_moves: u32,

    /// How long a freshly loaded page may take to render its content
    #[serde(default = "default_content_wait")]
    pub content_wait_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractorSettings {
    #[serde(default = "default_scroll_steps")]
    pub scroll_steps: u32,

    /// Stop scrolling early once this many images were collected
    #[serde(default = "default_image_threshold")]
    pub image_threshold: usize,

    /// Image proxy template with a `{url}` placeholder; empty disables rewriting
    #[serde(default = "default_image_proxy")]
    pub image_proxy: String,
}

fn default_true() -> bool { true }
fn default_false() -> bool { false }
fn default_bind_addr() -> String { "127.0.0.1:8080".to_string() }
fn default_concurrent_sources() -> usize { 3 }
fn default_max_concurrent_scrapes() -> usize { 2 }
fn default_max_queue_size() -> usize { 20 }
fn default_retry_attempts() -> u32 { 3 }
fn default_retry_delay() -> u64 { 1000 }
fn default_rate_limit_requests() -> usize { 30 }
fn default_rate_limit_window() -> u64 { 60_000 }
fn default_source_timeout() -> u64 { 90 }
fn default_timeout() -> u64 { 30 }
fn default_search_ttl() -> u64 { 600 }
fn default_chapters_ttl() -> u64 { 1800 }
fn default_images_ttl() -> u64 { 3600 }
fn default_bypass_retries() -> u32 { 3 }
fn default_jitter_min() -> u64 { 800 }
fn default_jitter_max() -> u64 { 2500 }
fn default_mitigation_timeout() -> u64 { 15_000 }
fn default_pointer_moves() -> u32 { 3 }
fn default_content_wait() -> u64 { 5_000 }
fn default_scroll_steps() -> u32 { 10 }
fn default_image_threshold() -> usize { 200 }
fn default_image_proxy() -> String { "https://wsrv.nl/?url={url}&output=webp&maxage=30d".to_string() }

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            concurrent_sources: default_concurrent_sources(),
            exhaustive_search: false,
            max_concurrent_scrapes: default_max_concurrent_scrapes(),
            max_queue_size: default_max_queue_size(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay(),
            rate_limit_requests: default_rate_limit_requests(),
            rate_limit_window_ms: default_rate_limit_window(),
            source_timeout_secs: default_source_timeout(),
            http_timeout_secs: default_timeout(),
            use_browser: true,
            disabled_sources: Vec::new(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            search_ttl_secs: default_search_ttl(),
            chapters_ttl_secs: default_chapters_ttl(),
            images_ttl_secs: default_images_ttl(),
        }
    }
}

impl Default for BypassSettings {
    fn default() -> Self {
        Self {
            max_retries: default_bypass_retries(),
            jitter_min_ms: default_jitter_min(),
            jitter_max_ms: default_jitter_max(),
            mitigation_timeout_ms: default_mitigation_timeout(),
            pointer_moves: default_pointer_moves(),
            content_wait_ms: default_content_wait(),
        }
    }
}

impl Default for ExtractorSettings {
    fn default() -> Self {
        Self {
            scroll_steps: default_scroll_steps(),
            image_threshold: default_image_threshold(),
            image_proxy: default_image_proxy(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            scraping: ScrapingConfig::default(),
            cache: CacheConfig::default(),
            browser: BrowserConfig::default(),
            bypass: BypassSettings::default(),
            extractor: ExtractorSettings::default(),
        }
    }
}

impl Config {
    /// Load `config.toml` if present, then apply `MANGA_SCRAPER_*` overrides
    pub fn load() -> Self {
        let mut cfg = Self::from_file(Path::new("config.toml")).unwrap_or_default();
        cfg.apply_env(|key| std::env::var(key).ok());
        cfg
    }

    pub fn from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        let content = fs::read_to_string(path).ok()?;
        match toml::from_str::<Config>(&content) {
            Ok(cfg) => Some(cfg),
            Err(e) => {
                log::warn!("Ignoring invalid {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Apply environment-style overrides read through `lookup`.
    ///
    /// Values that fail to parse are ignored and the current value is kept.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(v) = get("BIND_ADDR") {
            self.bind_addr = v;
        }
        override_parsed(&get, "CONCURRENT_SOURCES", &mut self.scraping.concurrent_sources);
        override_parsed(&get, "MAX_CONCURRENT_SCRAPES", &mut self.scraping.max_concurrent_scrapes);
        override_parsed(&get, "MAX_QUEUE_SIZE", &mut self.scraping.max_queue_size);
        override_parsed(&get, "RETRY_ATTEMPTS", &mut self.scraping.retry_attempts);
        override_parsed(&get, "RETRY_DELAY_MS", &mut self.scraping.retry_delay_ms);
        override_parsed(&get, "RATE_LIMIT_REQUESTS", &mut self.scraping.rate_limit_requests);
        override_parsed(&get, "RATE_LIMIT_WINDOW_MS", &mut self.scraping.rate_limit_window_ms);
        override_bool(&get, "EXHAUSTIVE_SEARCH", &mut self.scraping.exhaustive_search);
        override_bool(&get, "USE_BROWSER", &mut self.scraping.use_browser);

        if let Some(v) = get("DISABLED_SOURCES") {
            self.scraping.disabled_sources = v
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.scraping.retry_delay_ms)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.scraping.rate_limit_window_ms)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_secs(self.scraping.source_timeout_secs)
    }
}

fn override_parsed<G, T>(get: &G, name: &str, target: &mut T)
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = get(name) {
        match raw.trim().parse::<T>() {
            Ok(v) => *target = v,
            Err(_) => log::warn!("Ignoring unparseable {}{}={:?}", ENV_PREFIX, name, raw),
        }
    }
}

/// Same convention as the browser toggle: "0" and "false" switch it off
fn override_bool<G>(get: &G, name: &str, target: &mut bool)
where
    G: Fn(&str) -> Option<String>,
{
    if let Some(raw) = get(name) {
        let v = raw.trim().to_lowercase();
        *target = !(v == "0" || v == "false" || v == "no" || v.is_empty());
    }
}
