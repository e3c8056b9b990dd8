use crate::error::ScrapeError;
use crate::retry::retry_if;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, ClientBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// User agents to rotate through to avoid bot detection
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.2 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36 Edg/120.0.0.0",
];

/// Configuration for the outbound HTTP client
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub enable_cookies: bool,
    pub enable_gzip: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            retry_delay: Duration::from_millis(1000),
            enable_cookies: true,
            enable_gzip: true,
        }
    }
}

/// HTTPS-only client with browser-like headers and bounded retry
pub struct EnhancedHttpClient {
    client: Client,
    config: HttpClientConfig,
}

impl EnhancedHttpClient {
    /// Create a new enhanced HTTP client with default configuration
    pub fn new() -> Result<Self, ScrapeError> {
        Self::with_config(HttpClientConfig::default())
    }

    /// Create a new enhanced HTTP client with custom configuration
    pub fn with_config(config: HttpClientConfig) -> Result<Self, ScrapeError> {
        let client = ClientBuilder::new()
            .https_only(true)
            .timeout(config.timeout)
            .user_agent(Self::random_user_agent())
            .cookie_store(config.enable_cookies)
            .gzip(config.enable_gzip)
            .brotli(true)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .default_headers(Self::browser_headers())
            .build()?;

        Ok(Self { client, config })
    }

    /// Default headers that mimic a real browser
    fn browser_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        let pairs = [
            ("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8"),
            ("Accept-Language", "en-US,en;q=0.9"),
            ("DNT", "1"),
            ("Upgrade-Insecure-Requests", "1"),
            ("Sec-Fetch-Dest", "document"),
            ("Sec-Fetch-Mode", "navigate"),
            ("Sec-Fetch-Site", "none"),
            ("Sec-Fetch-User", "?1"),
            ("Cache-Control", "max-age=0"),
        ];
        for (name, value) in pairs {
            headers.insert(name, HeaderValue::from_static(value));
        }
        headers
    }

    /// Get a random user agent from the pool
    pub fn random_user_agent() -> &'static str {
        let index = rand::thread_rng().gen_range(0..USER_AGENTS.len());
        USER_AGENTS[index]
    }

    /// Check if a status code is retryable
    pub fn is_retryable_status(status: StatusCode) -> bool {
        matches!(
            status.as_u16(),
            // Rate limiting
            429 |
            // Server errors
            500 | 502 | 503 | 504 |
            // Cloudflare errors
            520..=527
        )
    }

    /// Reject anything but `https://` before a request is built
    pub fn ensure_https(url: &str) -> Result<(), ScrapeError> {
        match reqwest::Url::parse(url) {
            Ok(parsed) if parsed.scheme() == "https" => Ok(()),
            Ok(parsed) => Err(ScrapeError::InvalidInput(format!(
                "refusing {} request to {}",
                parsed.scheme(),
                url
            ))),
            Err(e) => Err(ScrapeError::InvalidInput(format!("bad url {}: {}", url, e))),
        }
    }

    /// Single attempt: rotate the user agent and turn error statuses into errors
    async fn send_once(
        &self,
        url: &str,
        extra_headers: Option<&HeaderMap>,
    ) -> Result<Response, ScrapeError> {
        let mut request = self
            .client
            .get(url)
            .header("User-Agent", Self::random_user_agent());

        if let Some(headers) = extra_headers {
            request = request.headers(headers.clone());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }

    /// Fetch a URL, retrying transient failures with a fixed delay
    pub async fn get_with_retry(
        &self,
        url: &str,
        extra_headers: Option<&HeaderMap>,
    ) -> Result<Response, ScrapeError> {
        Self::ensure_https(url)?;

        retry_if(
            || self.send_once(url, extra_headers),
            self.config.max_attempts,
            self.config.retry_delay,
            |e: &ScrapeError| {
                let transient = e.is_transient();
                if transient {
                    log::warn!("Transient failure for {}: {}", url, e);
                }
                transient
            },
        )
        .await
    }

    /// Fetch a URL and return the response text
    pub async fn get_text(&self, url: &str) -> Result<String, ScrapeError> {
        let response = self.get_with_retry(url, None).await?;
        Ok(response.text().await?)
    }

    /// Fetch a URL with custom headers and return the response text
    pub async fn get_text_with_headers(
        &self,
        url: &str,
        headers: HeaderMap,
    ) -> Result<String, ScrapeError> {
        let response = self.get_with_retry(url, Some(&headers)).await?;
        Ok(response.text().await?)
    }

    /// Fetch a URL and decode its JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ScrapeError> {
        let mut headers = HeaderMap::new();
        headers.insert("Accept", HeaderValue::from_static("application/json"));
        let body = self.get_text_with_headers(url, headers).await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Get the underlying reqwest client for direct access
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }
}
