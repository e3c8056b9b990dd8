//! Error taxonomy for the scraping engine
//!
//! `ScrapeError` is what components return internally. `ApiError` is the only
//! thing that crosses the service boundary: a status, a stable code and a
//! generic message. Diagnostic detail stays in the logs.

use crate::browser::BrowserError;
use crate::http_client::EnhancedHttpClient;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    #[error("Rate limit exceeded for client {0}")]
    RateLimitExceeded(String),

    #[error("Request queue is full ({0} tasks pending)")]
    QueueFull(usize),

    #[error("Challenge unresolved for {url} after {attempts} attempts")]
    ChallengeUnresolved { url: String, attempts: u32 },

    #[error("No content found: {0}")]
    NoContentFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("HTTP status {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error(transparent)]
    Browser(#[from] BrowserError),
}

impl ScrapeError {
    /// Whether a retry has a chance of succeeding
    pub fn is_transient(&self) -> bool {
        match self {
            ScrapeError::TransientNetwork(_) | ScrapeError::Timeout(_) => true,
            ScrapeError::HttpStatus { status, .. } => reqwest::StatusCode::from_u16(*status)
                .map(EnhancedHttpClient::is_retryable_status)
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Short label used in metrics and structured log lines
    pub fn kind(&self) -> &'static str {
        match self {
            ScrapeError::TransientNetwork(_) => "transient_network",
            ScrapeError::RateLimitExceeded(_) => "rate_limit",
            ScrapeError::QueueFull(_) => "queue_full",
            ScrapeError::ChallengeUnresolved { .. } => "challenge",
            ScrapeError::NoContentFound(_) => "no_content",
            ScrapeError::InvalidInput(_) => "invalid_input",
            ScrapeError::HttpStatus { .. } => "http_status",
            ScrapeError::Parse(_) => "parse",
            ScrapeError::Timeout(_) => "timeout",
            ScrapeError::Browser(_) => "browser",
        }
    }
}

impl From<reqwest::Error> for ScrapeError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return ScrapeError::HttpStatus {
                status: status.as_u16(),
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
            };
        }
        if e.is_timeout() {
            ScrapeError::Timeout(e.to_string())
        } else if e.is_decode() {
            ScrapeError::Parse(e.to_string())
        } else if e.is_builder() {
            ScrapeError::InvalidInput(e.to_string())
        } else {
            ScrapeError::TransientNetwork(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ScrapeError {
    fn from(e: serde_json::Error) -> Self {
        ScrapeError::Parse(e.to_string())
    }
}

/// Error shape returned to callers of the service boundary
#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    #[serde(skip)]
    pub status: u16,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: u16, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl From<&ScrapeError> for ApiError {
    fn from(e: &ScrapeError) -> Self {
        match e {
            ScrapeError::RateLimitExceeded(_) => {
                ApiError::new(429, "rate_limited", "Too many requests, please slow down")
            }
            ScrapeError::QueueFull(_) => {
                ApiError::new(503, "queue_full", "Server is busy, please try again later")
            }
            ScrapeError::InvalidInput(_) => {
                ApiError::new(400, "invalid_input", "Invalid request parameters")
            }
            ScrapeError::NoContentFound(_) => {
                ApiError::new(404, "not_found", "No content found for this request")
            }
            _ => ApiError::new(502, "upstream_failed", "Failed to fetch data from sources"),
        }
    }
}

impl From<ScrapeError> for ApiError {
    fn from(e: ScrapeError) -> Self {
        ApiError::from(&e)
    }
}
