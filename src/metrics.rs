//! Per-source outcome metrics
//!
//! Every source call made by the aggregator goes through [`track_request`],
//! which records latency and classifies the outcome. The boundary exposes a
//! read-only snapshot.

use crate::error::ScrapeError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMetrics {
    pub source: String,
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    /// Successful calls that returned nothing
    pub empty_results: u64,
    pub challenges: u64,
    pub rate_limited: u64,
    pub timeouts: u64,
    pub avg_latency_ms: f64,
    #[serde(skip)]
    total_latency_ms: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    /// Kind of the most recent failure, e.g. `challenge`
    pub last_error: Option<String>,
}

impl SourceMetrics {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }

    /// Percentage of calls that returned without error
    pub fn success_rate(&self) -> f64 {
        match self.requests {
            0 => 0.0,
            n => self.successes as f64 * 100.0 / n as f64,
        }
    }

    pub fn record_success(&mut self, latency: Duration, empty: bool) {
        self.requests += 1;
        self.successes += 1;
        self.empty_results += u64::from(empty);
        self.last_success = Some(Utc::now());

        self.total_latency_ms += latency.as_millis() as u64;
        self.avg_latency_ms = self.total_latency_ms as f64 / self.successes as f64;
    }

    pub fn record_failure(&mut self, error: &ScrapeError) {
        self.requests += 1;
        self.failures += 1;
        self.last_failure = Some(Utc::now());
        self.last_error = Some(error.kind().to_string());

        let bucket = match error {
            ScrapeError::ChallengeUnresolved { .. } => &mut self.challenges,
            ScrapeError::Timeout(_) => &mut self.timeouts,
            ScrapeError::HttpStatus { status: 429, .. } | ScrapeError::RateLimitExceeded(_) => {
                &mut self.rate_limited
            }
            _ => return,
        };
        *bucket += 1;
    }
}

/// Metrics for every source, keyed by source id
#[derive(Default)]
pub struct MetricsTracker {
    sources: Mutex<HashMap<String, SourceMetrics>>,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn update<R>(&self, source: &str, f: impl FnOnce(&mut SourceMetrics) -> R) -> R {
        let mut sources = self.sources.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = sources
            .entry(source.to_string())
            .or_insert_with(|| SourceMetrics::new(source));
        f(entry)
    }

    pub fn record_success(&self, source: &str, latency: Duration, empty: bool) {
        let rate = self.update(source, |m| {
            m.record_success(latency, empty);
            m.success_rate()
        });
        log::debug!(
            "[{}] ok in {}ms{} ({:.1}% success)",
            source,
            latency.as_millis(),
            if empty { ", empty" } else { "" },
            rate
        );
    }

    pub fn record_failure(&self, source: &str, error: &ScrapeError) {
        let rate = self.update(source, |m| {
            m.record_failure(error);
            m.success_rate()
        });
        log::warn!(
            "[{}] {} failure: {} ({:.1}% success)",
            source,
            error.kind(),
            error,
            rate
        );
    }

    pub fn get_metrics(&self, source: &str) -> Option<SourceMetrics> {
        let sources = self.sources.lock().unwrap_or_else(PoisonError::into_inner);
        sources.get(source).cloned()
    }

    /// Snapshot of every source, best success rate first
    pub fn get_all_metrics(&self) -> Vec<SourceMetrics> {
        let sources = self.sources.lock().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<SourceMetrics> = sources.values().cloned().collect();
        all.sort_by(|a, b| {
            b.success_rate()
                .total_cmp(&a.success_rate())
                .then_with(|| a.source.cmp(&b.source))
        });
        all
    }
}

/// Time `operation` and record its outcome for `source`.
///
/// `is_empty` decides whether a successful result counts as empty.
pub async fn track_request<F, T>(
    tracker: &MetricsTracker,
    source: &str,
    is_empty: impl FnOnce(&T) -> bool,
    operation: F,
) -> Result<T, ScrapeError>
where
    F: Future<Output = Result<T, ScrapeError>>,
{
    let start = Instant::now();
    let result = operation.await;
    let latency = start.elapsed();

    match &result {
        Ok(value) => tracker.record_success(source, latency, is_empty(value)),
        Err(e) => tracker.record_failure(source, e),
    }
    result
}
