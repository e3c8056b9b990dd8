//! Boundary operations: rate limit, validate, serve from cache, queue, fan out
//!
//! Every failure is logged here with its context and then collapsed into an
//! [`ApiError`], so nothing below this layer leaks to callers.

use crate::aggregator::{Aggregator, ResolvedChapters};
use crate::cache::TtlCache;
use crate::config::Config;
use crate::error::{ApiError, ScrapeError};
use crate::helpers::normalize_title;
use crate::metrics::{MetricsTracker, SourceMetrics};
use crate::models::{
    ChapterImagesResponse, ChapterPage, PaginationInfo, SearchCandidate, SearchMetadata,
    SearchResponse, SourceDescriptor,
};
use crate::queue::{QueueStats, RequestQueue};
use crate::rate_limiter::RateLimiter;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub const MAX_QUERY_LEN: usize = 200;
pub const MAX_CHAPTER_ID_LEN: usize = 100;
pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone)]
struct CachedSearch {
    results: Vec<SearchCandidate>,
    sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatus {
    #[serde(flatten)]
    pub descriptor: SourceDescriptor,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: &'static str,
    pub sources: Vec<SourceStatus>,
    pub queue: QueueStats,
}

/// Reject empty, oversized or control-character input before any external call
fn validate_text(field: &str, value: &str, max_len: usize) -> Result<String, ScrapeError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ScrapeError::InvalidInput(format!("{} is empty", field)));
    }
    if trimmed.chars().count() > max_len {
        return Err(ScrapeError::InvalidInput(format!(
            "{} longer than {} characters",
            field, max_len
        )));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(ScrapeError::InvalidInput(format!("{} contains control characters", field)));
    }
    Ok(trimmed.to_string())
}

fn validate_pagination(page: usize, limit: usize) -> Result<(usize, usize), ScrapeError> {
    if page == 0 {
        return Err(ScrapeError::InvalidInput("page starts at 1".into()));
    }
    if limit == 0 || limit > MAX_PAGE_SIZE {
        return Err(ScrapeError::InvalidInput(format!(
            "limit must be between 1 and {}",
            MAX_PAGE_SIZE
        )));
    }
    Ok((page, limit))
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

pub struct ScraperService {
    aggregator: Arc<Aggregator>,
    metrics: Arc<MetricsTracker>,
    rate_limiter: RateLimiter,
    queue: RequestQueue,
    search_cache: TtlCache<CachedSearch>,
    chapters_cache: TtlCache<ResolvedChapters>,
    images_cache: TtlCache<ChapterImagesResponse>,
}

impl ScraperService {
    pub fn new(aggregator: Arc<Aggregator>, metrics: Arc<MetricsTracker>, config: &Config) -> Self {
        Self {
            aggregator,
            metrics,
            rate_limiter: RateLimiter::new(
                config.scraping.rate_limit_requests,
                config.rate_limit_window(),
            ),
            queue: RequestQueue::new(
                config.scraping.max_concurrent_scrapes,
                config.scraping.max_queue_size,
            ),
            search_cache: TtlCache::new("search", Duration::from_secs(config.cache.search_ttl_secs)),
            chapters_cache: TtlCache::new(
                "chapters",
                Duration::from_secs(config.cache.chapters_ttl_secs),
            ),
            images_cache: TtlCache::new("images", Duration::from_secs(config.cache.images_ttl_secs)),
        }
    }

    fn admit(&self, client: &str) -> Result<(), ScrapeError> {
        if self.rate_limiter.can_make_request(client) {
            Ok(())
        } else {
            Err(ScrapeError::RateLimitExceeded(client.to_string()))
        }
    }

    /// Log `err` with its context, then hide the detail
    fn fail(&self, op: &str, context: &str, client: &str, start: Instant, err: ScrapeError) -> ApiError {
        let api = ApiError::from(&err);
        match &err {
            ScrapeError::RateLimitExceeded(_) | ScrapeError::QueueFull(_) | ScrapeError::InvalidInput(_) => {
                log::warn!(
                    "{} rejected for {} [{}]: {} ({}ms)",
                    op,
                    client,
                    context,
                    err,
                    elapsed_ms(start)
                )
            }
            _ => log::error!(
                "{} failed for {} [{}] ({}): {} ({}ms)",
                op,
                client,
                context,
                err.kind(),
                err,
                elapsed_ms(start)
            ),
        }
        api
    }

    pub async fn search(&self, client: &str, query: &str, bypass_cache: bool) -> Result<SearchResponse, ApiError> {
        let start = Instant::now();
        self.search_inner(client, query, bypass_cache, start)
            .await
            .map_err(|e| self.fail("search", query, client, start, e))
    }

    async fn search_inner(
        &self,
        client: &str,
        query: &str,
        bypass_cache: bool,
        start: Instant,
    ) -> Result<SearchResponse, ScrapeError> {
        self.admit(client)?;
        let query = validate_text("query", query, MAX_QUERY_LEN)?;
        let key = normalize_title(&query);

        let cached = if bypass_cache { None } else { self.search_cache.get(&key) };
        let (found, cached) = match cached {
            Some(hit) => (hit, true),
            None => {
                let aggregator = self.aggregator.clone();
                let q = query.clone();
                let outcome = self
                    .queue
                    .run(async move { Ok(aggregator.search_all_sources(&q).await) })
                    .await?;
                if outcome.all_failed() {
                    return Err(ScrapeError::TransientNetwork(format!(
                        "all {} queried sources failed: {}",
                        outcome.failed.len(),
                        outcome.failed.join(", ")
                    )));
                }
                let found = CachedSearch {
                    results: outcome.results,
                    sources: outcome.sources,
                };
                if !found.results.is_empty() {
                    self.search_cache.set(key, found.clone());
                }
                (found, false)
            }
        };

        Ok(SearchResponse {
            success: true,
            metadata: SearchMetadata {
                total_results: found.results.len(),
                source: found.sources.join(","),
                cached,
                execution_time_ms: elapsed_ms(start),
            },
            results: found.results,
        })
    }

    /// Cached chapter listing for `title`, resolving through the queue on a miss
    async fn load_chapters(&self, title: &str) -> Result<(ResolvedChapters, bool), ScrapeError> {
        let key = normalize_title(title);
        if let Some(hit) = self.chapters_cache.get(&key) {
            return Ok((hit, true));
        }

        let aggregator = self.aggregator.clone();
        let t = title.to_string();
        let resolved = self
            .queue
            .run(async move { aggregator.resolve_chapters(&t).await })
            .await?;
        self.chapters_cache.set(key, resolved.clone());
        Ok((resolved, false))
    }

    pub async fn chapters(
        &self,
        client: &str,
        title: &str,
        page: usize,
        limit: usize,
    ) -> Result<ChapterPage, ApiError> {
        let start = Instant::now();
        self.chapters_inner(client, title, page, limit)
            .await
            .map_err(|e| self.fail("chapters", title, client, start, e))
    }

    async fn chapters_inner(
        &self,
        client: &str,
        title: &str,
        page: usize,
        limit: usize,
    ) -> Result<ChapterPage, ScrapeError> {
        self.admit(client)?;
        let title = validate_text("title", title, MAX_QUERY_LEN)?;
        let (page, limit) = validate_pagination(page, limit)?;

        let (resolved, cached) = self.load_chapters(&title).await?;
        let all = &resolved.result.chapters;
        let pagination = PaginationInfo::new(page, limit, all.len());
        let chapters = all
            .iter()
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .cloned()
            .collect();

        Ok(ChapterPage {
            chapters,
            pagination,
            source: resolved.result.source.clone(),
            cached,
        })
    }

    pub async fn chapter_images(
        &self,
        client: &str,
        title: &str,
        chapter_id: &str,
    ) -> Result<ChapterImagesResponse, ApiError> {
        let start = Instant::now();
        let context = format!("{} / {}", title, chapter_id);
        self.chapter_images_inner(client, title, chapter_id, start)
            .await
            .map_err(|e| self.fail("chapter_images", &context, client, start, e))
    }

    async fn chapter_images_inner(
        &self,
        client: &str,
        title: &str,
        chapter_id: &str,
        start: Instant,
    ) -> Result<ChapterImagesResponse, ScrapeError> {
        self.admit(client)?;
        let title = validate_text("title", title, MAX_QUERY_LEN)?;
        let chapter_id = validate_text("chapter", chapter_id, MAX_CHAPTER_ID_LEN)?;

        let key = format!("{}:{}", normalize_title(&title), chapter_id);
        if let Some(mut hit) = self.images_cache.get(&key) {
            hit.cached = true;
            return Ok(hit);
        }

        let (resolved, _) = self.load_chapters(&title).await?;
        let aggregator = self.aggregator.clone();
        let (t, c) = (title.clone(), chapter_id.clone());
        let images = self
            .queue
            .run(async move {
                aggregator
                    .resolve_images(&t, &resolved.result.chapters, &c)
                    .await
            })
            .await?;

        let response = ChapterImagesResponse {
            chapter_id,
            images: images.images,
            source: images.source_id,
            scraping_time_ms: elapsed_ms(start),
            cached: false,
        };
        self.images_cache.set(key, response.clone());
        Ok(response)
    }

    pub fn metrics(&self) -> Vec<SourceMetrics> {
        self.metrics.get_all_metrics()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            status: "ok",
            sources: self
                .aggregator
                .registry()
                .descriptors()
                .into_iter()
                .map(|(descriptor, enabled)| SourceStatus { descriptor, enabled })
                .collect(),
            queue: self.queue.stats(),
        }
    }

    /// Drop expired cache entries and idle rate-limit windows
    pub fn housekeeping(&self) {
        let purged = self.search_cache.purge_expired()
            + self.chapters_cache.purge_expired()
            + self.images_cache.purge_expired();
        let idle = self.rate_limiter.prune_idle();
        if purged > 0 || idle > 0 {
            log::debug!("Housekeeping: {} cache entries, {} idle clients", purged, idle);
        }
    }
}
