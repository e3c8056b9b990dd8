//! Multi-source fan-out
//!
//! Sources are queried in registry order, `concurrent_sources` at a time.
//! Batches run strictly one after another; inside a batch every source runs
//! concurrently and a failing source only loses its own results.

use crate::config::ScrapingConfig;
use crate::error::ScrapeError;
use crate::extract::{dedupe_urls, ImageProxy};
use crate::helpers::find_best_chapter_match;
use crate::metrics::{track_request, MetricsTracker};
use crate::models::{ChapterDescriptor, ChaptersResult, SearchCandidate};
use crate::sources::{Source, SourceRegistry};
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub concurrent_sources: usize,
    /// Query every batch instead of stopping at the first with results
    pub exhaustive: bool,
    pub source_timeout: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            concurrent_sources: 3,
            exhaustive: false,
            source_timeout: Duration::from_secs(90),
        }
    }
}

impl From<&ScrapingConfig> for AggregatorConfig {
    fn from(c: &ScrapingConfig) -> Self {
        Self {
            concurrent_sources: c.concurrent_sources.max(1),
            exhaustive: c.exhaustive_search,
            source_timeout: Duration::from_secs(c.source_timeout_secs.max(1)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub results: Vec<SearchCandidate>,
    /// Ids of the sources that contributed, in registry order
    pub sources: Vec<String>,
    /// Batches actually queried
    pub batches: usize,
    /// Sources that answered, with or without results
    pub answered: usize,
    /// Ids of the sources whose search failed
    pub failed: Vec<String>,
}

impl SearchOutcome {
    /// Every queried source failed, so "no results" means nothing
    pub fn all_failed(&self) -> bool {
        self.answered == 0 && !self.failed.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedChapters {
    pub source_id: String,
    pub result: ChaptersResult,
}

#[derive(Debug, Clone)]
pub struct ResolvedImages {
    pub source_id: String,
    pub chapter: ChapterDescriptor,
    pub images: Vec<String>,
}

pub struct Aggregator {
    registry: Arc<SourceRegistry>,
    metrics: Arc<MetricsTracker>,
    config: AggregatorConfig,
    proxy: ImageProxy,
}

impl Aggregator {
    pub fn new(
        registry: Arc<SourceRegistry>,
        metrics: Arc<MetricsTracker>,
        config: AggregatorConfig,
        proxy: ImageProxy,
    ) -> Self {
        Self {
            registry,
            metrics,
            config,
            proxy,
        }
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Bound `operation` by the per-source timeout and record its outcome
    async fn call<T, F>(
        &self,
        source: &dyn Source,
        op: &str,
        is_empty: impl FnOnce(&T) -> bool,
        operation: F,
    ) -> Result<T, ScrapeError>
    where
        F: Future<Output = Result<T, ScrapeError>>,
    {
        let limit = self.config.source_timeout;
        let bounded = async {
            match timeout(limit, operation).await {
                Ok(result) => result,
                Err(_) => Err(ScrapeError::Timeout(format!(
                    "{} {} exceeded {}s",
                    source.id(),
                    op,
                    limit.as_secs()
                ))),
            }
        };
        track_request(&self.metrics, source.id(), is_empty, bounded).await
    }

    /// Candidates from one source, best title match first
    async fn search_source(&self, source: Arc<dyn Source>, title: &str) -> Result<Vec<SearchCandidate>, ScrapeError> {
        let mut candidates = self
            .call(source.as_ref(), "search", |c: &Vec<SearchCandidate>| c.is_empty(), source.search_candidates(title))
            .await?;
        candidates.sort_by(|a, b| {
            b.similarity(title).total_cmp(&a.similarity(title))
        });
        Ok(candidates)
    }

    /// Fan a title search out over the enabled sources.
    ///
    /// Stops after the first batch that produced anything unless the
    /// aggregator is exhaustive. Errors only ever remove a source's results.
    pub async fn search_all_sources(&self, title: &str) -> SearchOutcome {
        let sources = self.registry.enabled();
        let start = Instant::now();
        let mut outcome = SearchOutcome::default();

        for batch in sources.chunks(self.config.concurrent_sources.max(1)) {
            outcome.batches += 1;
            let settled = join_all(
                batch
                    .iter()
                    .map(|source| self.search_source(source.clone(), title)),
            )
            .await;

            for (source, result) in batch.iter().zip(settled) {
                match result {
                    Ok(candidates) if !candidates.is_empty() => {
                        outcome.answered += 1;
                        outcome.sources.push(source.id().to_string());
                        outcome.results.extend(candidates);
                    }
                    Ok(_) => {
                        outcome.answered += 1;
                        log::debug!("[{}] No results for '{}'", source.id(), title)
                    }
                    Err(e) => {
                        log::warn!(
                            "[{}] Search failed for '{}' ({}): {}",
                            source.id(),
                            title,
                            e.kind(),
                            e
                        );
                        outcome.failed.push(source.id().to_string());
                    }
                }
            }

            if !outcome.results.is_empty() && !self.config.exhaustive {
                break;
            }
        }

        log::info!(
            "Search '{}': {} results from [{}] in {} batch(es), {} failed, {}ms",
            title,
            outcome.results.len(),
            outcome.sources.join(", "),
            outcome.batches,
            outcome.failed.len(),
            start.elapsed().as_millis()
        );
        outcome
    }

    /// Search one source for `title` and list its chapters
    async fn chapters_from(&self, source: &Arc<dyn Source>, title: &str) -> Result<ChaptersResult, ScrapeError> {
        let found = self
            .call(source.as_ref(), "search", |m: &Option<_>| m.is_none(), source.search(title))
            .await?;
        let Some(found) = found else {
            return Err(ScrapeError::NoContentFound(format!("'{}' not on {}", title, source.id())));
        };
        self.call(
            source.as_ref(),
            "chapters",
            |r: &ChaptersResult| r.is_empty(),
            source.get_chapters(&found.external_id, &found.url),
        )
        .await
    }

    /// First source, in registry order, that has `title` with a non-empty listing
    pub async fn resolve_chapters(&self, title: &str) -> Result<ResolvedChapters, ScrapeError> {
        for source in self.registry.enabled() {
            match self.chapters_from(&source, title).await {
                Ok(result) if !result.is_empty() => {
                    log::info!(
                        "[{}] {} chapters for '{}'",
                        source.id(),
                        result.total_chapters,
                        title
                    );
                    return Ok(ResolvedChapters {
                        source_id: source.id().to_string(),
                        result,
                    });
                }
                Ok(_) => log::debug!("[{}] Empty chapter list for '{}'", source.id(), title),
                Err(e) => log::warn!(
                    "[{}] Chapters unavailable for '{}' ({}): {}",
                    source.id(),
                    title,
                    e.kind(),
                    e
                ),
            }
        }
        Err(ScrapeError::NoContentFound(format!("no source lists chapters for '{}'", title)))
    }

    async fn images_from(&self, source: &Arc<dyn Source>, chapter: &ChapterDescriptor) -> Result<Vec<String>, ScrapeError> {
        let images = self
            .call(
                source.as_ref(),
                "images",
                |v: &Vec<String>| v.is_empty(),
                source.get_chapter_images(chapter),
            )
            .await?;
        Ok(dedupe_urls(images)
            .iter()
            .map(|u| self.proxy.rewrite(u))
            .collect())
    }

    /// Page images for `chapter_id` of `title`.
    ///
    /// The source that listed the chapter is tried first. When it fails or
    /// yields nothing, other sources are searched for the same title and the
    /// chapter is matched there by number.
    pub async fn resolve_images(
        &self,
        title: &str,
        chapters: &[ChapterDescriptor],
        chapter_id: &str,
    ) -> Result<ResolvedImages, ScrapeError> {
        let chapter = chapters
            .iter()
            .find(|c| c.id == chapter_id)
            .or_else(|| find_best_chapter_match(chapters, chapter_id))
            .cloned()
            .ok_or_else(|| {
                ScrapeError::NoContentFound(format!("chapter '{}' of '{}'", chapter_id, title))
            })?;

        if let Some(owner) = self
            .registry
            .get(&chapter.source)
            .filter(|_| self.registry.is_enabled(&chapter.source))
        {
            match self.images_from(&owner, &chapter).await {
                Ok(images) if !images.is_empty() => {
                    return Ok(ResolvedImages {
                        source_id: owner.id().to_string(),
                        chapter,
                        images,
                    })
                }
                Ok(_) => log::warn!("[{}] No images for chapter {}", owner.id(), chapter.chapter),
                Err(e) => log::warn!(
                    "[{}] Image extraction failed for chapter {} ({}): {}",
                    owner.id(),
                    chapter.chapter,
                    e.kind(),
                    e
                ),
            }
        }

        for source in self.registry.enabled() {
            if source.id() == chapter.source {
                continue;
            }
            let listing = match self.chapters_from(&source, title).await {
                Ok(listing) => listing,
                Err(e) => {
                    log::debug!("[{}] Fallback skipped: {}", source.id(), e);
                    continue;
                }
            };
            let Some(candidate) = find_best_chapter_match(&listing.chapters, &chapter.chapter) else {
                log::debug!("[{}] No chapter matching {}", source.id(), chapter.chapter);
                continue;
            };
            match self.images_from(&source, candidate).await {
                Ok(images) if !images.is_empty() => {
                    log::info!(
                        "[{}] Fallback served chapter {} of '{}'",
                        source.id(),
                        chapter.chapter,
                        title
                    );
                    return Ok(ResolvedImages {
                        source_id: source.id().to_string(),
                        chapter: candidate.clone(),
                        images,
                    });
                }
                Ok(_) => {}
                Err(e) => log::warn!("[{}] Fallback images failed: {}", source.id(), e),
            }
        }

        Err(ScrapeError::NoContentFound(format!(
            "no images for chapter {} of '{}'",
            chapter.chapter, title
        )))
    }
}
