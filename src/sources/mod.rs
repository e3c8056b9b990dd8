//! Source adapters
//!
//! Every provider implements [`Source`]. API-backed sources talk JSON over
//! the retrying HTTP client; render-backed sources go through a
//! [`render::RenderContext`] (browser pool, bypass navigator, image
//! extractor).

pub mod mangadex;
pub mod registry;
pub mod render;
pub mod webtoon;
pub mod wp_manga;

pub use registry::SourceRegistry;
pub use render::RenderContext;

use crate::error::ScrapeError;
use crate::models::{ChapterDescriptor, ChaptersResult, SearchCandidate, SearchMatch, SourceDescriptor};
use async_trait::async_trait;

/// Minimum token-overlap score for a candidate to count as the searched title
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.5;

#[async_trait]
pub trait Source: Send + Sync {
    fn descriptor(&self) -> &SourceDescriptor;

    fn id(&self) -> &str {
        &self.descriptor().id
    }

    fn match_threshold(&self) -> f64 {
        DEFAULT_MATCH_THRESHOLD
    }

    /// Every listing the provider returns for `title`, best effort
    async fn search_candidates(&self, title: &str) -> Result<Vec<SearchCandidate>, ScrapeError>;

    /// Where `title` lives on this source, if it scores above the threshold
    async fn search(&self, title: &str) -> Result<Option<SearchMatch>, ScrapeError> {
        let candidates = self.search_candidates(title).await?;
        Ok(best_match(title, &candidates, self.match_threshold()))
    }

    async fn get_chapters(&self, external_id: &str, url: &str) -> Result<ChaptersResult, ScrapeError>;

    /// Ordered page image URLs of one chapter; empty means extraction failed
    async fn get_chapter_images(&self, chapter: &ChapterDescriptor) -> Result<Vec<String>, ScrapeError>;
}

/// Highest-scoring candidate at or above `threshold`; earlier candidates win ties
pub fn best_match(query: &str, candidates: &[SearchCandidate], threshold: f64) -> Option<SearchMatch> {
    let mut best: Option<(f64, &SearchCandidate)> = None;
    for candidate in candidates {
        let score = candidate.similarity(query);
        if score >= threshold && best.map_or(true, |(b, _)| score > b) {
            best = Some((score, candidate));
        }
    }
    best.map(|(score, c)| {
        log::debug!("[{}] Best match for '{}': '{}' ({:.2})", c.source_id, query, c.title, score);
        SearchMatch {
            external_id: c.external_id.clone(),
            url: c.url.clone(),
        }
    })
}

/// Last non-empty path segment of a URL, used as a stable id for HTML sources
pub fn slug_from_url(url: &str) -> Option<String> {
    let without_query = url.split(['?', '#']).next().unwrap_or_default();
    without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty() && !s.contains(':'))
        .map(str::to_string)
}
