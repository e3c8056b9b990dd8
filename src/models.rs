use chrono::{DateTime, Utc};
use crate::helpers::title_similarity;
use serde::{Deserialize, Serialize};

/// How a source is reached
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Structured JSON API over HTTPS
    Api,
    /// HTML pages needing a rendering worker and challenge bypass
    Rendered,
}

/// Static description of a registered provider
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceDescriptor {
    /// Stable lowercase identifier, e.g. `mangadex`
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub adult: bool,
    pub kind: SourceKind,
}

/// One provider's match for a search query
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchCandidate {
    pub source_id: String,
    pub title: String,
    pub external_id: String,
    pub url: String,
    pub cover_url: Option<String>,
    /// Other names the provider lists for the same title
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alt_titles: Vec<String>,
}

impl SearchCandidate {
    /// Best token-overlap score of `query` against the title or any alt title
    pub fn similarity(&self, query: &str) -> f64 {
        self.alt_titles
            .iter()
            .map(|alt| title_similarity(query, alt))
            .fold(title_similarity(query, &self.title), f64::max)
    }
}

/// Result of `Source::search`: where the title lives on that source
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SearchMatch {
    pub external_id: String,
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChapterDescriptor {
    pub id: String,
    /// Chapter label as shown by the source, usually the number ("12.5")
    pub chapter: String,
    pub title: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub url: String,
    /// Source id that produced this chapter
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Provenance of a chapter listing
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    pub name: String,
    pub url: String,
    pub title_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChaptersResult {
    pub chapters: Vec<ChapterDescriptor>,
    pub total_chapters: usize,
    pub source: SourceRef,
}

impl ChaptersResult {
    /// Build a listing, dropping chapters whose id was already seen
    pub fn new(chapters: Vec<ChapterDescriptor>, source: SourceRef) -> Self {
        let mut seen = std::collections::HashSet::new();
        let chapters: Vec<ChapterDescriptor> = chapters
            .into_iter()
            .filter(|c| seen.insert(c.id.clone()))
            .collect();
        Self {
            total_chapters: chapters.len(),
            chapters,
            source,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chapters.is_empty()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaginationInfo {
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub total_pages: usize,
    pub has_more: bool,
}

impl PaginationInfo {
    pub fn new(page: usize, limit: usize, total: usize) -> Self {
        let limit = limit.max(1);
        let total_pages = total.div_ceil(limit);
        Self {
            page,
            limit,
            total,
            total_pages,
            has_more: page < total_pages,
        }
    }
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SearchMetadata {
    pub total_results: usize,
    /// Source ids that contributed results
    pub source: String,
    pub cached: bool,
    pub execution_time_ms: u64,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub success: bool,
    pub results: Vec<SearchCandidate>,
    pub metadata: SearchMetadata,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ChapterPage {
    pub chapters: Vec<ChapterDescriptor>,
    pub pagination: PaginationInfo,
    pub source: SourceRef,
    pub cached: bool,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ChapterImagesResponse {
    pub chapter_id: String,
    pub images: Vec<String>,
    pub source: String,
    pub scraping_time_ms: u64,
    pub cached: bool,
}
