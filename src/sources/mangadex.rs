use super::Source;
use crate::error::ScrapeError;
use crate::http_client::EnhancedHttpClient;
use crate::models::{
    ChapterDescriptor, ChaptersResult, SearchCandidate, SourceDescriptor, SourceKind, SourceRef,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

pub const BASE_URL: &str = "https://api.mangadex.org";
pub const SITE_URL: &str = "https://mangadex.org";
const COVER_BASE: &str = "https://uploads.mangadex.org/covers";
const FEED_PAGE_SIZE: usize = 100;
const SEARCH_LIMIT: usize = 20;
// The feed endpoint refuses offsets past 10k
const MAX_FEED_OFFSET: usize = 10_000;

static UUID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("valid regex")
});

#[derive(Deserialize)]
struct MangaList {
    data: Vec<MangaData>,
}

#[derive(Deserialize)]
struct MangaData {
    id: String,
    attributes: MangaAttributes,
    #[serde(default)]
    relationships: Vec<Relationship>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MangaAttributes {
    #[serde(default)]
    title: HashMap<String, String>,
    #[serde(default)]
    alt_titles: Vec<HashMap<String, String>>,
}

#[derive(Deserialize)]
struct Relationship {
    #[serde(rename = "type")]
    rel_type: String,
    attributes: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ChapterFeed {
    data: Vec<ChapterData>,
    #[serde(default)]
    total: usize,
}

#[derive(Deserialize)]
struct ChapterData {
    id: String,
    attributes: ChapterAttributes,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChapterAttributes {
    chapter: Option<String>,
    title: Option<String>,
    publish_at: Option<String>,
    translated_language: Option<String>,
    #[serde(default)]
    external_url: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AtHomeResponse {
    base_url: String,
    chapter: AtHomeChapter,
}

#[derive(Deserialize)]
struct AtHomeChapter {
    hash: String,
    data: Vec<String>,
}

/// Whether `id` looks like a MangaDex UUID
pub fn is_valid_id(id: &str) -> bool {
    UUID.is_match(id)
}

/// Preferred display title: English first, then any, then the first English alt title
fn display_title(attributes: &MangaAttributes) -> Option<String> {
    attributes
        .title
        .get("en")
        .or_else(|| attributes.title.values().next())
        .or_else(|| attributes.alt_titles.iter().find_map(|alt| alt.get("en")))
        .filter(|t| !t.trim().is_empty())
        .cloned()
}

/// Map a `/manga` search body into candidates
pub fn parse_search_response(body: &str, source_id: &str) -> Result<Vec<SearchCandidate>, ScrapeError> {
    let list: MangaList = serde_json::from_str(body)?;
    let mut candidates = Vec::new();

    for manga in list.data {
        let Some(title) = display_title(&manga.attributes) else {
            continue;
        };
        let cover_url = manga
            .relationships
            .iter()
            .find(|r| r.rel_type == "cover_art")
            .and_then(|r| r.attributes.as_ref())
            .and_then(|attrs| attrs.get("fileName"))
            .and_then(|f| f.as_str())
            .map(|file| format!("{}/{}/{}", COVER_BASE, manga.id, file));

        let mut alt_titles: Vec<String> = Vec::new();
        for alt in manga.attributes.alt_titles.iter().filter_map(|alt| alt.get("en")) {
            if *alt != title && !alt_titles.contains(alt) {
                alt_titles.push(alt.clone());
            }
        }
        candidates.push(SearchCandidate {
            source_id: source_id.to_string(),
            url: format!("{}/title/{}", SITE_URL, manga.id),
            external_id: manga.id,
            title,
            cover_url,
            alt_titles,
        });
    }

    Ok(candidates)
}

/// One page of the chapter feed. Returns the chapters and the feed total.
/// Chapters hosted externally have no images here and are skipped.
pub fn parse_feed_page(body: &str, source_id: &str) -> Result<(Vec<ChapterDescriptor>, usize), ScrapeError> {
    let feed: ChapterFeed = serde_json::from_str(body)?;
    let chapters = feed
        .data
        .into_iter()
        .filter(|c| c.attributes.external_url.is_none())
        .map(|c| {
            let published_at = c
                .attributes
                .publish_at
                .as_deref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|d| d.with_timezone(&Utc));
            ChapterDescriptor {
                url: format!("{}/chapter/{}", SITE_URL, c.id),
                chapter: c.attributes.chapter.unwrap_or_else(|| "0".to_string()),
                title: c.attributes.title.filter(|t| !t.is_empty()),
                published_at,
                source: source_id.to_string(),
                language: c.attributes.translated_language,
                id: c.id,
            }
        })
        .collect();
    Ok((chapters, feed.total))
}

/// Full-quality image URLs from an at-home server response
pub fn parse_at_home(body: &str) -> Result<Vec<String>, ScrapeError> {
    let at_home: AtHomeResponse = serde_json::from_str(body)?;
    let base = at_home.base_url.trim_end_matches('/');
    Ok(at_home
        .chapter
        .data
        .iter()
        .map(|file| format!("{}/data/{}/{}", base, at_home.chapter.hash, file))
        .collect())
}

/// MangaDex public API
pub struct MangaDexSource {
    descriptor: SourceDescriptor,
    http: Arc<EnhancedHttpClient>,
    api_base: String,
}

impl MangaDexSource {
    pub fn new(http: Arc<EnhancedHttpClient>) -> Self {
        Self::with_api_base(http, BASE_URL)
    }

    pub fn with_api_base(http: Arc<EnhancedHttpClient>, api_base: &str) -> Self {
        Self {
            descriptor: SourceDescriptor {
                id: "mangadex".to_string(),
                name: "MangaDex".to_string(),
                base_url: SITE_URL.to_string(),
                adult: false,
                kind: SourceKind::Api,
            },
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    fn search_url(&self, title: &str) -> String {
        format!(
            "{}/manga?title={}&limit={}&includes[]=cover_art",
            self.api_base,
            urlencoding::encode(title),
            SEARCH_LIMIT
        )
    }

    fn feed_url(&self, manga_id: &str, offset: usize) -> String {
        format!(
            "{}/manga/{}/feed?translatedLanguage[]=en&limit={}&offset={}&order[chapter]=asc",
            self.api_base, manga_id, FEED_PAGE_SIZE, offset
        )
    }
}

#[async_trait]
impl Source for MangaDexSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn search_candidates(&self, title: &str) -> Result<Vec<SearchCandidate>, ScrapeError> {
        let body = self.http.get_text(&self.search_url(title)).await?;
        let candidates = parse_search_response(&body, self.id())?;
        log::debug!("[mangadex] {} candidates for '{}'", candidates.len(), title);
        Ok(candidates)
    }

    async fn get_chapters(&self, external_id: &str, url: &str) -> Result<ChaptersResult, ScrapeError> {
        if !is_valid_id(external_id) {
            return Err(ScrapeError::InvalidInput(format!(
                "not a MangaDex id: {}",
                external_id
            )));
        }

        let mut chapters = Vec::new();
        let mut offset = 0;
        loop {
            let body = self.http.get_text(&self.feed_url(external_id, offset)).await?;
            let (page, total) = parse_feed_page(&body, self.id())?;
            let fetched = page.len();
            chapters.extend(page);
            offset += FEED_PAGE_SIZE;
            if fetched == 0 || offset >= total || offset >= MAX_FEED_OFFSET {
                break;
            }
        }

        log::info!("[mangadex] {} chapters for {}", chapters.len(), external_id);
        Ok(ChaptersResult::new(
            chapters,
            SourceRef {
                name: self.descriptor.name.clone(),
                url: url.to_string(),
                title_id: external_id.to_string(),
            },
        ))
    }

    async fn get_chapter_images(&self, chapter: &ChapterDescriptor) -> Result<Vec<String>, ScrapeError> {
        if !is_valid_id(&chapter.id) {
            return Err(ScrapeError::InvalidInput(format!(
                "not a MangaDex chapter id: {}",
                chapter.id
            )));
        }
        let body = self
            .http
            .get_text(&format!("{}/at-home/server/{}", self.api_base, chapter.id))
            .await?;
        parse_at_home(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANGA_ID: &str = "32d76d19-8a05-4db0-9fc2-e0b0648fe9d0";

    #[test]
    fn test_is_valid_id() {
        assert!(is_valid_id(MANGA_ID));
        assert!(!is_valid_id("solo-leveling"));
        assert!(!is_valid_id(""));
    }

    #[test]
    fn test_parse_search_response() {
        let body = serde_json::json!({
            "result": "ok",
            "data": [{
                "id": MANGA_ID,
                "attributes": {
                    "title": {"en": "Solo Leveling"},
                    "altTitles": [
                        {"ko": "나 혼자만 레벨업"},
                        {"en": "Only I Level Up"},
                        {"en": "Solo Leveling"},
                        {"en": "I Alone Level Up"}
                    ]
                },
                "relationships": [
                    {"id": "x", "type": "author"},
                    {"id": "y", "type": "cover_art", "attributes": {"fileName": "cover.jpg"}}
                ]
            }, {
                "id": "no-title",
                "attributes": {"title": {}, "altTitles": []}
            }]
        })
        .to_string();

        let candidates = parse_search_response(&body, "mangadex").unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].title, "Solo Leveling");
        assert_eq!(candidates[0].alt_titles, vec!["Only I Level Up", "I Alone Level Up"]);
        assert_eq!(candidates[0].external_id, MANGA_ID);
        assert_eq!(
            candidates[0].cover_url.as_deref(),
            Some("https://uploads.mangadex.org/covers/32d76d19-8a05-4db0-9fc2-e0b0648fe9d0/cover.jpg")
        );
    }

    #[test]
    fn test_alt_title_matches_single_candidate() {
        let body = serde_json::json!({
            "data": [{
                "id": MANGA_ID,
                "attributes": {
                    "title": {"ja-ro": "Ore dake Level Up na Ken"},
                    "altTitles": [{"en": "Solo Leveling"}]
                }
            }]
        })
        .to_string();

        let candidates = parse_search_response(&body, "mangadex").unwrap();
        assert_eq!(candidates.len(), 1);
        let found = crate::sources::best_match("solo leveling", &candidates, 0.5).unwrap();
        assert_eq!(found.external_id, MANGA_ID);
    }

    #[test]
    fn test_parse_feed_page() {
        let body = serde_json::json!({
            "data": [
                {"id": "c1", "attributes": {"chapter": "1", "title": "", "publishAt": "2023-01-05T10:00:00+00:00", "translatedLanguage": "en"}},
                {"id": "c2", "attributes": {"chapter": null, "title": "Oneshot", "publishAt": null, "translatedLanguage": "en"}},
                {"id": "c3", "attributes": {"chapter": "2", "externalUrl": "https://elsewhere.com/2"}}
            ],
            "total": 250
        })
        .to_string();

        let (chapters, total) = parse_feed_page(&body, "mangadex").unwrap();
        assert_eq!(total, 250);
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].chapter, "1");
        assert_eq!(chapters[0].title, None);
        assert_eq!(chapters[0].url, "https://mangadex.org/chapter/c1");
        assert!(chapters[0].published_at.is_some());
        assert_eq!(chapters[1].chapter, "0");
        assert_eq!(chapters[1].language.as_deref(), Some("en"));
    }

    #[test]
    fn test_parse_at_home() {
        let body = r#"{"result":"ok","baseUrl":"https://uploads.mangadex.org/","chapter":{"hash":"abc","data":["1.png","2.png"],"dataSaver":[]}}"#;
        let urls = parse_at_home(body).unwrap();
        assert_eq!(
            urls,
            vec![
                "https://uploads.mangadex.org/data/abc/1.png",
                "https://uploads.mangadex.org/data/abc/2.png"
            ]
        );
    }

    #[test]
    fn test_malformed_body_is_parse_error() {
        assert!(matches!(
            parse_search_response("<html>", "mangadex"),
            Err(ScrapeError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_id_rejected_without_io() {
        let source = MangaDexSource::new(Arc::new(EnhancedHttpClient::new().unwrap()));
        let err = source.get_chapters("not-an-id", "").await.unwrap_err();
        assert!(matches!(err, ScrapeError::InvalidInput(_)));
    }
}
