//! WordPress manga themes (Madara and MangaStream)
//!
//! Dozens of scanlation sites run one of two WordPress themes, so one adapter
//! type serves all of them, configured per site by a [`WpSiteConfig`].
//! Listings are parsed from serialized HTML with `scraper`; selectors are
//! tried in priority order and the first one yielding items wins.

use super::{slug_from_url, RenderContext, Source};
use crate::error::ScrapeError;
use crate::extract::{LayoutRule, DEFAULT_LAZY_ATTRIBUTES};
use crate::helpers::{absolute_url, clean_title, extract_number, parse_listing_date};
use crate::models::{
    ChapterDescriptor, ChaptersResult, SearchCandidate, SourceDescriptor, SourceKind, SourceRef,
};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::Arc;

/// (result container, title link) pairs, most specific first
pub const SEARCH_RESULT_PATTERNS: &[(&str, &str)] = &[
    ("div.c-tabs-item__content", "div.post-title a"),
    ("div.page-item-detail", "h3 > a"),
    ("div.page-listing-item", "h3 a"),
    ("div.listupd .bs .bsx", "a"),
    ("div.bsx", "a"),
    ("div.utao .uta .imgu", "a"),
    ("article.bs", "a"),
];

/// (chapter item, link) pairs, most specific first
pub const CHAPTER_ITEM_PATTERNS: &[(&str, &str)] = &[
    ("li.wp-manga-chapter", "a"),
    ("ul.main.version-chap li", "a"),
    ("div.listing-chapters_wrap li", "a"),
    ("div.eplister li", "a"),
    ("div.bxcl li", "a"),
    ("div#chapterlist li", "a"),
    ("ul.chapter-list li", "a"),
];

const RELEASE_DATE_SELECTORS: &[&str] = &["span.chapter-release-date", "span.chapterdate"];
const CHAPTER_LABEL_SELECTOR: &str = "span.chapternum";
// Widest first..last span the read buttons may expand to
const MAX_BUTTON_RANGE: u32 = 2000;

static CHAPTER_IN_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"chapter[-/](\d+(?:\.\d+)?)").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WpTheme {
    Madara,
    MangaStream,
}

/// Per-site settings for the shared WordPress adapter
#[derive(Debug, Clone)]
pub struct WpSiteConfig {
    pub id: String,
    pub name: String,
    pub base_url: String,
    pub theme: WpTheme,
    pub adult: bool,
    /// Search path with `{}` standing for the encoded query
    pub search_path: String,
}

impl WpSiteConfig {
    pub fn madara(id: &str, name: &str, base_url: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            theme: WpTheme::Madara,
            adult: false,
            search_path: "/?s={}&post_type=wp-manga".to_string(),
        }
    }

    pub fn mangastream(id: &str, name: &str, base_url: &str) -> Self {
        Self {
            theme: WpTheme::MangaStream,
            search_path: "/?s={}".to_string(),
            ..Self::madara(id, name, base_url)
        }
    }

    pub fn adult(mut self) -> Self {
        self.adult = true;
        self
    }

    pub fn search_url(&self, title: &str) -> String {
        format!(
            "{}{}",
            self.base_url,
            self.search_path.replace("{}", &urlencoding::encode(title))
        )
    }

    /// Selectors whose presence means a search page finished loading,
    /// including the empty-results states
    pub fn search_ready_selectors(&self) -> Vec<String> {
        let mut selectors: Vec<String> = SEARCH_RESULT_PATTERNS
            .iter()
            .map(|(container, _)| container.to_string())
            .collect();
        selectors.extend(
            ["div.search-wrap", "div.c-tabs-item", "div.listupd", "div.not-found", ".no-results"]
                .iter()
                .map(|s| s.to_string()),
        );
        selectors
    }

    pub fn series_ready_selectors(&self) -> Vec<String> {
        let mut selectors: Vec<String> = CHAPTER_ITEM_PATTERNS
            .iter()
            .map(|(item, _)| item.to_string())
            .collect();
        selectors.extend(
            ["div.summary_content", "div.post-title", "div.infox", "#btn-read-first"]
                .iter()
                .map(|s| s.to_string()),
        );
        selectors
    }

    pub fn reader_ready_selectors(&self) -> Vec<String> {
        self.layouts()
            .into_iter()
            .flat_map(|l| l.container_selectors)
            .collect()
    }

    /// Reader layout for this site's theme
    pub fn layouts(&self) -> Vec<LayoutRule> {
        match self.theme {
            WpTheme::Madara => vec![LayoutRule::new(
                "madara",
                &[".reading-content", ".read-container"],
                &[".reading-content .page-break img", ".reading-content img", ".read-container img"],
                DEFAULT_LAZY_ATTRIBUTES,
            )],
            WpTheme::MangaStream => vec![LayoutRule::new(
                "mangastream",
                &["#readerarea", ".rdminimal"],
                &["#readerarea img", ".rdminimal img"],
                DEFAULT_LAZY_ATTRIBUTES,
            )],
        }
    }

    pub fn descriptor(&self) -> SourceDescriptor {
        SourceDescriptor {
            id: self.id.clone(),
            name: self.name.clone(),
            base_url: self.base_url.clone(),
            adult: self.adult,
            kind: SourceKind::Rendered,
        }
    }
}

/// Sites known to run one of the supported themes, in query order
pub fn known_sites() -> Vec<WpSiteConfig> {
    vec![
        WpSiteConfig::mangastream("asurascans", "Asura Scans", "https://asurascans.com"),
        WpSiteConfig::mangastream("kenscans", "Ken Scans", "https://kenscans.com"),
        WpSiteConfig::mangastream("madarascans", "Madara Scans", "https://madarascans.com"),
        WpSiteConfig::madara("manhuaus", "ManhuaUS", "https://manhuaus.com"),
        WpSiteConfig::madara("grimscans", "Grim Scans", "https://grimscans.team"),
        WpSiteConfig::mangastream("nyxscans", "Nyx Scans", "https://nyxscans.com"),
        WpSiteConfig::mangastream("rizzfables", "Rizz Fables", "https://rizzfables.com"),
        WpSiteConfig::madara("stonescape", "StoneScape", "https://stonescape.xyz"),
        WpSiteConfig::mangastream("witchscans", "Witch Scans", "https://witchscans.com"),
    ]
}

/// Resolve a link found on `page_url`
fn resolve(page_url: &str, href: &str) -> String {
    Url::parse(page_url)
        .and_then(|base| base.join(href))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| absolute_url(page_url, href))
}

fn selector(s: &str) -> Option<Selector> {
    Selector::parse(s).ok()
}

fn element_text(el: &ElementRef) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Search results on a rendered search page. Items whose title cleans to
/// nothing are skipped; URLs are deduplicated.
pub fn parse_search_results(html: &str, base_url: &str, source_id: &str) -> Vec<SearchCandidate> {
    let document = Html::parse_document(html);
    let img = selector("img");

    for (container_sel, link_sel) in SEARCH_RESULT_PATTERNS {
        let (Some(container), Some(link)) = (selector(container_sel), selector(link_sel)) else {
            continue;
        };

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for element in document.select(&container) {
            let Some(a) = element.select(&link).next() else {
                continue;
            };
            let Some(href) = a.value().attr("href").filter(|h| !h.trim().is_empty()) else {
                continue;
            };

            let raw_title = a
                .value()
                .attr("title")
                .map(str::to_string)
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| element_text(&a));
            let Some(title) = clean_title(&raw_title) else {
                continue;
            };

            let url = absolute_url(base_url, href.trim());
            let Some(external_id) = slug_from_url(&url) else {
                continue;
            };
            if !seen.insert(url.clone()) {
                continue;
            }

            let cover_url = img
                .as_ref()
                .and_then(|sel| element.select(sel).next())
                .and_then(|i| i.value().attr("data-src").or_else(|| i.value().attr("src")))
                .filter(|src| !src.starts_with("data:"))
                .map(|src| absolute_url(base_url, src));

            out.push(SearchCandidate {
                source_id: source_id.to_string(),
                title,
                external_id,
                url,
                cover_url,
                alt_titles: Vec::new(),
            });
        }

        if !out.is_empty() {
            log::debug!("[{}] {} results via {}", source_id, out.len(), container_sel);
            return out;
        }
    }
    Vec::new()
}

/// Chapter label from link text, falling back to the number in the URL
fn chapter_label(text: &str, href: &str) -> String {
    let t = text.trim();
    if !t.is_empty() && t != "#" {
        return t.to_string();
    }
    CHAPTER_IN_URL
        .captures(&href.to_lowercase())
        .map(|cap| format!("Chapter {}", &cap[1]))
        .unwrap_or_else(|| href.to_string())
}

fn chapter_descriptor(label: &str, url: String, source_id: &str) -> ChapterDescriptor {
    let number = extract_number(label).unwrap_or_else(|| label.to_string());
    let title = Some(label.to_string()).filter(|l| *l != number && !l.is_empty());
    ChapterDescriptor {
        id: slug_from_url(&url).unwrap_or_else(|| url.clone()),
        chapter: number,
        title,
        published_at: None,
        url,
        source: source_id.to_string(),
        language: None,
    }
}

fn chapters_from_items(document: &Html, series_url: &str, source_id: &str) -> Vec<ChapterDescriptor> {
    let label_sel = selector(CHAPTER_LABEL_SELECTOR);
    let date_sels: Vec<Selector> = RELEASE_DATE_SELECTORS.iter().filter_map(|s| selector(s)).collect();

    for (item_sel, link_sel) in CHAPTER_ITEM_PATTERNS {
        let (Some(item), Some(link)) = (selector(item_sel), selector(link_sel)) else {
            continue;
        };

        let mut chapters = Vec::new();
        for element in document.select(&item) {
            let Some(a) = element.select(&link).next() else {
                continue;
            };
            let Some(href) = a.value().attr("href").or_else(|| a.value().attr("data-href")) else {
                continue;
            };

            let text = label_sel
                .as_ref()
                .and_then(|sel| a.select(sel).next())
                .map(|el| element_text(&el))
                .unwrap_or_else(|| element_text(&a));
            let label = chapter_label(&text, href);
            let mut chapter = chapter_descriptor(&label, resolve(series_url, href), source_id);
            chapter.published_at = date_sels
                .iter()
                .find_map(|sel| element.select(sel).next())
                .and_then(|el| parse_listing_date(&element_text(&el)));
            chapters.push(chapter);
        }

        if !chapters.is_empty() {
            log::debug!("[{}] {} chapters via {}", source_id, chapters.len(), item_sel);
            return chapters;
        }
    }
    Vec::new()
}

/// Some series pages only show "first" and "last" buttons; expand the range
fn chapters_from_read_buttons(document: &Html, series_url: &str, source_id: &str) -> Vec<ChapterDescriptor> {
    let Some(sel) = selector("a#btn-read-first, a#btn-read-last") else {
        return Vec::new();
    };
    let mut first = None;
    let mut last = None;
    for a in document.select(&sel) {
        let number = a
            .value()
            .attr("href")
            .and_then(|h| CHAPTER_IN_URL.captures(&h.to_lowercase()).map(|c| c[1].to_string()))
            .and_then(|n| n.parse::<u32>().ok());
        match a.value().attr("id") {
            Some("btn-read-first") => first = number,
            Some("btn-read-last") => last = number,
            _ => {}
        }
    }

    match (first, last) {
        (Some(first), Some(last)) if last >= first && last - first <= MAX_BUTTON_RANGE => {
            let base = series_url.trim_end_matches('/');
            (first..=last)
                .map(|n| {
                    chapter_descriptor(
                        &format!("Chapter {}", n),
                        format!("{}/chapter-{}/", base, n),
                        source_id,
                    )
                })
                .collect()
        }
        (Some(first), Some(last)) if last >= first => {
            log::warn!(
                "[{}] Ignoring implausible read-button range {}..={} on {}",
                source_id,
                first,
                last,
                series_url
            );
            Vec::new()
        }
        _ => Vec::new(),
    }
}

/// Chapter listing of a series page in ascending order
pub fn parse_chapter_list(html: &str, series_url: &str, source_id: &str) -> Vec<ChapterDescriptor> {
    let document = Html::parse_document(html);
    let mut chapters = chapters_from_items(&document, series_url, source_id);
    if chapters.is_empty() {
        chapters = chapters_from_read_buttons(&document, series_url, source_id);
    }

    // Both themes list newest first
    let number = |c: &ChapterDescriptor| c.chapter.parse::<f64>().ok();
    if let (Some(first), Some(last)) = (
        chapters.first().and_then(number),
        chapters.last().and_then(number),
    ) {
        if first > last {
            chapters.reverse();
        }
    }
    chapters
}

/// One WordPress site, loaded through the rendering worker
pub struct WpMangaSource {
    site: WpSiteConfig,
    descriptor: SourceDescriptor,
    render: Arc<RenderContext>,
}

impl WpMangaSource {
    pub fn new(site: WpSiteConfig, render: Arc<RenderContext>) -> Self {
        Self {
            descriptor: site.descriptor(),
            site,
            render,
        }
    }

    pub fn site(&self) -> &WpSiteConfig {
        &self.site
    }
}

#[async_trait]
impl Source for WpMangaSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn search_candidates(&self, title: &str) -> Result<Vec<SearchCandidate>, ScrapeError> {
        let url = self.site.search_url(title);
        let html = self
            .render
            .fetch_html(&url, &self.site.search_ready_selectors())
            .await?;
        Ok(parse_search_results(&html, &self.site.base_url, self.id()))
    }

    async fn get_chapters(&self, external_id: &str, url: &str) -> Result<ChaptersResult, ScrapeError> {
        let html = self
            .render
            .fetch_html(url, &self.site.series_ready_selectors())
            .await?;
        let chapters = parse_chapter_list(&html, url, self.id());
        if chapters.is_empty() {
            log::warn!("[{}] No chapters found for {}", self.id(), url);
        }
        Ok(ChaptersResult::new(
            chapters,
            SourceRef {
                name: self.site.name.clone(),
                url: url.to_string(),
                title_id: external_id.to_string(),
            },
        ))
    }

    async fn get_chapter_images(&self, chapter: &ChapterDescriptor) -> Result<Vec<String>, ScrapeError> {
        self.render
            .extract_images(
                &chapter.url,
                &self.site.reader_ready_selectors(),
                &self.site.layouts(),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MADARA_SEARCH: &str = r#"
        <div class="c-tabs-item">
          <div class="c-tabs-item__content">
            <div class="tab-thumb"><a href="/manga/solo-leveling/"><img data-src="https://cdn.site.com/solo.jpg" src="data:image/gif;base64,AA"></a></div>
            <div class="post-title"><h3><a href="https://site.com/manga/solo-leveling/">MANHWA Solo Leveling</a></h3></div>
          </div>
          <div class="c-tabs-item__content">
            <div class="post-title"><h3><a href="https://site.com/manga/solo-leveling-ragnarok/">Solo Leveling: Ragnarok 9.8</a></h3></div>
          </div>
          <div class="c-tabs-item__content">
            <div class="post-title"><h3><a href="https://site.com/manga/solo-leveling/">Solo Leveling</a></h3></div>
          </div>
        </div>"#;

    const MANGASTREAM_SEARCH: &str = r#"
        <div class="listupd">
          <div class="bs"><div class="bsx"><a href="https://ms.com/manga/tower-of-god/" title="Tower of God"><div class="tt">Tower of God</div></a></div></div>
          <div class="bs"><div class="bsx"><a href="https://ms.com/manga/nothing/" title="  "><div class="tt">★</div></a></div></div>
        </div>"#;

    const MADARA_SERIES: &str = r#"
        <ul class="main version-chap">
          <li class="wp-manga-chapter"><a href="https://site.com/manga/x/chapter-3/">Chapter 3</a><span class="chapter-release-date"><i>March 3, 2024</i></span></li>
          <li class="wp-manga-chapter"><a href="https://site.com/manga/x/chapter-2/">Chapter 2</a><span class="chapter-release-date"><i>2 days ago</i></span></li>
          <li class="wp-manga-chapter"><a href="https://site.com/manga/x/chapter-1/">Chapter 1 - The Start</a></li>
        </ul>"#;

    const MANGASTREAM_SERIES: &str = r#"
        <div class="eplister"><ul>
          <li><a href="https://ms.com/tower-of-god-chapter-2/"><span class="chapternum">Chapter 2</span><span class="chapterdate">January 9, 2024</span></a></li>
          <li><a href="https://ms.com/tower-of-god-chapter-1/"><span class="chapternum">Chapter 1</span><span class="chapterdate">January 2, 2024</span></a></li>
        </ul></div>"#;

    #[test]
    fn test_parse_madara_search() {
        let results = parse_search_results(MADARA_SEARCH, "https://site.com", "manhuaus");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "Solo Leveling");
        assert_eq!(results[0].external_id, "solo-leveling");
        assert_eq!(results[0].cover_url.as_deref(), Some("https://cdn.site.com/solo.jpg"));
        assert_eq!(results[1].title, "Solo Leveling: Ragnarok");
        assert_eq!(results[1].source_id, "manhuaus");
    }

    #[test]
    fn test_parse_mangastream_search() {
        let results = parse_search_results(MANGASTREAM_SEARCH, "https://ms.com", "asurascans");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Tower of God");
        assert_eq!(results[0].url, "https://ms.com/manga/tower-of-god/");
    }

    #[test]
    fn test_parse_empty_search() {
        let html = r#"<div class="search-wrap"><div class="not-found">Nothing</div></div>"#;
        assert!(parse_search_results(html, "https://site.com", "s").is_empty());
    }

    #[test]
    fn test_parse_madara_chapters_ascending() {
        let chapters = parse_chapter_list(MADARA_SERIES, "https://site.com/manga/x/", "manhuaus");
        let numbers: Vec<&str> = chapters.iter().map(|c| c.chapter.as_str()).collect();
        assert_eq!(numbers, vec!["1", "2", "3"]);
        assert_eq!(chapters[0].id, "chapter-1");
        assert_eq!(chapters[0].title.as_deref(), Some("Chapter 1 - The Start"));
        assert!(chapters[2].published_at.is_some());
        assert!(chapters[1].published_at.is_none());
    }

    #[test]
    fn test_parse_mangastream_chapters() {
        let chapters = parse_chapter_list(MANGASTREAM_SERIES, "https://ms.com/manga/tower-of-god/", "asurascans");
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].chapter, "1");
        assert_eq!(chapters[0].title.as_deref(), Some("Chapter 1"));
        assert_eq!(
            chapters[1].published_at.map(|d| d.to_rfc3339()).as_deref(),
            Some("2024-01-09T00:00:00+00:00")
        );
    }

    #[test]
    fn test_read_buttons_fallback() {
        let html = r#"
            <a id="btn-read-first" href="https://site.com/manga/x/chapter-1/">First</a>
            <a id="btn-read-last" href="https://site.com/manga/x/chapter-4/">Latest</a>"#;
        let chapters = parse_chapter_list(html, "https://site.com/manga/x/", "s");
        assert_eq!(chapters.len(), 4);
        assert_eq!(chapters[3].url, "https://site.com/manga/x/chapter-4/");
    }

    #[test]
    fn test_read_buttons_range_is_capped() {
        let html = r#"
            <a id="btn-read-first" href="https://site.com/manga/x/chapter-1/">First</a>
            <a id="btn-read-last" href="https://site.com/manga/x/chapter-300000/">Latest</a>"#;
        assert!(parse_chapter_list(html, "https://site.com/manga/x/", "s").is_empty());

        let html = r#"
            <a id="btn-read-first" href="https://site.com/manga/x/chapter-1/">First</a>
            <a id="btn-read-last" href="https://site.com/manga/x/chapter-2001/">Latest</a>"#;
        assert_eq!(parse_chapter_list(html, "https://site.com/manga/x/", "s").len(), 2001);
    }

    #[test]
    fn test_relative_chapter_links() {
        let html = r#"<ul><li class="wp-manga-chapter"><a href="/manga/x/chapter-7/">Chapter 7</a></li></ul>"#;
        let chapters = parse_chapter_list(html, "https://site.com/manga/x/", "s");
        assert_eq!(chapters[0].url, "https://site.com/manga/x/chapter-7/");
    }

    #[test]
    fn test_site_config() {
        let site = WpSiteConfig::madara("m", "M", "https://m.com/");
        assert_eq!(site.search_url("solo leveling"), "https://m.com/?s=solo%20leveling&post_type=wp-manga");
        assert_eq!(site.descriptor().kind, SourceKind::Rendered);
        assert!(site.reader_ready_selectors().contains(&".reading-content".to_string()));

        let ms = WpSiteConfig::mangastream("a", "A", "https://a.com").adult();
        assert_eq!(ms.search_url("x"), "https://a.com/?s=x");
        assert!(ms.descriptor().adult);

        let ids: HashSet<String> = known_sites().into_iter().map(|s| s.id).collect();
        assert_eq!(ids.len(), known_sites().len());
    }
}
