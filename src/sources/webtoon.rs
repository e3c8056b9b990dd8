use super::{RenderContext, Source};
use crate::error::ScrapeError;
use crate::extract::{builtin_layouts, LayoutRule};
use crate::helpers::{absolute_url, clean_title, extract_number, parse_listing_date};
use crate::models::{
    ChapterDescriptor, ChaptersResult, SearchCandidate, SourceDescriptor, SourceKind, SourceRef,
};
use async_trait::async_trait;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::Arc;

pub const BASE_URL: &str = "https://www.webtoons.com";
const MAX_LIST_PAGES: usize = 60;

const SEARCH_RESULT_PATTERNS: &[(&str, &str)] = &[
    ("ul.card_lst li", "a"),
    ("ul.webtoon_list li", "a"),
    ("li.challenge_item", "a"),
    ("div.card_item", "a"),
];
const TITLE_SELECTORS: &[&str] = &["p.subj", "strong.title", ".info .subj"];
const EPISODE_ITEMS: &str = "li._episodeItem, ul#_listUl li, ul#_episodeList li";

fn selector(s: &str) -> Option<Selector> {
    Selector::parse(s).ok()
}

fn text_of(el: &ElementRef) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn query_param(url: &str, key: &str) -> Option<String> {
    let parsed = Url::parse(&absolute_url(BASE_URL, url)).ok()?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

/// `title_no` query parameter identifying a series
pub fn title_no(url: &str) -> Option<String> {
    query_param(url, "title_no")
}

/// Series list URL for page `page` (1-based)
pub fn list_page_url(series_url: &str, page: usize) -> String {
    match Url::parse(series_url) {
        Ok(mut url) => {
            let kept: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(k, _)| k != "page")
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            url.query_pairs_mut()
                .clear()
                .extend_pairs(kept)
                .append_pair("page", &page.to_string());
            url.to_string()
        }
        Err(_) => format!("{}&page={}", series_url, page),
    }
}

pub fn parse_search_results(html: &str, source_id: &str) -> Vec<SearchCandidate> {
    let document = Html::parse_document(html);
    let title_sels: Vec<Selector> = TITLE_SELECTORS.iter().filter_map(|s| selector(s)).collect();
    let img = selector("img");

    for (item_sel, link_sel) in SEARCH_RESULT_PATTERNS {
        let (Some(item), Some(link)) = (selector(item_sel), selector(link_sel)) else {
            continue;
        };
        let mut seen = HashSet::new();
        let mut out = Vec::new();

        for element in document.select(&item) {
            let Some(a) = element.select(&link).next() else {
                continue;
            };
            let Some(href) = a.value().attr("href") else {
                continue;
            };
            let url = absolute_url(BASE_URL, href);
            let Some(id) = title_no(&url) else {
                continue;
            };
            if !seen.insert(id.clone()) {
                continue;
            }

            let raw_title = title_sels
                .iter()
                .find_map(|sel| element.select(sel).next())
                .map(|el| text_of(&el))
                .or_else(|| a.value().attr("title").map(str::to_string))
                .unwrap_or_else(|| text_of(&a));
            let Some(title) = clean_title(&raw_title) else {
                continue;
            };

            out.push(SearchCandidate {
                source_id: source_id.to_string(),
                title,
                external_id: id,
                url,
                cover_url: img
                    .as_ref()
                    .and_then(|sel| element.select(sel).next())
                    .and_then(|i| i.value().attr("src"))
                    .map(str::to_string),
                alt_titles: Vec::new(),
            });
        }

        if !out.is_empty() {
            return out;
        }
    }
    Vec::new()
}

/// Episodes on one page of a series list, newest first as the site shows them
pub fn parse_episode_page(html: &str, source_id: &str) -> Vec<ChapterDescriptor> {
    let document = Html::parse_document(html);
    let (Some(items), Some(link), Some(number), Some(subject), Some(date)) = (
        selector(EPISODE_ITEMS),
        selector("a"),
        selector("span.tx"),
        selector("span.subj span, span.subj"),
        selector("span.date"),
    ) else {
        return Vec::new();
    };

    let mut episodes = Vec::new();
    for item in document.select(&items) {
        let Some(a) = item.select(&link).next() else {
            continue;
        };
        let Some(href) = a.value().attr("href") else {
            continue;
        };
        let url = absolute_url(BASE_URL, href);
        let Some(episode_no) =
            query_param(&url, "episode_no").or_else(|| item.value().attr("data-episode-no").map(str::to_string))
        else {
            continue;
        };

        let chapter = item
            .select(&number)
            .next()
            .and_then(|el| extract_number(&text_of(&el)))
            .unwrap_or_else(|| episode_no.clone());
        let title = item
            .select(&subject)
            .next()
            .map(|el| text_of(&el))
            .filter(|t| !t.is_empty());
        let published_at = item
            .select(&date)
            .next()
            .and_then(|el| parse_listing_date(&text_of(&el)));

        episodes.push(ChapterDescriptor {
            id: episode_no,
            chapter,
            title,
            published_at,
            url,
            source: source_id.to_string(),
            language: Some("en".to_string()),
        });
    }
    episodes
}

/// WEBTOON originals and canvas series
pub struct WebtoonSource {
    descriptor: SourceDescriptor,
    render: Arc<RenderContext>,
}

impl WebtoonSource {
    pub fn new(render: Arc<RenderContext>) -> Self {
        Self {
            descriptor: SourceDescriptor {
                id: "webtoon".to_string(),
                name: "WEBTOON".to_string(),
                base_url: BASE_URL.to_string(),
                adult: false,
                kind: SourceKind::Rendered,
            },
            render,
        }
    }

    fn reader_layouts() -> Vec<LayoutRule> {
        builtin_layouts()
            .into_iter()
            .filter(|l| l.streaming)
            .collect()
    }
}

#[async_trait]
impl Source for WebtoonSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn search_candidates(&self, title: &str) -> Result<Vec<SearchCandidate>, ScrapeError> {
        let url = format!("{}/en/search?keyword={}", BASE_URL, urlencoding::encode(title));
        let ready: Vec<String> = SEARCH_RESULT_PATTERNS
            .iter()
            .map(|(item, _)| item.to_string())
            .chain(["div.search_result".to_string(), "div.card_nodata".to_string()])
            .collect();
        let html = self.render.fetch_html(&url, &ready).await?;
        Ok(parse_search_results(&html, self.id()))
    }

    async fn get_chapters(&self, external_id: &str, url: &str) -> Result<ChaptersResult, ScrapeError> {
        let ready = vec![EPISODE_ITEMS.to_string(), "div.detail_lst".to_string()];
        let mut seen = HashSet::new();
        let mut episodes = Vec::new();

        // Pages past the end redirect to the last page, so stop once nothing is new
        for page in 1..=MAX_LIST_PAGES {
            let html = self.render.fetch_html(&list_page_url(url, page), &ready).await?;
            let fresh: Vec<ChapterDescriptor> = parse_episode_page(&html, self.id())
                .into_iter()
                .filter(|e| seen.insert(e.id.clone()))
                .collect();
            if fresh.is_empty() {
                break;
            }
            log::debug!("[webtoon] page {}: {} episodes", page, fresh.len());
            episodes.extend(fresh);
        }

        episodes.reverse();
        Ok(ChaptersResult::new(
            episodes,
            SourceRef {
                name: self.descriptor.name.clone(),
                url: url.to_string(),
                title_id: external_id.to_string(),
            },
        ))
    }

    async fn get_chapter_images(&self, chapter: &ChapterDescriptor) -> Result<Vec<String>, ScrapeError> {
        self.render
            .extract_images(&chapter.url, &["#_imageList".to_string()], &Self::reader_layouts())
            .await
    }
}
