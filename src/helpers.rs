//! Title and chapter matching helpers shared by sources and the aggregator
//!
//! - Title cleanup and normalization
//! - Token-overlap scoring between a query and a candidate title
//! - Chapter number extraction and best-match lookup
//!
//! # Examples
//!
//! ```
//! use manga_aggregator::helpers::{normalize_title, title_similarity};
//!
//! assert_eq!(normalize_title("One-Piece"), "onepiece");
//! assert!(title_similarity("solo leveling", "Solo Leveling") > 0.99);
//! ```

use crate::models::ChapterDescriptor;
use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static CHAPTER_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)").expect("valid regex"));
static TRAILING_RATING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+\d+\.\d+\s*$").expect("valid regex"));
static TRAILING_CHAPTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*chapter\s+\d+(?:\.\d+)?\s*$").expect("valid regex"));
static CALL_TO_ACTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*(start reading|read now|add to library).*$").expect("valid regex"));

// Matched case-sensitively so real titles like "Manga Dogs" survive
const BADGE_PREFIXES: &[&str] = &["MANHWA", "MANHUA", "MANGA", "🔥 Hot", "HOT", "NEW"];

/// Strip badges, ratings and call-to-action text scraped alongside a title.
/// Returns `None` when nothing title-like is left.
pub fn clean_title(raw: &str) -> Option<String> {
    let mut cleaned = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    for prefix in BADGE_PREFIXES {
        if let Some(rest) = cleaned.strip_prefix(prefix) {
            if rest.starts_with(' ') {
                cleaned = rest.trim().to_string();
            }
        }
    }

    cleaned = CALL_TO_ACTION.replace(&cleaned, "").to_string();
    cleaned = TRAILING_CHAPTER.replace(&cleaned, "").to_string();
    cleaned = TRAILING_RATING.replace(&cleaned, "").to_string();
    let cleaned = cleaned.trim().to_string();

    if cleaned.chars().filter(|c| c.is_alphanumeric()).count() < 2 {
        return None;
    }
    if cleaned.to_lowercase().starts_with("chapter ") {
        return None;
    }
    Some(cleaned)
}

/// Normalize manga titles for consistent cache keys and equality checks
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect()
}

fn tokens(s: &str) -> HashSet<String> {
    s.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Token-overlap score in `[0, 1]`: shared tokens over the larger token set.
/// Identical normalized titles always score 1.
pub fn title_similarity(query: &str, candidate: &str) -> f64 {
    if !query.trim().is_empty() && normalize_title(query) == normalize_title(candidate) {
        return 1.0;
    }
    let q = tokens(query);
    let c = tokens(candidate);
    if q.is_empty() || c.is_empty() {
        return 0.0;
    }
    let shared = q.intersection(&c).count();
    shared as f64 / q.len().max(c.len()) as f64
}

/// Normalize chapter string for comparison
pub fn normalize_chapter_str(s: &str) -> String {
    s.to_lowercase()
        .replace("chapter", "")
        .replace("episode", "")
        .replace("ch.", "")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
        .collect()
}

/// Extract number from chapter string
pub fn extract_number(s: &str) -> Option<String> {
    CHAPTER_NUMBER
        .captures(s)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn same_number(a: &str, b: &str) -> bool {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => (x - y).abs() < f64::EPSILON,
        _ => a == b,
    }
}

/// Find best matching chapter from a list based on a query string
pub fn find_best_chapter_match<'a>(
    chapters: &'a [ChapterDescriptor],
    query: &str,
) -> Option<&'a ChapterDescriptor> {
    let q_norm = normalize_chapter_str(query);
    if q_norm.is_empty() {
        return None;
    }

    // 1) exact normalized match
    if let Some(ch) = chapters
        .iter()
        .find(|c| normalize_chapter_str(&c.chapter) == q_norm)
    {
        return Some(ch);
    }
    // 2) numeric match ("12" == "12.0" == "Chapter 12")
    if let Some(q_num) = extract_number(query) {
        if let Some(ch) = chapters.iter().find(|c| {
            extract_number(&c.chapter)
                .map(|n| same_number(&n, &q_num))
                .unwrap_or(false)
        }) {
            return Some(ch);
        }
    }
    // 3) substring fallback
    chapters
        .iter()
        .find(|c| normalize_chapter_str(&c.chapter).contains(&q_norm))
}

const LISTING_DATE_FORMATS: &[&str] = &["%B %d, %Y", "%b %d, %Y", "%b %e, %Y", "%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y"];

/// Parse an absolute release date as printed on chapter listings.
/// Relative dates ("2 days ago") are not resolved.
pub fn parse_listing_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let text = text.trim().trim_end_matches('.');
    LISTING_DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Resolve `href` against `base_url`
pub fn absolute_url(base_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else if let Some(rest) = href.strip_prefix("//") {
        format!("https://{}", rest)
    } else {
        let path = if href.starts_with('/') {
            href.to_string()
        } else {
            format!("/{}", href)
        };
        format!("{}{}", base_url.trim_end_matches('/'), path)
    }
}
