//! Pure page classification over serialized DOM text
//!
//! All anti-bot detection lives here so call sites never grow their own
//! substring checks.

use scraper::{Html, Selector};

/// Fragments that only appear on interstitial challenge pages
pub const CHALLENGE_MARKERS: &[&str] = &[
    "just a moment",
    "cf-challenge",
    "challenge-platform",
    "checking your browser",
    "cf-browser-verification",
    "cf_chl_opt",
    "verify you are human",
    "attention required",
    "ddos protection by",
];

/// Fragments of pages that will never turn into content by waiting
pub const ERROR_MARKERS: &[&str] = &[
    "page not found",
    "404 not found",
    "you have been blocked",
    "access denied",
    "g-recaptcha",
    "h-captcha",
    "cf-turnstile",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageVerdict {
    /// Expected content present, no challenge or error markers
    Valid,
    /// An anti-bot interstitial is showing
    Challenge,
    /// Neither content nor challenge: error page, blank page, wrong layout
    Invalid,
}

fn contains_any(page_text: &str, markers: &[&str]) -> bool {
    let lower = page_text.to_lowercase();
    markers.iter().any(|m| lower.contains(m))
}

pub fn is_challenge_page(page_text: &str) -> bool {
    contains_any(page_text, CHALLENGE_MARKERS)
}

pub fn has_error_markers(page_text: &str) -> bool {
    contains_any(page_text, ERROR_MARKERS)
}

/// True only when at least one content selector matches and the page carries
/// neither challenge nor error markers
pub fn has_valid_content(page_text: &str, content_selectors: &[String]) -> bool {
    if is_challenge_page(page_text) || has_error_markers(page_text) {
        return false;
    }

    let document = Html::parse_document(page_text);
    content_selectors.iter().any(|s| match Selector::parse(s) {
        Ok(sel) => document.select(&sel).next().is_some(),
        Err(_) => {
            log::debug!("Ignoring unparseable content selector: {}", s);
            false
        }
    })
}

pub fn classify_page(page_text: &str, content_selectors: &[String]) -> PageVerdict {
    if is_challenge_page(page_text) {
        PageVerdict::Challenge
    } else if has_valid_content(page_text, content_selectors) {
        PageVerdict::Valid
    } else {
        PageVerdict::Invalid
    }
}
