//! Pure extraction rules over serialized HTML
//!
//! Nothing here touches a live page, so ordering, dedup and proxy rewriting
//! are tested against fixture strings.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;

/// Selectors for one reader layout family
#[derive(Debug, Clone)]
pub struct LayoutRule {
    pub name: String,
    /// Prioritized container alternatives; the first one present selects this layout
    pub container_selectors: Vec<String>,
    /// Ordered image selectors; the first yielding acceptable URLs wins
    pub image_selectors: Vec<String>,
    /// Attributes holding the real URL of a deferred-load image
    pub lazy_attributes: Vec<String>,
    /// Reader that streams images continuously as the page is scrolled
    pub streaming: bool,
    /// Accept only URLs that look like chapter content. On for paged
    /// layouts; streaming readers serve extension-less CDN URLs.
    pub strict_urls: bool,
}

impl LayoutRule {
    pub fn new(name: &str, containers: &[&str], images: &[&str], lazy: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            container_selectors: containers.iter().map(|s| s.to_string()).collect(),
            image_selectors: images.iter().map(|s| s.to_string()).collect(),
            lazy_attributes: lazy.iter().map(|s| s.to_string()).collect(),
            streaming: false,
            strict_urls: true,
        }
    }

    pub fn streaming(mut self) -> Self {
        self.streaming = true;
        self.strict_urls = false;
        self
    }

    /// Fallback when no known container is present
    pub fn generic() -> Self {
        Self::new("generic", &[], &["img"], DEFAULT_LAZY_ATTRIBUTES)
    }
}

pub const DEFAULT_LAZY_ATTRIBUTES: &[&str] = &["data-src", "data-lazy-src", "data-url", "data-original"];

/// Layouts every render-backed source understands, in priority order
pub fn builtin_layouts() -> Vec<LayoutRule> {
    vec![
        LayoutRule::new("webtoon", &["#_imageList"], &["#_imageList img", "._images"], &["data-url"])
            .streaming(),
        LayoutRule::new(
            "madara",
            &[".reading-content"],
            &[".reading-content .page-break img", ".reading-content img"],
            DEFAULT_LAZY_ATTRIBUTES,
        ),
        LayoutRule::new("mangastream", &["#readerarea"], &["#readerarea img"], DEFAULT_LAZY_ATTRIBUTES),
        LayoutRule::new(
            "reader",
            &[".viewer", "#pages", ".chapter-images", ".reader-area"],
            &[".viewer img", "#pages img", ".chapter-images img", ".reader-area img"],
            DEFAULT_LAZY_ATTRIBUTES,
        ),
    ]
}

const PLACEHOLDER_FRAGMENTS: &[&str] = &[
    "placeholder",
    "loading.gif",
    "loader.gif",
    "lazy.gif",
    "blank.gif",
    "pixel.gif",
    "spinner",
    "1x1.",
];

static CONTENT_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)/(wp-content/uploads|uploads|chapters?|manga|comics?|scans?|data|pages?)/")
        .expect("valid regex")
});
static IMAGE_EXTENSION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\.(jpe?g|png|webp|gif|avif)(\?|#|$)").expect("valid regex")
});
static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid regex"));

/// Whether `url` can be a chapter page image.
///
/// Data URIs and placeholder images are always rejected. With `strict`, the
/// URL must also match a known content path or image extension.
pub fn is_acceptable_image_url(url: &str, strict: bool) -> bool {
    let lower = url.trim().to_lowercase();
    if lower.is_empty() || lower.starts_with("data:") {
        return false;
    }
    if !(lower.starts_with("https://") || lower.starts_with("http://")) {
        return false;
    }
    if PLACEHOLDER_FRAGMENTS.iter().any(|p| lower.contains(p)) {
        return false;
    }
    !strict || CONTENT_PATH.is_match(&lower) || IMAGE_EXTENSION.is_match(&lower)
}

/// Real source of an `<img>`: deferred-load attributes first, then `src`
fn image_source(element: &scraper::ElementRef, lazy_attributes: &[String]) -> Option<String> {
    lazy_attributes
        .iter()
        .map(String::as_str)
        .chain(std::iter::once("src"))
        .filter_map(|attr| element.value().attr(attr))
        .map(str::trim)
        .find(|v| !v.is_empty() && !v.starts_with("data:"))
        .map(|v| {
            if v.starts_with("//") {
                format!("https:{}", v)
            } else {
                v.to_string()
            }
        })
}

/// Collect image URLs with the first selector that yields any acceptable URL
pub fn collect_image_urls(
    html: &str,
    image_selectors: &[String],
    lazy_attributes: &[String],
    strict: bool,
) -> Vec<String> {
    let document = Html::parse_document(html);

    for selector in image_selectors {
        let Ok(sel) = Selector::parse(selector) else {
            log::debug!("Skipping unparseable image selector: {}", selector);
            continue;
        };

        let urls: Vec<String> = document
            .select(&sel)
            .filter_map(|el| image_source(&el, lazy_attributes))
            .filter(|url| is_acceptable_image_url(url, strict))
            .collect();

        if !urls.is_empty() {
            return urls;
        }
    }

    Vec::new()
}

/// Drop repeated URLs, keeping first-seen order
pub fn dedupe_urls(urls: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.into_iter().filter(|u| seen.insert(u.clone())).collect()
}

/// First run of digits in `url`, without leading zeros. Digit strings of any
/// length compare numerically by (length, text).
pub fn page_number(url: &str) -> Option<String> {
    DIGITS.find(url).map(|m| {
        let trimmed = m.as_str().trim_start_matches('0');
        if trimmed.is_empty() {
            "0".to_string()
        } else {
            trimmed.to_string()
        }
    })
}

/// Stable sort by page number; URLs without digits keep their order at the end
pub fn sort_by_page_number(urls: &mut [String]) {
    urls.sort_by_cached_key(|url| match page_number(url) {
        Some(n) => (false, n.len(), n),
        None => (true, 0, String::new()),
    });
}

/// Rewrites image URLs through a CDN/proxy template containing `{url}`
#[derive(Debug, Clone)]
pub struct ImageProxy {
    template: String,
}

impl ImageProxy {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn disabled() -> Self {
        Self::new("")
    }

    pub fn is_enabled(&self) -> bool {
        self.template.contains("{url}")
    }

    fn prefix(&self) -> &str {
        self.template.split("{url}").next().unwrap_or_default()
    }

    pub fn is_proxied(&self, url: &str) -> bool {
        self.is_enabled() && !self.prefix().is_empty() && url.starts_with(self.prefix())
    }

    pub fn rewrite(&self, url: &str) -> String {
        if !self.is_enabled() || self.is_proxied(url) {
            return url.to_string();
        }
        self.template
            .replace("{url}", &urlencoding::encode(url))
    }
}

/// Dedupe, order by page number, then proxy-rewrite
pub fn finalize_urls(urls: Vec<String>, proxy: &ImageProxy) -> Vec<String> {
    let mut urls = dedupe_urls(urls);
    sort_by_page_number(&mut urls);
    urls.iter().map(|u| proxy.rewrite(u)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_rejects_data_uris_and_placeholders() {
        assert!(!is_acceptable_image_url("data:image/gif;base64,R0lGOD", false));
        assert!(!is_acceptable_image_url("https://site.com/img/loading.gif", false));
        assert!(!is_acceptable_image_url("https://site.com/placeholder-01.jpg", false));
        assert!(!is_acceptable_image_url("/relative/01.jpg", false));
        assert!(is_acceptable_image_url("https://cdn.site.com/abc", false));
    }

    #[test]
    fn test_strict_mode_requires_content_pattern() {
        assert!(!is_acceptable_image_url("https://site.com/logo", true));
        assert!(is_acceptable_image_url("https://site.com/wp-content/uploads/x", true));
        assert!(is_acceptable_image_url("https://site.com/a/b/003.webp?v=2", true));
    }

    #[test]
    fn test_paged_layouts_are_strict_streaming_is_not() {
        for layout in builtin_layouts() {
            assert_eq!(layout.strict_urls, !layout.streaming, "{}", layout.name);
        }
        assert!(LayoutRule::generic().strict_urls);

        let html = r#"<div class="reading-content">
            <img src="https://scans.site.com/track?ref=reader">
            <img src="https://scans.site.com/wp-content/uploads/ch1/01.jpg">
        </div>"#;
        let madara = &builtin_layouts()[1];
        let urls = collect_image_urls(html, &madara.image_selectors, &madara.lazy_attributes, madara.strict_urls);
        assert_eq!(urls, strings(&["https://scans.site.com/wp-content/uploads/ch1/01.jpg"]));
    }

    #[test]
    fn test_lazy_attribute_preferred_over_src() {
        let html = r#"<div id="readerarea">
            <img src="https://site.com/lazy.gif" data-src="https://cdn.site.com/ch1/01.jpg">
            <img src="//cdn.site.com/ch1/02.jpg">
        </div>"#;
        let urls = collect_image_urls(
            html,
            &strings(&["#readerarea img"]),
            &strings(&["data-src"]),
            false,
        );
        assert_eq!(
            urls,
            strings(&["https://cdn.site.com/ch1/01.jpg", "https://cdn.site.com/ch1/02.jpg"])
        );
    }

    #[test]
    fn test_first_productive_selector_wins() {
        let html = r#"<div class="a"><img src="data:image/png;base64,xx"></div>
            <div class="b"><img src="https://x.com/p/1.jpg"></div>
            <div class="c"><img src="https://x.com/p/9.jpg"></div>"#;
        let urls = collect_image_urls(html, &strings(&[".a img", ".b img", ".c img"]), &[], false);
        assert_eq!(urls, strings(&["https://x.com/p/1.jpg"]));
    }

    #[test]
    fn test_sort_is_numeric_and_stable() {
        let mut urls = strings(&[
            "https://x.com/p/10.jpg",
            "https://x.com/p/credits.jpg",
            "https://x.com/p/2.jpg",
            "https://x.com/p/002.png",
            "https://x.com/p/1.jpg",
        ]);
        sort_by_page_number(&mut urls);
        assert_eq!(
            urls,
            strings(&[
                "https://x.com/p/1.jpg",
                "https://x.com/p/2.jpg",
                "https://x.com/p/002.png",
                "https://x.com/p/10.jpg",
                "https://x.com/p/credits.jpg",
            ])
        );
    }

    #[test]
    fn test_page_number_handles_long_digit_runs() {
        let mut urls = strings(&[
            "https://x.com/99999999999999999999999.jpg",
            "https://x.com/100000000000000000000000.jpg",
            "https://x.com/5.jpg",
        ]);
        sort_by_page_number(&mut urls);
        assert_eq!(urls[0], "https://x.com/5.jpg");
        assert_eq!(urls[2], "https://x.com/100000000000000000000000.jpg");
    }

    #[test]
    fn test_proxy_rewrite() {
        let proxy = ImageProxy::new("https://wsrv.nl/?url={url}&output=webp");
        let rewritten = proxy.rewrite("https://cdn.site.com/a b/1.jpg");
        assert_eq!(
            rewritten,
            "https://wsrv.nl/?url=https%3A%2F%2Fcdn.site.com%2Fa%20b%2F1.jpg&output=webp"
        );
        assert_eq!(proxy.rewrite(&rewritten), rewritten);
        assert_eq!(ImageProxy::disabled().rewrite("https://a.com/1.jpg"), "https://a.com/1.jpg");
    }

    #[test]
    fn test_finalize_dedupes_then_sorts() {
        let urls = strings(&[
            "https://x.com/3.jpg",
            "https://x.com/1.jpg",
            "https://x.com/3.jpg",
            "https://x.com/2.jpg",
        ]);
        assert_eq!(
            finalize_urls(urls, &ImageProxy::disabled()),
            strings(&["https://x.com/1.jpg", "https://x.com/2.jpg", "https://x.com/3.jpg"])
        );
    }
}
