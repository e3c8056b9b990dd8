mod common;

use common::{reader_html, FakeLauncher, FakePage, SharedPage, CHALLENGE_HTML};
use manga_aggregator::browser::BrowserPool;
use manga_aggregator::bypass::{BypassConfig, Navigator};
use manga_aggregator::error::ScrapeError;
use manga_aggregator::extract::{builtin_layouts, ExtractorConfig, ImageExtractor, ImageProxy};
use manga_aggregator::sources::RenderContext;
use std::sync::Arc;
use std::time::Duration;

const URL: &str = "https://scans.example/manga/eleceed/chapter-1/";

fn selectors() -> Vec<String> {
    vec![".reading-content img".to_string()]
}

fn chapter_html() -> String {
    reader_html(
        r#"<div class="reading-content">
             <div class="page-break"><img src="https://scans.example/wp-content/uploads/eleceed/002.jpg"></div>
             <div class="page-break"><img src="https://scans.example/wp-content/uploads/eleceed/001.jpg"></div>
           </div>"#,
    )
}

fn navigator() -> Navigator {
    Navigator::new(BypassConfig {
        max_retries: 3,
        jitter_min: Duration::ZERO,
        jitter_max: Duration::ZERO,
        mitigation_timeout: Duration::from_secs(2),
        pointer_moves: 3,
        content_wait: Duration::from_secs(1),
    })
}

#[tokio::test(start_paused = true)]
async fn test_valid_first_load() {
    let html = chapter_html();
    let page = FakePage::new(&[html.as_str()]);

    let got = navigator()
        .navigate(&SharedPage(page.clone()), URL, &selectors())
        .await
        .unwrap();

    assert_eq!(got, html);
    assert_eq!(page.gotos(), 1);
    assert_eq!(page.pointer_moves(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_challenge_cleared_by_mitigation() {
    let html = chapter_html();
    let page = FakePage::new(&[CHALLENGE_HTML]).clears_on_pointer(&html);

    let got = navigator()
        .navigate(&SharedPage(page.clone()), URL, &selectors())
        .await
        .unwrap();

    assert!(got.contains("reading-content"));
    assert_eq!(page.gotos(), 1);
    assert!(page.pointer_moves() >= 1);
}

#[tokio::test(start_paused = true)]
async fn test_challenge_that_never_clears() {
    let page = FakePage::new(&[CHALLENGE_HTML]);

    let err = navigator()
        .navigate(&SharedPage(page.clone()), URL, &selectors())
        .await
        .unwrap_err();

    match err {
        ScrapeError::ChallengeUnresolved { url, attempts } => {
            assert_eq!(url, URL);
            assert_eq!(attempts, 3);
        }
        other => panic!("expected ChallengeUnresolved, got {:?}", other),
    }
    assert_eq!(page.pointer_moves(), 9);
}

#[tokio::test(start_paused = true)]
async fn test_failed_navigation_wait_does_not_cut_mitigation_short() {
    let page = FakePage::new(&[CHALLENGE_HTML]).navigation_fails_fast();

    let start = tokio::time::Instant::now();
    let err = navigator()
        .navigate(&SharedPage(page.clone()), URL, &selectors())
        .await
        .unwrap_err();

    assert!(matches!(err, ScrapeError::ChallengeUnresolved { .. }));
    // Each of the 3 attempts waits out the full 2s mitigation window
    assert!(start.elapsed() >= Duration::from_secs(9), "{:?}", start.elapsed());
}

#[tokio::test(start_paused = true)]
async fn test_page_without_content_is_not_accepted() {
    let blocked = reader_html("<h1>Sorry, you have been blocked</h1><div class=\"reading-content\"><img src=\"https://x.example/1.jpg\"></div>");
    let page = FakePage::new(&[blocked.as_str()]);

    let err = navigator()
        .navigate(&SharedPage(page.clone()), URL, &selectors())
        .await
        .unwrap_err();

    assert!(matches!(err, ScrapeError::NoContentFound(_)));
    assert_eq!(page.gotos(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_navigation_failures_are_retried() {
    let html = chapter_html();
    let page = FakePage::new(&[html.as_str()]).failing_gotos(2);

    let got = navigator()
        .navigate(&SharedPage(page.clone()), URL, &selectors())
        .await;

    assert!(got.is_ok());
    assert_eq!(page.gotos(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_reload_after_invalid_page() {
    let html = chapter_html();
    let page = FakePage::new(&["<html><body>Loading...</body></html>", html.as_str()]);

    let got = navigator()
        .navigate(&SharedPage(page.clone()), URL, &selectors())
        .await
        .unwrap();

    assert_eq!(got, html);
    assert_eq!(page.gotos(), 2);
}

fn render_context(page: Arc<FakePage>) -> (RenderContext, Arc<FakeLauncher>) {
    let launcher = FakeLauncher::new(page);
    let pool = Arc::new(BrowserPool::new(launcher.clone()));
    let extractor = ImageExtractor::new(
        builtin_layouts(),
        ExtractorConfig {
            scroll_steps: 2,
            image_threshold: 200,
            container_wait: Duration::from_secs(1),
            step_pause: Duration::from_millis(100),
            settle: Duration::from_millis(100),
        },
        ImageProxy::disabled(),
    );
    (RenderContext::new(pool, navigator(), extractor), launcher)
}

#[tokio::test(start_paused = true)]
async fn test_render_context_extracts_and_releases_lease() {
    let page = FakePage::new(&[CHALLENGE_HTML]).clears_on_pointer(&chapter_html());
    let (render, launcher) = render_context(page);

    let images = render
        .extract_images(URL, &selectors(), &[])
        .await
        .unwrap();

    assert_eq!(
        images,
        vec![
            "https://scans.example/wp-content/uploads/eleceed/001.jpg",
            "https://scans.example/wp-content/uploads/eleceed/002.jpg",
        ]
    );
    assert_eq!(render.pool().in_use(), 0);
    assert_eq!(launcher.launches(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_render_context_releases_lease_on_failure() {
    let page = FakePage::new(&[CHALLENGE_HTML]);
    let (render, _) = render_context(page);

    let err = render.fetch_html(URL, &selectors()).await.unwrap_err();
    assert!(matches!(err, ScrapeError::ChallengeUnresolved { .. }));
    assert_eq!(render.pool().in_use(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_pool_launches_once_for_concurrent_callers() {
    let page = FakePage::with_document(chapter_html());
    let launcher = FakeLauncher::with(page, Duration::from_millis(500), 0);
    let pool = Arc::new(BrowserPool::new(launcher.clone()));

    let leases = futures::future::join_all((0..5).map(|_| pool.acquire())).await;
    assert!(leases.iter().all(|l| l.is_ok()));
    assert_eq!(launcher.launches(), 1);
    assert_eq!(pool.in_use(), 5);

    drop(leases);
    assert_eq!(pool.in_use(), 0);

    pool.stop().await;
    assert!(!pool.is_running().await);
    pool.start().await.unwrap();
    assert_eq!(launcher.launches(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_pool_retries_failed_launch() {
    let page = FakePage::with_document(chapter_html());
    let launcher = FakeLauncher::with(page, Duration::ZERO, 1);
    let pool = BrowserPool::new(launcher.clone());

    assert!(pool.acquire().await.is_err());
    assert_eq!(pool.in_use(), 0);
    assert!(pool.acquire().await.is_ok());
    assert_eq!(launcher.launches(), 2);
}
