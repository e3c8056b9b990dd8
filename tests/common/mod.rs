#![allow(dead_code)]

use async_trait::async_trait;
use manga_aggregator::browser::page::html_has_selector;
use manga_aggregator::browser::{BrowserError, Page, Worker, WorkerLauncher};
use manga_aggregator::error::ScrapeError;
use manga_aggregator::models::{
    ChapterDescriptor, ChaptersResult, SearchCandidate, SourceDescriptor, SourceKind, SourceRef,
};
use manga_aggregator::sources::Source;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};

pub const CHALLENGE_HTML: &str = r#"<html><head><title>Just a moment...</title></head>
<body><div id="challenge-running">Checking your browser before accessing the site.</div></body></html>"#;

pub fn reader_html(body: &str) -> String {
    format!("<html><head><title>Chapter</title></head><body>{}</body></html>", body)
}

/// Scripted page: each `goto` loads the next queued document (the last one
/// sticks), pointer moves can clear a challenge, and scroll-step scripts can
/// reveal more of the document
#[derive(Default)]
pub struct FakePage {
    loads: Mutex<VecDeque<String>>,
    current: Mutex<String>,
    url: Mutex<String>,
    after_pointer: Mutex<Option<String>>,
    on_scroll: Mutex<VecDeque<String>>,
    fail_goto: Mutex<usize>,
    navigation_fails_fast: std::sync::atomic::AtomicBool,
    pub gotos: AtomicUsize,
    pub pointer_moves: AtomicUsize,
    pub scripts: Mutex<Vec<String>>,
}

impl FakePage {
    pub fn new(loads: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            loads: Mutex::new(loads.iter().map(|s| s.to_string()).collect()),
            ..Self::default()
        })
    }

    pub fn with_document(html: String) -> Arc<Self> {
        let page = Self::new(&[]);
        *page.current.lock().unwrap() = html.clone();
        page.loads.lock().unwrap().push_back(html);
        page
    }

    pub fn clears_on_pointer(self: Arc<Self>, html: &str) -> Arc<Self> {
        *self.after_pointer.lock().unwrap() = Some(html.to_string());
        self
    }

    pub fn reveals_on_scroll(self: Arc<Self>, docs: Vec<String>) -> Arc<Self> {
        *self.on_scroll.lock().unwrap() = docs.into();
        self
    }

    pub fn failing_gotos(self: Arc<Self>, n: usize) -> Arc<Self> {
        *self.fail_goto.lock().unwrap() = n;
        self
    }

    /// `wait_for_navigation` errors at once instead of waiting out its timeout
    pub fn navigation_fails_fast(self: Arc<Self>) -> Arc<Self> {
        self.navigation_fails_fast.store(true, Ordering::SeqCst);
        self
    }

    pub fn gotos(&self) -> usize {
        self.gotos.load(Ordering::SeqCst)
    }

    pub fn pointer_moves(&self) -> usize {
        self.pointer_moves.load(Ordering::SeqCst)
    }

    pub fn ran_script_containing(&self, needle: &str) -> bool {
        self.scripts.lock().unwrap().iter().any(|s| s.contains(needle))
    }
}

/// Boxed handle sharing one `FakePage` so tests can inspect it afterwards
pub struct SharedPage(pub Arc<FakePage>);

#[async_trait]
impl Page for SharedPage {
    async fn goto(&self, url: &str) -> Result<(), BrowserError> {
        let page = &self.0;
        page.gotos.fetch_add(1, Ordering::SeqCst);
        *page.url.lock().unwrap() = url.to_string();
        {
            let mut failing = page.fail_goto.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(BrowserError::NavigationError(format!("connection reset: {}", url)));
            }
        }
        let mut loads = page.loads.lock().unwrap();
        let next = if loads.len() > 1 {
            loads.pop_front()
        } else {
            loads.front().cloned()
        };
        if let Some(html) = next {
            *page.current.lock().unwrap() = html;
        }
        Ok(())
    }

    async fn content(&self) -> Result<String, BrowserError> {
        Ok(self.0.current.lock().unwrap().clone())
    }

    async fn evaluate(
        &self,
        script: &str,
        _await_promise: bool,
    ) -> Result<Option<serde_json::Value>, BrowserError> {
        let page = &self.0;
        page.scripts.lock().unwrap().push(script.to_string());
        if script.contains("scrollTo") {
            if let Some(next) = page.on_scroll.lock().unwrap().pop_front() {
                *page.current.lock().unwrap() = next;
            }
        }
        Ok(Some(serde_json::Value::Bool(true)))
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<(), BrowserError> {
        let start = Instant::now();
        loop {
            if html_has_selector(&self.0.current.lock().unwrap(), selector) {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(BrowserError::Timeout(selector.to_string()));
            }
            sleep(Duration::from_millis(100)).await;
        }
    }

    async fn wait_for_navigation(&self, timeout: Duration) -> Result<(), BrowserError> {
        if !self.0.navigation_fails_fast.load(Ordering::SeqCst) {
            sleep(timeout).await;
        }
        Err(BrowserError::Timeout("navigation".into()))
    }

    async fn move_pointer(&self, _x: f64, _y: f64) -> Result<(), BrowserError> {
        let page = &self.0;
        page.pointer_moves.fetch_add(1, Ordering::SeqCst);
        if let Some(html) = page.after_pointer.lock().unwrap().clone() {
            *page.current.lock().unwrap() = html;
        }
        Ok(())
    }

    fn url(&self) -> String {
        self.0.url.lock().unwrap().clone()
    }
}

/// Worker handing out the same scripted page every time
pub struct FakeWorker {
    pub page: Arc<FakePage>,
    pub pages_opened: AtomicUsize,
}

#[async_trait]
impl Worker for FakeWorker {
    async fn open_page(&self) -> Result<Box<dyn Page>, BrowserError> {
        self.pages_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SharedPage(self.page.clone())))
    }
}

pub struct FakeLauncher {
    pub page: Arc<FakePage>,
    pub launches: AtomicUsize,
    pub delay: Duration,
    failures_left: AtomicUsize,
}

impl FakeLauncher {
    pub fn new(page: Arc<FakePage>) -> Arc<Self> {
        Self::with(page, Duration::ZERO, 0)
    }

    pub fn with(page: Arc<FakePage>, delay: Duration, failures: usize) -> Arc<Self> {
        Arc::new(Self {
            page,
            launches: AtomicUsize::new(0),
            delay,
            failures_left: AtomicUsize::new(failures),
        })
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Arc<dyn Worker>, BrowserError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BrowserError::InitializationError("chrome not found".into()));
        }
        Ok(Arc::new(FakeWorker {
            page: self.page.clone(),
            pages_opened: AtomicUsize::new(0),
        }))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Failure {
    None,
    Search,
    Chapters,
    Images,
}

/// In-memory source with canned answers and call counters
pub struct FakeSource {
    descriptor: SourceDescriptor,
    pub titles: Vec<String>,
    pub chapters: Vec<String>,
    pub images: Vec<String>,
    pub failure: Failure,
    pub delay: Duration,
    pub search_calls: AtomicUsize,
    pub chapter_calls: AtomicUsize,
    pub image_calls: AtomicUsize,
    pub started_at: Mutex<Vec<Instant>>,
}

impl FakeSource {
    pub fn new(id: &str) -> Self {
        Self {
            descriptor: SourceDescriptor {
                id: id.to_string(),
                name: id.to_uppercase(),
                base_url: format!("https://{}.example", id),
                adult: false,
                kind: SourceKind::Api,
            },
            titles: Vec::new(),
            chapters: Vec::new(),
            images: Vec::new(),
            failure: Failure::None,
            delay: Duration::ZERO,
            search_calls: AtomicUsize::new(0),
            chapter_calls: AtomicUsize::new(0),
            image_calls: AtomicUsize::new(0),
            started_at: Mutex::new(Vec::new()),
        }
    }

    pub fn titles(mut self, titles: &[&str]) -> Self {
        self.titles = titles.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn chapters(mut self, numbers: &[&str]) -> Self {
        self.chapters = numbers.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn images(mut self, n: usize) -> Self {
        let id = self.descriptor.id.clone();
        self.images = (1..=n)
            .map(|i| format!("https://cdn.{}.example/data/{:03}.jpg", id, i))
            .collect();
        self
    }

    pub fn failing(mut self, failure: Failure) -> Self {
        self.failure = failure;
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn searches(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn image_requests(&self) -> usize {
        self.image_calls.load(Ordering::SeqCst)
    }

    fn boom(&self) -> ScrapeError {
        ScrapeError::TransientNetwork(format!("{} exploded with secret detail", self.descriptor.id))
    }

    fn chapter_id(&self, number: &str) -> String {
        format!("{}-ch-{}", self.descriptor.id, number)
    }
}

#[async_trait]
impl Source for FakeSource {
    fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }

    async fn search_candidates(&self, _title: &str) -> Result<Vec<SearchCandidate>, ScrapeError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.started_at.lock().unwrap().push(Instant::now());
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
        if self.failure == Failure::Search {
            return Err(self.boom());
        }
        Ok(self
            .titles
            .iter()
            .enumerate()
            .map(|(i, title)| SearchCandidate {
                source_id: self.descriptor.id.clone(),
                title: title.clone(),
                external_id: format!("{}-{}", self.descriptor.id, i),
                url: format!("{}/title/{}", self.descriptor.base_url, i),
                cover_url: None,
                alt_titles: Vec::new(),
            })
            .collect())
    }

    async fn get_chapters(&self, external_id: &str, url: &str) -> Result<ChaptersResult, ScrapeError> {
        self.chapter_calls.fetch_add(1, Ordering::SeqCst);
        if self.failure == Failure::Chapters {
            return Err(self.boom());
        }
        let chapters = self
            .chapters
            .iter()
            .map(|n| ChapterDescriptor {
                id: self.chapter_id(n),
                chapter: n.clone(),
                title: None,
                published_at: None,
                url: format!("{}/read/{}", self.descriptor.base_url, n),
                source: self.descriptor.id.clone(),
                language: None,
            })
            .collect();
        Ok(ChaptersResult::new(
            chapters,
            SourceRef {
                name: self.descriptor.name.clone(),
                url: url.to_string(),
                title_id: external_id.to_string(),
            },
        ))
    }

    async fn get_chapter_images(&self, _chapter: &ChapterDescriptor) -> Result<Vec<String>, ScrapeError> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        if self.failure == Failure::Images {
            return Err(self.boom());
        }
        Ok(self.images.clone())
    }
}
