//! Rendering workers for sources that need JavaScript or sit behind
//! anti-bot challenges
//!
//! A [`BrowserPool`] owns at most one [`Worker`] (a headless Chrome process
//! in production) and hands out [`WorkerLease`]s. Each lease opens fresh
//! [`Page`]s that carry per-request customisation.
//!
//! ```no_run
//! use manga_aggregator::browser::{BrowserConfig, BrowserPool, ChromeLauncher};
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), manga_aggregator::browser::BrowserError> {
//! let pool = BrowserPool::new(Arc::new(ChromeLauncher::new(BrowserConfig::default())));
//! let lease = pool.acquire().await?;
//! let page = lease.open_page().await?;
//! page.goto("https://example.com").await?;
//! let html = page.content().await?;
//! println!("Extracted {} bytes of HTML", html.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod manager;
pub mod page;
pub mod pool;

pub use config::BrowserConfig;
pub use manager::{BrowserError, BrowserManager, ChromeLauncher};
pub use page::{ChromePage, Page};
pub use pool::{BrowserPool, Worker, WorkerLauncher, WorkerLease};
