//! Multi-source manga scraping engine
//!
//! Searches a registry of providers in bounded concurrent batches, lists
//! chapters and extracts chapter images through a shared headless browser.
//! Render-backed sources go through challenge detection and a bypass state
//! machine before any content is read.

pub mod aggregator;
pub mod app_state;
pub mod browser;
pub mod bypass;
pub mod cache;
pub mod config;
pub mod error;
pub mod extract;
pub mod helpers;
pub mod http_client;
pub mod metrics;
pub mod models;
pub mod queue;
pub mod rate_limiter;
pub mod retry;
pub mod service;
pub mod sources;

pub use error::{ApiError, ScrapeError};
