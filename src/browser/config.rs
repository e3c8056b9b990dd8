use serde::Deserialize;
use std::time::Duration;

/// Flags passed to every Chrome worker to reduce automation fingerprints
pub const STEALTH_FLAGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-dev-shm-usage",
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-features=IsolateOrigins,site-per-process",
];

/// Configuration for rendering workers and the pages they open
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Run browser in headless mode
    pub headless: bool,

    /// Browser window size, also applied as the viewport of each page
    pub window_size: (u32, u32),

    /// Fixed user agent; when unset each page gets a rotated realistic one
    pub user_agent: Option<String>,

    /// Navigation and selector wait timeout in seconds
    pub timeout_seconds: u64,

    /// Close the worker after this long without any CDP traffic
    pub idle_timeout_seconds: u64,

    /// Additional Chrome flags
    pub chrome_flags: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_size: (1920, 1080),
            user_agent: None,
            timeout_seconds: 30,
            idle_timeout_seconds: 600,
            chrome_flags: vec![],
        }
    }
}

impl BrowserConfig {
    /// Stealth defaults followed by any configured extras, without duplicates
    pub fn launch_flags(&self) -> Vec<String> {
        let mut flags: Vec<String> = STEALTH_FLAGS.iter().map(|f| f.to_string()).collect();
        for flag in &self.chrome_flags {
            if !flags.contains(flag) {
                flags.push(flag.clone());
            }
        }
        flags
    }

    /// Get timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }
}
