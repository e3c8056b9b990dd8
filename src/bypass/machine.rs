//! Challenge bypass as an explicit state machine
//!
//! [`transition`] is pure: it maps the current state and an observation to
//! the next state. [`Navigator`] performs the I/O for each state (load, wait,
//! mitigate) and feeds what it observed back through `transition`.

use super::detect::{classify_page, is_challenge_page, PageVerdict};
use crate::browser::Page;
use crate::config::BypassSettings;
use crate::error::ScrapeError;
use rand::Rng;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassState {
    Loading { attempt: u32 },
    ChallengeDetected { attempt: u32 },
    Mitigating { attempt: u32 },
    ContentValid,
    Exhausted { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassEvent {
    /// The page was inspected after a load or a mitigation round
    Observed(PageVerdict),
    /// Navigation itself failed (network error, timeout)
    NavigationFailed,
    MitigationStarted,
}

impl BypassState {
    pub fn initial() -> Self {
        BypassState::Loading { attempt: 1 }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BypassState::ContentValid | BypassState::Exhausted { .. })
    }
}

fn retry_or_exhaust(attempt: u32, max_retries: u32, next: fn(u32) -> BypassState) -> BypassState {
    if attempt >= max_retries {
        BypassState::Exhausted { attempts: attempt }
    } else {
        next(attempt + 1)
    }
}

/// Next state for `state` after `event`. Terminal states absorb every event.
pub fn transition(state: BypassState, event: BypassEvent, max_retries: u32) -> BypassState {
    use BypassEvent::*;
    use BypassState::*;

    let max_retries = max_retries.max(1);
    match (state, event) {
        (ContentValid, _) | (Exhausted { .. }, _) => state,

        (Loading { .. }, Observed(PageVerdict::Valid)) => ContentValid,
        (Loading { attempt }, Observed(PageVerdict::Challenge)) => ChallengeDetected { attempt },
        (Loading { attempt }, Observed(PageVerdict::Invalid)) | (Loading { attempt }, NavigationFailed) => {
            retry_or_exhaust(attempt, max_retries, |attempt| Loading { attempt })
        }
        (Loading { .. }, MitigationStarted) => state,

        (ChallengeDetected { attempt }, MitigationStarted) => Mitigating { attempt },
        (ChallengeDetected { .. }, _) => state,

        (Mitigating { .. }, Observed(PageVerdict::Valid)) => ContentValid,
        (Mitigating { attempt }, Observed(PageVerdict::Challenge)) => {
            retry_or_exhaust(attempt, max_retries, |attempt| ChallengeDetected { attempt })
        }
        (Mitigating { attempt }, Observed(PageVerdict::Invalid))
        | (Mitigating { attempt }, NavigationFailed) => {
            retry_or_exhaust(attempt, max_retries, |attempt| Loading { attempt })
        }
        (Mitigating { .. }, MitigationStarted) => state,
    }
}

#[derive(Debug, Clone)]
pub struct BypassConfig {
    pub max_retries: u32,
    pub jitter_min: Duration,
    pub jitter_max: Duration,
    pub mitigation_timeout: Duration,
    pub pointer_moves: u32,
    pub content_wait: Duration,
}

impl Default for BypassConfig {
    fn default() -> Self {
        Self::from(&BypassSettings::default())
    }
}

impl From<&BypassSettings> for BypassConfig {
    fn from(s: &BypassSettings) -> Self {
        Self {
            max_retries: s.max_retries,
            jitter_min: Duration::from_millis(s.jitter_min_ms),
            jitter_max: Duration::from_millis(s.jitter_max_ms.max(s.jitter_min_ms)),
            mitigation_timeout: Duration::from_millis(s.mitigation_timeout_ms),
            pointer_moves: s.pointer_moves,
            content_wait: Duration::from_millis(s.content_wait_ms),
        }
    }
}

/// Drives a [`Page`] to a URL through the bypass state machine
pub struct Navigator {
    config: BypassConfig,
}

impl Navigator {
    pub fn new(config: BypassConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BypassConfig {
        &self.config
    }

    /// Load `url` until `content_selectors` match on a clean page.
    ///
    /// Returns the serialized DOM of the valid page. Fails with
    /// `ChallengeUnresolved` when a challenge was seen and never cleared,
    /// otherwise with `NoContentFound`.
    pub async fn navigate(
        &self,
        page: &dyn Page,
        url: &str,
        content_selectors: &[String],
    ) -> Result<String, ScrapeError> {
        let started = Instant::now();
        let mut state = BypassState::initial();
        let mut last_html = String::new();
        let mut saw_challenge = false;

        loop {
            state = match state {
                BypassState::Loading { attempt } => {
                    self.jitter(attempt).await;
                    log::debug!("Loading {} (attempt {}/{})", url, attempt, self.config.max_retries);

                    let event = match page.goto(url).await {
                        Ok(()) => {
                            let (verdict, html) = self.observe(page, content_selectors).await;
                            last_html = html;
                            BypassEvent::Observed(verdict)
                        }
                        Err(e) => {
                            log::warn!("Navigation to {} failed on attempt {}: {}", url, attempt, e);
                            BypassEvent::NavigationFailed
                        }
                    };
                    transition(state, event, self.config.max_retries)
                }
                BypassState::ChallengeDetected { attempt } => {
                    saw_challenge = true;
                    log::info!("Challenge detected on {} (attempt {})", url, attempt);
                    transition(state, BypassEvent::MitigationStarted, self.config.max_retries)
                }
                BypassState::Mitigating { .. } => {
                    self.mitigate(page).await;
                    let (verdict, html) = self.observe(page, content_selectors).await;
                    last_html = html;
                    transition(state, BypassEvent::Observed(verdict), self.config.max_retries)
                }
                BypassState::ContentValid => {
                    log::debug!(
                        "Valid content at {} after {}ms",
                        url,
                        started.elapsed().as_millis()
                    );
                    return Ok(last_html);
                }
                BypassState::Exhausted { attempts } => {
                    log::warn!(
                        "Giving up on {} after {} attempts ({}ms, challenge seen: {})",
                        url,
                        attempts,
                        started.elapsed().as_millis(),
                        saw_challenge
                    );
                    return Err(if saw_challenge {
                        ScrapeError::ChallengeUnresolved {
                            url: url.to_string(),
                            attempts,
                        }
                    } else {
                        ScrapeError::NoContentFound(format!("no valid content at {}", url))
                    });
                }
            };
        }
    }

    /// Randomized pre-attempt delay, scaled by the attempt number
    async fn jitter(&self, attempt: u32) {
        let delay = {
            let min = self.config.jitter_min.as_millis() as u64;
            let max = self.config.jitter_max.as_millis() as u64;
            let base = if max > min {
                rand::thread_rng().gen_range(min..=max)
            } else {
                min
            };
            Duration::from_millis(base.saturating_mul(attempt as u64))
        };
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }

    /// Poll the page until it is either valid or a challenge, or until the
    /// content wait runs out
    async fn observe(&self, page: &dyn Page, content_selectors: &[String]) -> (PageVerdict, String) {
        let start = Instant::now();
        loop {
            let html = match page.content().await {
                Ok(html) => html,
                Err(e) => {
                    log::debug!("Could not read page content: {}", e);
                    String::new()
                }
            };
            let verdict = classify_page(&html, content_selectors);
            if verdict != PageVerdict::Invalid || start.elapsed() >= self.config.content_wait {
                return (verdict, html);
            }
            sleep(Duration::from_millis(500)).await;
        }
    }

    /// Short wait, a few pointer movements, then race "challenge cleared"
    /// against a navigation under the mitigation timeout
    async fn mitigate(&self, page: &dyn Page) {
        let moves: Vec<(f64, f64, u64)> = {
            let mut rng = rand::thread_rng();
            (0..self.config.pointer_moves)
                .map(|_| {
                    (
                        rng.gen_range(100.0..800.0),
                        rng.gen_range(100.0..600.0),
                        rng.gen_range(80..250),
                    )
                })
                .collect()
        };

        sleep(Duration::from_millis(1000)).await;
        for (x, y, pause_ms) in moves {
            if let Err(e) = page.move_pointer(x, y).await {
                log::debug!("Pointer move failed: {}", e);
            }
            sleep(Duration::from_millis(pause_ms)).await;
        }

        let cleared = async {
            loop {
                if let Ok(html) = page.content().await {
                    if !is_challenge_page(&html) {
                        return;
                    }
                }
                sleep(Duration::from_millis(500)).await;
            }
        };
        // A failed navigation wait is not a win; leave the race to the others
        let navigated = async {
            if let Err(e) = page.wait_for_navigation(self.config.mitigation_timeout).await {
                log::debug!("No navigation during mitigation: {}", e);
                std::future::pending::<()>().await;
            }
        };

        let raced = timeout(self.config.mitigation_timeout, async {
            tokio::select! {
                _ = cleared => "challenge cleared",
                _ = navigated => "navigation",
            }
        })
        .await;

        match raced {
            Ok(outcome) => log::debug!("Mitigation finished: {}", outcome),
            Err(_) => log::debug!(
                "Mitigation timed out after {}ms",
                self.config.mitigation_timeout.as_millis()
            ),
        }
    }
}
