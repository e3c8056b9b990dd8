use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Run `operation` until it succeeds or `max_attempts` consecutive attempts have failed.
///
/// The delay between attempts is fixed. Only the last error is returned; earlier
/// ones are logged at debug level and dropped. Callers that need escalating backoff
/// (the bypass navigator, for one) implement it themselves.
pub async fn retry<T, E, F, Fut>(operation: F, max_attempts: u32, delay: Duration) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    retry_if(operation, max_attempts, delay, |_| true).await
}

/// Like [`retry`], but gives up immediately when `should_retry` rejects the error
pub async fn retry_if<T, E, F, Fut, P>(
    mut operation: F,
    max_attempts: u32,
    delay: Duration,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt >= max_attempts || !should_retry(&e) {
                    return Err(e);
                }
                log::debug!(
                    "Attempt {}/{} failed, retrying in {}ms: {}",
                    attempt,
                    max_attempts,
                    delay.as_millis(),
                    e
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
