// * Bounded retry with exponential backoff.
// * The single retry primitive for the crate: the downloader wraps per-item
// * fetches in it and the static engine wraps its page GET, so retry
// * behavior is uniform instead of scattered ad hoc loops.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
        }
    }
}

// * Runs `op` up to `max_attempts` times, doubling the backoff after each
// * failure. The final error is returned unchanged.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut backoff = policy.initial_backoff;
    let mut attempt = 0_u32;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= policy.max_attempts => return Err(err),
            Err(err) => {
                warn!(
                    "{} failed (attempt {}/{}): {} - retrying in {:?}",
                    label, attempt, policy.max_attempts, err, backoff
                );
                if !backoff.is_zero() {
                    tokio::time::sleep(backoff).await;
                }
                backoff = backoff.saturating_mul(2);
            }
        }
    }
}
