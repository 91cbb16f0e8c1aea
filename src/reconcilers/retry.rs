//! Optimistic-concurrency retry for read-modify-write cycles
//!
//! Every write carries the version token of the object it was derived from.
//! When the API server rejects a stale token, the whole cycle (fresh read,
//! recompute, write) runs again with exponential backoff.

use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

use crate::{Error, Result};

/// Backoff settings for conflict retries
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first conflict
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }
}

/// Whether a write failure is cured by re-reading and trying again
fn is_write_race(err: &Error) -> bool {
    matches!(err, Error::Conflict { .. } | Error::AlreadyExists { .. })
}

/// Run `operation` until it succeeds, fails with a non-race error, or the
/// attempts run out. Exhaustion surfaces the last race error, which is
/// retryable at the controller level.
pub async fn retry_on_conflict<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if is_write_race(&e) && attempt < config.max_attempts => {
                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Write raced with another writer, retrying with a fresh read"
                );
                tokio::time::sleep(delay).await;
                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_multiplier)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
            Err(e) => {
                if is_write_race(&e) {
                    error!(
                        operation = %operation_name,
                        attempt,
                        error = %e,
                        "Write still racing after max retries"
                    );
                }
                return Err(e);
            }
        }
    }
}
