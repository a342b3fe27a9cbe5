//! Retry on optimistic-concurrency conflicts.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::store::StoreError;

/// Retry configuration with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        }
    }
}

/// Errors that can tell a version conflict apart from other failures.
pub trait ConflictError: Display {
    fn is_conflict(&self) -> bool;
}

impl ConflictError for StoreError {
    fn is_conflict(&self) -> bool {
        StoreError::is_conflict(self)
    }
}

/// Run `f` until it succeeds, fails with a non-conflict error, or
/// `max_attempts` conflicts in a row have been seen.
///
/// `f` must re-read the object it writes on every call; retrying a write of
/// the same stale copy can never succeed.
pub async fn retry_on_conflict<T, E, F, Fut>(
    config: &RetryConfig,
    operation_name: &str,
    mut f: F,
) -> Result<T, E>
where
    E: ConflictError,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_conflict() && attempt < config.max_attempts => {
                debug!(
                    "{operation_name} conflicted (attempt {attempt}/{}): {e}. Retrying in {delay:?}...",
                    config.max_attempts
                );
                tokio::time::sleep(delay).await;
                // NaN or overflowing products fall back to the cap.
                let next = Duration::try_from_secs_f64(
                    delay.as_secs_f64() * config.backoff_multiplier,
                )
                .unwrap_or(config.max_delay);
                delay = std::cmp::min(config.max_delay, next);
            }
            Err(e) => {
                if e.is_conflict() {
                    warn!("{operation_name} still conflicting after {attempt} attempts: {e}");
                }
                return Err(e);
            }
        }
    }
}
