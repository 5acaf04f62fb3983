//! Bounded retries for rate-limited network calls.
//!
//! Attempts are strictly sequential. Between two attempts the executor sleeps
//! `initial_backoff * 2^(attempt-1)`, unless the failure carries a
//! [`RateLimited`] error somewhere in its chain, in which case the
//! service-supplied wait is used verbatim.
//!
//! Backoff with the 2s default: 2s → 4s → 8s → 16s.

use std::future::Future;
use std::time::Duration;

use log::warn;
use thiserror::Error;
use tokio::time::sleep;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF_SHIFT: u32 = 16;

/// A service told us to slow down and how long to wait.
#[derive(Debug, Clone, Error)]
#[error("rate limited by remote service (retry after {retry_after:?})")]
pub struct RateLimited {
    pub retry_after: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_INITIAL_BACKOFF)
    }
}

impl RetryPolicy {
    /// A `max_attempts` of 0 means a single attempt.
    pub fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
        }
    }

    /// Exponential delay after the given (1-based) failed attempt.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        self.initial_backoff.saturating_mul(1u32 << shift)
    }

    /// Runs `operation` until it succeeds or the attempts are exhausted.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut attempt = 1;
        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if attempt >= self.max_attempts {
                return Err(err.context(format!(
                    "operation failed after {} attempts",
                    self.max_attempts
                )));
            }

            let delay = match requested_wait(&err) {
                Some(wait) => {
                    warn!(
                        "Hit rate limit on attempt {}, backing off for {:?}: {:#}",
                        attempt, wait, err
                    );
                    wait
                }
                None => {
                    let backoff = self.backoff_for(attempt);
                    warn!(
                        "Attempt {} failed, retrying in {:?}: {:#}",
                        attempt, backoff, err
                    );
                    backoff
                }
            };

            sleep(delay).await;
            attempt += 1;
        }
    }
}

/// Wait duration demanded by the service, if the error chain carries one.
pub(crate) fn requested_wait(err: &anyhow::Error) -> Option<Duration> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<RateLimited>())
        .map(|limited| limited.retry_after)
        .filter(|wait| !wait.is_zero())
}
