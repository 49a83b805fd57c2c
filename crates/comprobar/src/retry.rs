//! Retry with exponential backoff for UI interactions.
//!
//! Interactions against a live page race with rendering, so click/fill/select
//! get a bounded number of extra attempts before the step is failed.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::result::HarnessResult;

/// Backoff configuration for retried interactions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the first retry (ms)
    pub initial_backoff_ms: u64,
    /// Multiplier applied after every retry
    pub multiplier: f64,
    /// Upper bound for a single delay (ms)
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 100,
            multiplier: 2.0,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with a fixed delay between attempts
    #[must_use]
    pub const fn fixed(delay_ms: u64) -> Self {
        Self {
            initial_backoff_ms: delay_ms,
            multiplier: 1.0,
            max_backoff_ms: delay_ms,
        }
    }

    /// Set the initial backoff
    #[must_use]
    pub const fn with_initial_backoff(mut self, ms: u64) -> Self {
        self.initial_backoff_ms = ms;
        self
    }

    /// Set the maximum backoff
    #[must_use]
    pub const fn with_max_backoff(mut self, ms: u64) -> Self {
        self.max_backoff_ms = ms;
        self
    }

    /// Delay before retry number `retry` (1-based)
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.max(1.0).powi(retry.saturating_sub(1) as i32);
        let ms = (self.initial_backoff_ms as f64 * factor).min(self.max_backoff_ms as f64);
        Duration::from_millis(ms as u64)
    }

    /// Run `attempt` up to `retries + 1` times.
    ///
    /// Only errors reporting [`is_retryable`](crate::HarnessError::is_retryable)
    /// trigger another attempt; the last error is returned otherwise.
    pub async fn run<T, F, Fut>(&self, retries: u32, mut attempt: F) -> HarnessResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = HarnessResult<T>>,
    {
        let mut tried = 0;
        loop {
            match attempt(tried).await {
                Ok(value) => return Ok(value),
                Err(err) if tried < retries && err.is_retryable() => {
                    tried += 1;
                    tracing::debug!(retry = tried, error = %err, "retrying interaction");
                    tokio::time::sleep(self.backoff(tried)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
