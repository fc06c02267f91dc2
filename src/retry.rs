//! Retry with exponential backoff for backend calls.

use std::future::Future;
use std::time::Duration;

use crate::error::Result;
use crate::observability::{BACKEND_RETRIES, BACKEND_RETRY_BACKOFF};

/// Default number of attempts, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Default delay before the first retry; doubles on each further retry.
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_secs(1);

/// Default cap on a single delay.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Whether repeating a call is safe.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Idempotency {
    /// Repeating the call has no additional effect; it may be retried.
    Idempotent,
    /// Repeating the call may duplicate its effect; it is tried once.
    NonIdempotent,
}

/// How often and how patiently to retry a failing call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.  Zero behaves like one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Sets the total number of attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the delay before the first retry.
    pub fn with_base_backoff(mut self, base_backoff: Duration) -> Self {
        self.base_backoff = base_backoff;
        self
    }

    /// Sets the cap on any single delay.
    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Delay before retry number `retry` (zero-based).
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Runs `call` until it succeeds, fails with a non-retryable error, or
    /// runs out of attempts.  Non-idempotent calls run exactly once.
    pub async fn run<T, F, Fut>(&self, what: &str, idempotency: Idempotency, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = match idempotency {
            Idempotency::Idempotent => self.max_attempts.max(1),
            Idempotency::NonIdempotent => 1,
        };
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < attempts && err.is_retryable() => {
                    let delay = self.backoff_delay(attempt - 1);
                    tracing::warn!(
                        what,
                        attempt,
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "backend call failed, retrying"
                    );
                    BACKEND_RETRIES.click();
                    BACKEND_RETRY_BACKOFF.add(delay.as_secs_f64());
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_backoff: DEFAULT_BASE_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}
