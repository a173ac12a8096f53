//! Retry strategies for generation calls.
//!
//! `SkipOnError` makes a single attempt. `ExponentialBackoff` retries
//! retriable failures with delay `min(base * 2^n, max)` for attempt `n`.
//! A rate-limit reply carrying `Retry-After` stretches that delay up to the
//! server's hint, still capped at `max`.
//! Either way the caller ends up with a `Result`; turning the final error
//! into a failed outcome is the orchestrator's job.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::provider::ProviderError;

/// Upper bound on a single backoff sleep.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetryPolicy {
    #[default]
    SkipOnError,
    ExponentialBackoff {
        max_retries: u32,
        base_delay: Duration,
        max_delay: Duration,
    },
}

impl RetryPolicy {
    pub fn backoff(max_retries: u32, base_delay: Duration) -> Self {
        Self::ExponentialBackoff {
            max_retries,
            base_delay,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SkipOnError => "skip_on_error",
            Self::ExponentialBackoff { .. } => "exponential_backoff",
        }
    }

    /// Total attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::SkipOnError => 1,
            Self::ExponentialBackoff { max_retries, .. } => max_retries.saturating_add(1),
        }
    }

    /// Sleep before retrying after failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            Self::SkipOnError => Duration::ZERO,
            Self::ExponentialBackoff {
                base_delay,
                max_delay,
                ..
            } => 2u32
                .checked_pow(attempt)
                .and_then(|factor| base_delay.checked_mul(factor))
                .map_or(*max_delay, |d| d.min(*max_delay)),
        }
    }

    /// Sleep before retrying after `error` on attempt `attempt`.
    pub fn delay_after(&self, attempt: u32, error: &ProviderError) -> Duration {
        let backoff = self.delay_for(attempt);
        match (self, error) {
            (
                Self::ExponentialBackoff { max_delay, .. },
                ProviderError::RateLimited {
                    retry_after: Some(hint),
                },
            ) => backoff.max(*hint).min(*max_delay),
            _ => backoff,
        }
    }

    /// Run `op` under this policy. `op` receives the 0-based attempt number.
    pub async fn execute<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let attempts = self.max_attempts();
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retriable() => return Err(e),
                Err(e) if attempt + 1 >= attempts => {
                    if attempts > 1 {
                        warn!(call = label, attempts, error = %e, "All attempts failed");
                    }
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay_after(attempt, &e);
                    info!(
                        call = label,
                        attempt = attempt + 1,
                        delay_secs = delay.as_secs_f64(),
                        error = %e,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
