//! Retry combinator with exponential backoff

use rand::Rng;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::types::{Result, TransportError};

/// Decides whether a failed attempt may be retried
pub type RetryPredicate = fn(&TransportError) -> bool;

fn default_should_retry(err: &TransportError) -> bool {
    err.is_retryable()
}

/// Retry behavior for pipeline requests. Immutable once the pipeline is built.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    /// Upper bound of random delay added to each backoff
    pub jitter: Duration,
    pub should_retry: RetryPredicate,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(10_000),
            backoff_factor: 2.0,
            jitter: Duration::ZERO,
            should_retry: default_should_retry,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_factor", &self.backoff_factor)
            .field("jitter", &self.jitter)
            .finish()
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// `min(base_delay * backoff_factor^retry, max_delay)` plus jitter.
    /// `retry` is zero for the wait after the first failure.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = self.backoff_factor.max(1.0).powi(retry.min(64) as i32);
        let raw_ms = self.base_delay.as_millis() as f64 * exp;
        let capped_ms = raw_ms.min(self.max_delay.as_millis() as f64);
        let mut delay = Duration::from_millis(capped_ms as u64);
        if !self.jitter.is_zero() {
            let jitter_ms = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
            delay += Duration::from_millis(jitter_ms);
        }
        delay
    }
}

/// Result of running an operation under a retry policy
#[derive(Debug)]
pub enum RetryOutcome<T> {
    Succeeded { value: T, attempts: u32 },
    /// Every allowed attempt failed with a retryable error
    Exhausted { error: TransportError, attempts: u32 },
    /// An attempt failed with an error the policy does not retry
    Rejected { error: TransportError, attempts: u32 },
}

impl<T> RetryOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Succeeded { attempts, .. }
            | Self::Exhausted { attempts, .. }
            | Self::Rejected { attempts, .. } => *attempts,
        }
    }

    /// Surface the last attempt's error verbatim
    pub fn into_result(self) -> Result<T> {
        match self {
            Self::Succeeded { value, .. } => Ok(value),
            Self::Exhausted { error, .. } | Self::Rejected { error, .. } => Err(error),
        }
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the policy
/// runs out of attempts. `op` receives the 1-based attempt number.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> RetryOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return RetryOutcome::Succeeded { value, attempts: attempt },
            Err(error) => {
                if !(policy.should_retry)(&error) {
                    return RetryOutcome::Rejected { error, attempts: attempt };
                }
                if attempt >= max_attempts {
                    return RetryOutcome::Exhausted { error, attempts: attempt };
                }

                let delay = policy.delay_for(attempt - 1);
                warn!(
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying after failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
