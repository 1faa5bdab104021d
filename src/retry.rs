//! Exponential backoff shared by step execution and the embedding queue.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::types::RetryPolicy;

/// Retry ceiling plus exponential delay schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    /// Retries allowed after the first attempt
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
}

impl Backoff {
    pub fn new(max_retries: u32, base_delay_ms: u64, multiplier: f64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            multiplier,
        }
    }

    /// Delay preceding retry number `retry_count` (1-based):
    /// `base * multiplier^(retry_count - 1)`.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        if retry_count == 0 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.powi(retry_count.saturating_sub(1) as i32);
        let ms = (self.base_delay_ms as f64 * factor).max(0.0);
        Duration::from_millis(ms.min(u64::MAX as f64) as u64)
    }

    /// Total attempts including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl From<&RetryPolicy> for Backoff {
    fn from(policy: &RetryPolicy) -> Self {
        Self::new(
            policy.max_retries,
            policy.backoff_ms,
            policy.backoff_multiplier,
        )
    }
}

/// Every attempt failed.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// Run `f` until it succeeds or the backoff's retries are used up, sleeping
/// between failed attempts only.
pub async fn retry_with_backoff<T, E, F, Fut>(
    mut f: F,
    backoff: &Backoff,
    operation: &str,
) -> Result<T, RetryExhausted<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = backoff.max_attempts();
    let mut attempt = 1;

    loop {
        match f(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!(
                    "{} failed (attempt {}/{}): {}",
                    operation, attempt, max_attempts, e
                );
                if attempt >= max_attempts {
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }
                let delay = backoff.delay_for(attempt);
                debug!("Retrying {} in {}ms", operation, delay.as_millis());
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
