// src/pipeline/backoff.rs

//! Retry policies for provider throttling and notification delivery.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::{FetchConfig, NotifyConfig};

/// How a fetcher reacts to throttling and provider outages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Total requests allowed for one page, including the first.
    pub max_attempts: u32,
    /// Delay used when the provider gives no reset hint.
    pub fallback: Duration,
}

impl RateLimitPolicy {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            max_attempts: config.rate_limit_attempts.max(1),
            fallback: Duration::from_secs(config.rate_limit_fallback_secs),
        }
    }

    /// Delay before retrying after `error`: the provider hint if present.
    pub fn delay(&self, error: &AppError) -> Duration {
        error.retry_after().unwrap_or(self.fallback)
    }

    /// Run `op` until it succeeds, fails permanently, or the bound is used up.
    ///
    /// Only transient errors are retried. Exhaustion is reported as
    /// `RateLimitExhausted` for `source_name`.
    pub async fn run<T, F, Fut>(
        &self,
        source_name: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    if attempt >= self.max_attempts {
                        log::error!(
                            "r/{}: giving up after {} attempts: {}",
                            source_name,
                            attempt,
                            err
                        );
                        return Err(AppError::RateLimitExhausted {
                            source_name: source_name.to_string(),
                            attempts: attempt,
                        });
                    }
                    let delay = self.delay(&err);
                    log::warn!(
                        "r/{}: {} (attempt {}/{}), retrying in {:?}",
                        source_name,
                        err,
                        attempt,
                        self.max_attempts,
                        delay
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(AppError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Exponential backoff for bounded retries of a whole operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn from_config(config: &NotifyConfig) -> Self {
        Self {
            initial_delay: Duration::from_secs(config.initial_delay_secs),
            multiplier: config.multiplier,
            max_delay: Duration::from_secs(config.max_delay_secs),
            max_attempts: config.max_attempts.max(1),
        }
    }

    /// Policy for the queue-drain and cursor-advance transaction.
    pub fn for_commit(max_attempts: u32) -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            multiplier: 2.0,
            max_delay: Duration::from_secs(2),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Delay after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let scaled = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()).max(0.0))
    }

    /// Run `op` up to `max_attempts` times, sleeping between failures.
    pub async fn retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_attempts => {
                    let delay = self.delay_after(attempt);
                    log::warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        what,
                        attempt,
                        self.max_attempts,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
