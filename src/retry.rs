//! Retry with exponential backoff, for callers that want it outside the
//! scheduler's own task-granularity retry (see `workflow::scheduler`).
//!
//! # Examples
//!
//! ```rust,no_run
//! use open_agent::retry::{retry_with_backoff, RetryConfig};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RetryConfig::default()
//!     .with_max_attempts(4)
//!     .with_initial_delay(Duration::from_millis(250));
//!
//! let result = retry_with_backoff(config, || async {
//!     Ok::<_, open_agent::Error>(42)
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 1.8,
            jitter_factor: 0.15,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn with_jitter_factor(mut self, jitter: f64) -> Self {
        self.jitter_factor = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before the attempt numbered `attempt` (0-indexed), capped at
    /// `max_delay` and perturbed by a one-sided random jitter up to
    /// `jitter_factor` of the capped value — avoids every retrying caller
    /// waking up on the exact same schedule.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let uncapped_ms = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped_ms = uncapped_ms.min(self.max_delay.as_millis() as f64);
        let jitter_ms = rand::random::<f64>() * capped_ms * self.jitter_factor;
        Duration::from_millis((capped_ms + jitter_ms).round() as u64)
    }
}

async fn run_retry_loop<F, Fut, T>(config: RetryConfig, mut operation: F, stop_on: impl Fn(&Error) -> bool) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..config.max_attempts {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if stop_on(&err) {
                    return Err(err);
                }
                let is_last = attempt + 1 == config.max_attempts;
                if !is_last {
                    let delay = config.delay_for_attempt(attempt);
                    debug!(attempt, ?delay, "retrying after error");
                    sleep(delay).await;
                }
                last_error = Some(err);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::other("retry failed with no error")))
}

/// Retry an async operation unconditionally with exponential backoff.
pub async fn retry_with_backoff<F, Fut, T>(config: RetryConfig, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    run_retry_loop(config, operation, |_| false).await
}

/// Retry only errors classified as retryable per `Error::is_retryable`; a
/// configuration or validation error fails fast instead of burning attempts.
pub async fn retry_with_backoff_conditional<F, Fut, T>(config: RetryConfig, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    run_retry_loop(config, operation, |err| !err.is_retryable()).await
}
