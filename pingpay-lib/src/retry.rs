//! Bounded exponential backoff for idempotent collaborator calls.
//!
//! Only errors whose [`crate::PingPayError::is_retryable`] is true are retried.
//! Validation failures and rejections return on the first attempt.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Initial delay between retries in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Backoff multiplier (delay *= multiplier after each retry).
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Maximum delay between retries.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    10_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set the maximum number of attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the initial delay.
    pub fn with_initial_delay_ms(mut self, delay_ms: u64) -> Self {
        self.initial_delay_ms = delay_ms;
        self
    }

    /// Set the maximum delay.
    pub fn with_max_delay_ms(mut self, delay_ms: u64) -> Self {
        self.max_delay_ms = delay_ms;
        self
    }

    fn next_delay(&self, current_ms: u64) -> u64 {
        let next = (current_ms as f64 * self.backoff_multiplier) as u64;
        next.min(self.max_delay_ms)
    }
}

/// Execute an async operation with retry.
///
/// A delay requested by the remote side ([`crate::PingPayError::retry_after_ms`])
/// takes precedence over the backoff schedule, capped at `max_delay_ms`.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay_ms = config.initial_delay_ms;
    let mut attempts = 0;

    loop {
        attempts += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() || attempts >= config.max_attempts.max(1) => {
                return Err(e)
            }
            Err(e) => {
                let wait_ms = e
                    .retry_after_ms()
                    .map_or(delay_ms, |requested| requested.min(config.max_delay_ms));
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    operation,
                    attempt = attempts,
                    wait_ms,
                    error = %e,
                    "retrying after retryable error"
                );
                #[cfg(not(feature = "tracing"))]
                let _ = (operation, &e);
                tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                delay_ms = config.next_delay(delay_ms);
            }
        }
    }
}
