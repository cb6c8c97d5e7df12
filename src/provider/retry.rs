//! Retry utilities: backoff builders for provider calls.
//!
//! Uses `backon` for exponential backoff with jitter instead of sleeping a
//! fixed interval after every rate-limit response.

use std::time::Duration;

use backon::ExponentialBuilder;

/// Backoff settings for calls against one provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    /// - Min delay: 200ms
    /// - Max delay: 10s
    /// - Retries: 3
    fn default() -> Self {
        Self {
            max_retries: 3,
            min_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// A policy that never waits long; for tests and local fixtures
    pub fn immediate(max_retries: usize) -> Self {
        Self {
            max_retries,
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    /// Exponential backoff with jitter for reads and idempotent writes
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries)
            .with_jitter()
    }
}
