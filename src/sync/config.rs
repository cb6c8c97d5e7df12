//! Pipeline settings

use crate::provider::{ClientConfig, RetryPolicy};
use chrono::{DateTime, NaiveDate, Utc};
use std::time::Duration;

/// Settings for one pipeline; built from CLI flags by the binary
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Look-back window for provider transactions, in days
    pub window_days: u32,

    /// Cycles the scheduler runs before stopping
    pub cycles: u64,

    /// Time between cycle triggers
    pub interval: Duration,

    /// Accounts recomputed or reconciled at the same time
    pub max_concurrent: usize,

    /// Upper bound for one provider's ingestion branch
    pub provider_timeout: Duration,

    /// Upper bound for a whole cycle
    pub cycle_timeout: Duration,

    pub retry: RetryPolicy,
    pub page_size: usize,

    /// Categories a group limit is set for
    pub limit_categories: Vec<String>,

    /// Fixed evaluation time; `None` means the wall clock
    pub as_of: Option<DateTime<Utc>>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            window_days: 3,
            cycles: 1,
            interval: Duration::from_secs(60),
            max_concurrent: num_cpus::get(),
            provider_timeout: Duration::from_secs(30),
            cycle_timeout: Duration::from_secs(600),
            retry: RetryPolicy::default(),
            page_size: 500,
            limit_categories: vec!["fuel".to_string()],
            as_of: None,
        }
    }
}

impl SyncConfig {
    pub fn now(&self) -> DateTime<Utc> {
        self.as_of.unwrap_or_else(Utc::now)
    }

    /// Date overdraft expiry is evaluated against
    pub fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    /// Settings for the provider clients of this pipeline
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            page_size: self.page_size,
            call_timeout: self.provider_timeout,
            retry: self.retry,
            as_of: self.as_of,
        }
    }
}
