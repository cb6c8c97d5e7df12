use crate::io::csv_format::parse_timestamp;
use crate::provider::RetryPolicy;
use crate::sync::SyncConfig;
use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Synchronize fuel card ledgers with provider networks
#[derive(Parser, Debug)]
#[command(name = "fuelcard-ledger-sync")]
#[command(about = "Synchronize fuel card ledgers with provider networks", long_about = None)]
pub struct CliArgs {
    /// Fixture directory with accounts, cards, ledger and provider data
    #[arg(value_name = "FIXTURES", help = "Path to the fixture directory")]
    pub fixtures: PathBuf,

    #[arg(
        long = "window-days",
        value_name = "DAYS",
        help = "Transaction look-back window in days (default: 3, max: 31)"
    )]
    pub window_days: Option<u32>,

    #[arg(long = "cycles", value_name = "COUNT", help = "Cycles to run (default: 1)")]
    pub cycles: Option<u64>,

    #[arg(
        long = "interval-secs",
        value_name = "SECS",
        help = "Seconds between cycle triggers (default: 60)"
    )]
    pub interval_secs: Option<u64>,

    #[arg(
        long = "max-concurrent",
        value_name = "COUNT",
        help = "Accounts processed concurrently and runtime worker threads (default: CPU cores)"
    )]
    pub max_concurrent: Option<usize>,

    #[arg(
        long = "provider-timeout-secs",
        value_name = "SECS",
        help = "Timeout for one provider's ingestion (default: 30)"
    )]
    pub provider_timeout_secs: Option<u64>,

    #[arg(
        long = "retry-attempts",
        value_name = "COUNT",
        help = "Retries for a failed provider call (default: 3)"
    )]
    pub retry_attempts: Option<usize>,

    #[arg(
        long = "cycle-timeout-secs",
        value_name = "SECS",
        help = "Timeout for a whole cycle (default: 600)"
    )]
    pub cycle_timeout_secs: Option<u64>,

    #[arg(
        long = "page-size",
        value_name = "SIZE",
        help = "Transactions per provider page (default: 500)"
    )]
    pub page_size: Option<usize>,

    #[arg(
        long = "limit-categories",
        value_name = "CATEGORY",
        value_delimiter = ',',
        help = "Product categories group limits are set for (default: fuel)"
    )]
    pub limit_categories: Vec<String>,

    #[arg(
        long = "as-of",
        value_name = "RFC3339",
        value_parser = parse_timestamp,
        help = "Evaluate as if the current time were this instant"
    )]
    pub as_of: Option<DateTime<Utc>>,

    #[arg(
        long = "log-format",
        value_name = "FORMAT",
        default_value = "text",
        help = "Log output format on stderr: 'text' or 'json'"
    )]
    pub log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// `value` unless it is zero, in which case `default` with a warning
fn non_zero<T>(value: Option<T>, default: T, field: &str) -> T
where
    T: PartialEq + Default + std::fmt::Display + Copy,
{
    match value {
        Some(v) if v == T::default() => {
            warn!(field, value = %v, default = %default, "Invalid zero value, using default");
            default
        }
        Some(v) => v,
        None => default,
    }
}

impl CliArgs {
    /// Build the pipeline settings from the parsed flags
    ///
    /// Absent flags take their defaults. Zero counts and durations are
    /// invalid and fall back to the default with a warning.
    pub fn to_sync_config(&self) -> SyncConfig {
        let default = SyncConfig::default();
        let secs = |value: Option<u64>, default: Duration, field: &str| {
            Duration::from_secs(non_zero(value, default.as_secs(), field))
        };

        let limit_categories: Vec<String> = self
            .limit_categories
            .iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();

        SyncConfig {
            window_days: non_zero(self.window_days, default.window_days, "window_days"),
            cycles: non_zero(self.cycles, default.cycles, "cycles"),
            interval: secs(self.interval_secs, default.interval, "interval_secs"),
            max_concurrent: non_zero(self.max_concurrent, default.max_concurrent, "max_concurrent"),
            provider_timeout: secs(
                self.provider_timeout_secs,
                default.provider_timeout,
                "provider_timeout_secs",
            ),
            cycle_timeout: secs(
                self.cycle_timeout_secs,
                default.cycle_timeout,
                "cycle_timeout_secs",
            ),
            retry: RetryPolicy {
                max_retries: self.retry_attempts.unwrap_or(default.retry.max_retries),
                ..default.retry
            },
            page_size: non_zero(self.page_size, default.page_size, "page_size"),
            limit_categories: if limit_categories.is_empty() {
                default.limit_categories
            } else {
                limit_categories
            },
            as_of: self.as_of,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    #[rstest]
    #[case::defaults(&["program", "fixtures"], 3, 1, 500)]
    #[case::window(&["program", "--window-days", "45", "fixtures"], 45, 1, 500)]
    #[case::cycles(&["program", "--cycles", "5", "fixtures"], 3, 5, 500)]
    #[case::page_size(&["program", "--page-size", "50", "fixtures"], 3, 1, 50)]
    fn test_config_conversion(
        #[case] args: &[&str],
        #[case] window_days: u32,
        #[case] cycles: u64,
        #[case] page_size: usize,
    ) {
        let config = CliArgs::try_parse_from(args).unwrap().to_sync_config();

        assert_eq!(config.window_days, window_days);
        assert_eq!(config.cycles, cycles);
        assert_eq!(config.page_size, page_size);
    }

    #[rstest]
    #[case::zero_window(&["program", "--window-days", "0", "fixtures"])]
    #[case::zero_cycles(&["program", "--cycles", "0", "fixtures"])]
    #[case::zero_max_concurrent(&["program", "--max-concurrent", "0", "fixtures"])]
    #[case::zero_timeouts(
        &["program", "--provider-timeout-secs", "0", "--cycle-timeout-secs", "0", "fixtures"]
    )]
    #[case::zero_page_size(&["program", "--page-size", "0", "fixtures"])]
    fn test_zero_values_fall_back_to_defaults(#[case] args: &[&str]) {
        let config = CliArgs::try_parse_from(args).unwrap().to_sync_config();
        let default = SyncConfig::default();

        assert_eq!(config.window_days, default.window_days);
        assert_eq!(config.cycles, default.cycles);
        assert_eq!(config.max_concurrent, default.max_concurrent);
        assert_eq!(config.provider_timeout, default.provider_timeout);
        assert_eq!(config.cycle_timeout, default.cycle_timeout);
        assert_eq!(config.page_size, default.page_size);
    }

    #[test]
    fn test_zero_retries_are_allowed() {
        let args = CliArgs::try_parse_from(["program", "--retry-attempts", "0", "fixtures"]).unwrap();

        assert_eq!(args.to_sync_config().retry.max_retries, 0);
    }

    #[rstest]
    #[case::default(&["program", "fixtures"], vec!["fuel"])]
    #[case::list(&["program", "--limit-categories", "Fuel, goods", "fixtures"], vec!["fuel", "goods"])]
    #[case::blank(&["program", "--limit-categories", " ", "fixtures"], vec!["fuel"])]
    fn test_limit_categories(#[case] args: &[&str], #[case] expected: Vec<&str>) {
        let config = CliArgs::try_parse_from(args).unwrap().to_sync_config();

        assert_eq!(config.limit_categories, expected);
    }

    #[test]
    fn test_as_of_and_log_format() {
        let args = CliArgs::try_parse_from([
            "program",
            "--as-of",
            "2023-05-17T12:00:00Z",
            "--log-format",
            "json",
            "fixtures",
        ])
        .unwrap();

        assert_eq!(args.log_format, LogFormat::Json);
        assert_eq!(
            args.to_sync_config().today(),
            Utc.with_ymd_and_hms(2023, 5, 17, 12, 0, 0).unwrap().date_naive()
        );
    }

    #[rstest]
    #[case::missing_fixtures(&["program"])]
    #[case::bad_log_format(&["program", "--log-format", "xml", "fixtures"])]
    #[case::bad_as_of(&["program", "--as-of", "tomorrow", "fixtures"])]
    #[case::negative_window(&["program", "--window-days", "-1", "fixtures"])]
    fn test_parsing_errors(#[case] args: &[&str]) {
        assert!(CliArgs::try_parse_from(args).is_err());
    }
}
