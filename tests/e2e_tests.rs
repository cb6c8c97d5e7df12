//! End-to-end integration tests
//!
//! These tests run the binary's pipeline over fixture directories. Each test:
//! 1. Loads accounts, ledger, cards and provider data from tests/fixtures/{name}/
//! 2. Runs sync cycles against the loaded provider networks
//! 3. Writes final account balances as CSV
//! 4. Compares the output with expected.csv
//!
//! Fixtures cover:
//! - Happy path ingestion on one provider
//! - Overdraft breach with an operator-locked card
//! - Recompute from the earliest timestamp reported across providers
//! - Temporary overdraft grants and their expiry
//! - Duplicate provider transactions
//! - Transactions on unknown or unassigned cards
//!
//! Each fixture is run with one and with two cycles; the second cycle must not
//! change anything.

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use fuelcard_ledger_sync::provider::RetryPolicy;
    use fuelcard_ledger_sync::runner;
    use fuelcard_ledger_sync::types::{BlockReason, CardState};
    use fuelcard_ledger_sync::{SyncConfig, SyncError};
    use rstest::rstest;
    use std::fs;
    use std::io::Write;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::{NamedTempFile, TempDir};

    fn config(cycles: u64) -> SyncConfig {
        SyncConfig {
            cycles,
            interval: Duration::from_millis(10),
            retry: RetryPolicy::immediate(1),
            max_concurrent: 2,
            as_of: Some(Utc.with_ymd_and_hms(2023, 5, 17, 12, 0, 0).unwrap()),
            ..SyncConfig::default()
        }
    }

    /// Run a fixture directory and compare the output with expected.csv
    ///
    /// # Panics
    ///
    /// Panics if the fixture is incomplete, the run fails, or the output
    /// doesn't match.
    fn run_test_fixture(fixture_name: &str, cycles: u64) {
        let fixture_dir = format!("tests/fixtures/{}", fixture_name);
        let expected_path = format!("{}/expected.csv", fixture_dir);

        assert!(
            Path::new(&fixture_dir).join("accounts.csv").exists(),
            "Accounts file not found in {}",
            fixture_dir
        );
        assert!(
            Path::new(&expected_path).exists(),
            "Expected file not found: {}",
            expected_path
        );

        let mut temp_output = NamedTempFile::new().expect("Failed to create temp file");
        runner::run(Path::new(&fixture_dir), config(cycles), &mut temp_output)
            .unwrap_or_else(|e| panic!("Failed to run fixture: {}", e));
        temp_output.flush().expect("Failed to flush temp file");

        let actual_output = fs::read_to_string(temp_output.path())
            .unwrap_or_else(|e| panic!("Failed to read temp output file: {}", e));
        let expected_output = fs::read_to_string(&expected_path)
            .unwrap_or_else(|e| panic!("Failed to read expected file {}: {}", expected_path, e));

        assert_eq!(
            actual_output, expected_output,
            "\n\nOutput mismatch for fixture: {} (cycles: {})\n\nActual output:\n{}\n\nExpected output:\n{}\n",
            fixture_name, cycles, actual_output, expected_output
        );
    }

    #[rstest]
    #[case("happy_path")]
    #[case("overdraft_breach")]
    #[case("earliest_timestamp")]
    #[case("temporary_overdraft")]
    #[case("duplicate_transactions")]
    #[case("unmatched_cards")]
    fn test_fixtures(#[case] fixture: &str, #[values(1, 2)] cycles: u64) {
        run_test_fixture(fixture, cycles);
    }

    #[test]
    fn test_missing_accounts_file_fails_the_run() {
        let dir = TempDir::new().unwrap();
        let mut output = Vec::new();

        let result = runner::run(dir.path(), config(1), &mut output);

        match result {
            Err(SyncError::Fixture { file, line, .. }) => {
                assert!(file.ends_with("accounts.csv"));
                assert_eq!(line, None);
            }
            other => panic!("expected fixture error, got {:?}", other),
        }
        assert!(output.is_empty());
    }

    #[test]
    fn test_malformed_provider_row_names_file_and_line() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("accounts.csv"),
            "id,balance,fixed_overdraft\n1,0,0\n",
        )
        .unwrap();
        fs::create_dir(dir.path().join("provider_b")).unwrap();
        fs::write(
            dir.path().join("provider_b").join("transactions.csv"),
            "external_ref,card_ref,timestamp,amount\n\
             T-1,B-1,2023-05-17T10:00:00Z,-5\n\
             T-2,B-1,2023-05-17T10:00:00Z,lots\n",
        )
        .unwrap();

        let error = runner::run(dir.path(), config(1), &mut Vec::new()).unwrap_err();

        let message = error.to_string();
        assert!(message.contains("transactions.csv"), "{}", message);
        assert!(message.contains("line 2"), "{}", message);
    }

    #[tokio::test]
    async fn test_run_reports_every_cycle() {
        let report = runner::run_fixtures(Path::new("tests/fixtures/overdraft_breach"), config(2))
            .await
            .unwrap();

        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.outcomes[0].cards_blocked, 1);
        assert_eq!(report.outcomes[0].limits_pushed, 1);
        assert_eq!(report.accounts.len(), 1);
        assert_eq!(report.outcomes[1].cards_blocked, 0);

        let states: Vec<_> = report.cards.iter().map(|c| (c.id, c.state)).collect();
        assert_eq!(
            states,
            vec![
                (10, CardState::Blocked(BlockReason::Overdraft)),
                (11, CardState::Active),
            ]
        );
    }

    #[rstest]
    #[tokio::test]
    async fn test_expired_grant_blocks_only_its_account(#[values(1, 2)] cycles: u64) {
        let report = runner::run_fixtures(
            Path::new("tests/fixtures/temporary_overdraft"),
            config(cycles),
        )
        .await
        .unwrap();

        let states: Vec<_> = report.cards.iter().map(|c| (c.id, c.state)).collect();
        assert_eq!(
            states,
            vec![
                (10, CardState::Active),
                (20, CardState::Blocked(BlockReason::Overdraft)),
            ]
        );
        assert!(report.accounts[0].temporary_overdraft.is_some());
        assert_eq!(report.accounts[1].temporary_overdraft, None);
    }
}
