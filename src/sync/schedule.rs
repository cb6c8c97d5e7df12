//! Periodic cycle triggering
//!
//! Each tick first runs housekeeping (expiring temporary overdrafts, whose
//! accounts the cycle then revisits), then starts a cycle on its own task. A tick that lands while the previous cycle
//! is still running yields a skipped cycle instead of a queued one.

use super::orchestrator::SyncOrchestrator;
use crate::types::CycleOutcome;
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, warn};

/// Run `config.cycles` cycles, one per `config.interval`
///
/// Returns the outcome of every triggered cycle in trigger order.
pub async fn run_schedule(orchestrator: Arc<SyncOrchestrator>) -> Vec<CycleOutcome> {
    let cycles = orchestrator.config().cycles;
    let mut ticker = interval(orchestrator.config().interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut handles = Vec::new();
    for _ in 0..cycles {
        ticker.tick().await;

        if let Err(e) = orchestrator.expire_temporary_overdrafts().await {
            warn!(error = %e, "Overdraft housekeeping failed");
        }

        let orchestrator = Arc::clone(&orchestrator);
        handles.push(tokio::spawn(
            async move { orchestrator.run_sync_cycle().await },
        ));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => error!(error = %e, "Cycle task panicked"),
        }
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderSet;
    use crate::store::InMemoryStore;
    use crate::sync::SyncConfig;
    use crate::types::{Account, CycleStatus, TemporaryOverdraft};
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal::Decimal;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_schedule_runs_every_cycle_and_expires_overdrafts() {
        let store = Arc::new(InMemoryStore::new());
        let mut account = Account::new(1);
        account.temporary_overdraft = Some(TemporaryOverdraft {
            amount: Decimal::new(100, 0),
            until: NaiveDate::from_ymd_opt(2023, 5, 16).unwrap(),
        });
        store.insert_account(account);
        let config = SyncConfig {
            cycles: 3,
            interval: Duration::from_secs(1),
            as_of: Some(Utc.with_ymd_and_hms(2023, 5, 17, 12, 0, 0).unwrap()),
            ..SyncConfig::default()
        };
        let orchestrator = Arc::new(SyncOrchestrator::new(
            store.clone(),
            ProviderSet::default(),
            config,
        ));

        let outcomes = run_schedule(orchestrator).await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes
            .iter()
            .all(|o| o.status == CycleStatus::Completed));
        assert_eq!(store.account(1).unwrap().temporary_overdraft, None);
        assert_eq!(outcomes[0].accounts_revisited, 1);
        assert_eq!(outcomes[1].accounts_revisited, 0);
    }
}
