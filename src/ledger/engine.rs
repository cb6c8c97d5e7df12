//! Ledger recompute engine
//!
//! `LedgerEngine` rebuilds an account's running balances from an anchor
//! point forward and persists them in one write.
//!
//! # Design
//!
//! Recomputes for the same account are serialized through a per-account
//! async mutex held in a `DashMap`, so a second recompute of an account waits
//! for the first to finish. Different accounts share nothing and proceed in
//! parallel.
//!
//! ```text
//! LedgerEngine
//!     ├── Arc<dyn LedgerRepository>          (persistence)
//!     └── DashMap<AccountId, Arc<Mutex<()>>> (single writer per account)
//! ```

use super::replay::{replay, RecomputedLedger};
use super::resolver::BalanceResolver;
use crate::store::LedgerRepository;
use crate::types::{AccountId, RecomputeResult, SyncError};
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Recomputes account ledgers against a repository
#[derive(Clone)]
pub struct LedgerEngine {
    store: Arc<dyn LedgerRepository>,
    locks: Arc<DashMap<AccountId, Arc<Mutex<()>>>>,
}

impl LedgerEngine {
    pub fn new(store: Arc<dyn LedgerRepository>) -> Self {
        Self {
            store,
            locks: Arc::new(DashMap::new()),
        }
    }

    fn lock_for(&self, account: AccountId) -> Arc<Mutex<()>> {
        Arc::clone(
            self.locks
                .entry(account)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Recompute running balances of `account` from `from` onward
    ///
    /// The most recent transaction strictly before `from` is the anchor and
    /// is not touched. Only balances that changed are written, all in one
    /// store call, so a failed write leaves the ledger as it was.
    ///
    /// # Arguments
    ///
    /// * `account` - The account whose ledger is rebuilt
    /// * `from` - Earliest timestamp known to be stale
    ///
    /// # Returns
    ///
    /// * `Ok(RecomputedLedger)` - The replayed ledger
    /// * `Err(SyncError::LedgerInconsistency)` - The stored ledger breaks the running-balance invariant
    /// * `Err(SyncError::Persistence)` - The store failed; nothing was written
    pub async fn recompute_account_ledger(
        &self,
        account: AccountId,
        from: DateTime<Utc>,
    ) -> Result<RecomputedLedger, SyncError> {
        let lock = self.lock_for(account);
        let _guard = lock.lock().await;
        self.recompute_locked(account, from).await
    }

    async fn recompute_locked(
        &self,
        account: AccountId,
        from: DateTime<Utc>,
    ) -> Result<RecomputedLedger, SyncError> {
        let anchor = self.store.get_anchor_transaction(account, from).await?;
        let transactions = self.store.get_transactions_since(account, from).await?;

        let ledger = replay(account, from, anchor.as_ref(), transactions)?;
        self.store
            .bulk_update_balances(account, &ledger.updates)
            .await?;

        debug!(
            account,
            from = %from,
            replayed = ledger.entries.len(),
            updated = ledger.updates.len(),
            "Ledger recomputed"
        );
        Ok(ledger)
    }

    /// Recompute, resolve the overdraft state and store the new balance
    ///
    /// Runs under the account's lock from the first read to the balance write.
    pub async fn recompute_and_resolve(
        &self,
        account: AccountId,
        from: DateTime<Utc>,
        today: NaiveDate,
    ) -> Result<RecomputeResult, SyncError> {
        let lock = self.lock_for(account);
        let _guard = lock.lock().await;

        let ledger = self.recompute_locked(account, from).await?;
        let current = self.store.get_account(account).await?;
        let resolution = BalanceResolver::resolve(&current, &ledger, today);
        self.store
            .set_account_balance(account, resolution.current_balance)
            .await?;

        Ok(RecomputeResult {
            account,
            previous_balance: current.balance,
            current_balance: resolution.current_balance,
            overdraft_breached: resolution.overdraft_breached,
            available: resolution.available,
            transactions_updated: ledger.updates.len(),
        })
    }

    /// Resolve the account's stored balance as of `today`, without a recompute
    ///
    /// Used for accounts whose threshold changed, or whose pushes are retried,
    /// while their ledger did not. Runs under the account's lock.
    pub async fn resolve_stored(
        &self,
        account: AccountId,
        today: NaiveDate,
    ) -> Result<RecomputeResult, SyncError> {
        let lock = self.lock_for(account);
        let _guard = lock.lock().await;

        let current = self.store.get_account(account).await?;
        let resolution = BalanceResolver::resolve_balance(&current, current.balance, today);
        Ok(RecomputeResult {
            account,
            previous_balance: current.balance,
            current_balance: current.balance,
            overdraft_breached: resolution.overdraft_breached,
            available: resolution.available,
            transactions_updated: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::types::{Account, LedgerTransaction, TransactionSource};
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 5, 17, hour, minute, 0).unwrap()
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 5, 17).unwrap()
    }

    /// Account 1 with an anchor of 1000.0 at 09:00 and three new entries
    fn scenario_store() -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        let mut account = Account::new(1);
        account.balance = Decimal::new(10000, 1);
        store.insert_account(account);
        store.insert_transaction(LedgerTransaction {
            id: 1,
            account: 1,
            timestamp: at(9, 0),
            delta: Decimal::new(10000, 1),
            balance: Decimal::new(10000, 1),
            seq: 0,
            source: TransactionSource::Manual,
            card: None,
        });
        store.add_manual_transaction(1, at(10, 0), Decimal::new(-2000, 1));
        store.add_manual_transaction(1, at(10, 5), Decimal::new(500, 1));
        store.add_manual_transaction(1, at(10, 10), Decimal::new(-9000, 1));
        store
    }

    fn stored_balances(store: &InMemoryStore) -> Vec<Decimal> {
        store.transactions(1).iter().map(|t| t.balance).collect()
    }

    #[tokio::test]
    async fn test_recompute_persists_running_balances() {
        let store = scenario_store();
        let engine = LedgerEngine::new(store.clone());

        let ledger = engine.recompute_account_ledger(1, at(10, 0)).await.unwrap();

        assert_eq!(ledger.final_balance(), Decimal::new(-500, 1));
        assert_eq!(
            stored_balances(&store),
            vec![
                Decimal::new(10000, 1),
                Decimal::new(8000, 1),
                Decimal::new(8500, 1),
                Decimal::new(-500, 1)
            ]
        );
    }

    #[tokio::test]
    async fn test_recompute_twice_is_idempotent() {
        let store = scenario_store();
        let engine = LedgerEngine::new(store.clone());

        engine.recompute_account_ledger(1, at(10, 0)).await.unwrap();
        let first = stored_balances(&store);
        let second_run = engine.recompute_account_ledger(1, at(10, 0)).await.unwrap();

        assert!(second_run.updates.is_empty());
        assert_eq!(stored_balances(&store), first);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_ledger_untouched() {
        let store = scenario_store();
        store.fail_writes_for(1);
        let engine = LedgerEngine::new(store.clone());

        let result = engine.recompute_account_ledger(1, at(10, 0)).await;

        assert!(matches!(result, Err(SyncError::Persistence { .. })));
        assert_eq!(
            stored_balances(&store),
            vec![Decimal::new(10000, 1), Decimal::ZERO, Decimal::ZERO, Decimal::ZERO]
        );
    }

    #[tokio::test]
    async fn test_recompute_and_resolve_flags_breach() {
        let store = scenario_store();
        let engine = LedgerEngine::new(store.clone());

        let result = engine
            .recompute_and_resolve(1, at(10, 0), today())
            .await
            .unwrap();

        assert_eq!(result.previous_balance, Decimal::new(10000, 1));
        assert_eq!(result.current_balance, Decimal::new(-500, 1));
        assert!(result.overdraft_breached);
        assert!(result.balance_changed());
        assert_eq!(store.account(1).unwrap().balance, Decimal::new(-500, 1));
    }

    #[tokio::test]
    async fn test_resolve_stored_uses_todays_threshold() {
        let store = Arc::new(InMemoryStore::new());
        let mut account = Account::new(1);
        account.balance = Decimal::new(-20000, 0);
        account.fixed_overdraft = Decimal::new(5000, 0);
        store.insert_account(account);
        let engine = LedgerEngine::new(store.clone());

        let result = engine.resolve_stored(1, today()).await.unwrap();

        assert!(result.overdraft_breached);
        assert!(!result.balance_changed());
        assert_eq!(result.available, Decimal::new(-15000, 0));
        assert_eq!(result.transactions_updated, 0);
    }

    #[tokio::test]
    async fn test_concurrent_recomputes_of_same_account_converge() {
        let store = scenario_store();
        let engine = LedgerEngine::new(store.clone());

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let engine = engine.clone();
            tasks.push(tokio::spawn(async move {
                engine.recompute_account_ledger(1, at(10, 0)).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(
            stored_balances(&store),
            vec![
                Decimal::new(10000, 1),
                Decimal::new(8000, 1),
                Decimal::new(8500, 1),
                Decimal::new(-500, 1)
            ]
        );
    }
}
