//! Thread-safe in-memory ledger store
//!
//! This module provides `InMemoryStore`, a `LedgerRepository` backed by
//! concurrent maps. It is what the binary runs against when fed from fixture
//! files, and what the pipeline tests assert on.
//!
//! # Design
//!
//! Like the account manager it grew out of, the store keeps one `DashMap`
//! entry per account. A recompute write takes the entry lock for that
//! account's ledger once, validates every update, and only then applies them,
//! which makes the write all-or-nothing. Writes for different accounts land
//! on different shards and do not contend.
//!
//! # Fault Injection
//!
//! `fail_writes_for` and `set_unavailable` let tests simulate write conflicts
//! and a store outage without a real database.

use super::{IngestSummary, LedgerRepository};
use crate::types::{
    Account, AccountId, BalanceUpdate, BlockReason, Card, CardId, CardSnapshot, CardState,
    LedgerTransaction, ProviderKind, SyncError, TransactionId, TransactionSource, TxnSnapshot,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Concurrent in-memory implementation of [`LedgerRepository`]
#[derive(Debug, Default)]
pub struct InMemoryStore {
    accounts: DashMap<AccountId, Account>,

    /// Ledger rows per account, in insertion order
    ledgers: DashMap<AccountId, Vec<LedgerTransaction>>,

    cards: DashMap<CardId, Card>,

    /// Provider-side card identifier to local card
    card_refs: DashMap<(ProviderKind, String), CardId>,

    /// Provider-side transaction identifier to local transaction
    external_refs: DashMap<(ProviderKind, String), TransactionId>,

    next_id: AtomicU64,
    next_seq: AtomicU64,

    failing_writes: DashMap<AccountId, ()>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an account
    pub fn insert_account(&self, account: Account) {
        self.accounts.insert(account.id, account);
    }

    /// Insert or replace a card and index its provider bindings
    pub fn insert_card(&self, card: Card) {
        for (provider, external_ref) in &card.providers {
            self.card_refs
                .insert((*provider, external_ref.clone()), card.id);
        }
        self.cards.insert(card.id, card);
    }

    /// Load an existing ledger row as-is
    ///
    /// The row keeps its id and balance; it is given the next insertion
    /// sequence so replay order follows load order.
    pub fn insert_transaction(&self, mut transaction: LedgerTransaction) {
        transaction.seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.next_id
            .fetch_max(transaction.id.saturating_add(1), Ordering::SeqCst);
        if let TransactionSource::Provider {
            provider,
            external_ref,
        } = &transaction.source
        {
            self.external_refs
                .insert((*provider, external_ref.clone()), transaction.id);
        }
        self.ledgers
            .entry(transaction.account)
            .or_default()
            .push(transaction);
    }

    /// Book a manual corrective transaction
    ///
    /// Its running balance is left at zero until the next recompute.
    pub fn add_manual_transaction(
        &self,
        account: AccountId,
        timestamp: DateTime<Utc>,
        delta: Decimal,
    ) -> TransactionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.insert_transaction(LedgerTransaction {
            id,
            account,
            timestamp,
            delta,
            balance: Decimal::ZERO,
            seq: 0,
            source: TransactionSource::Manual,
            card: None,
        });
        id
    }

    /// Make every balance write for `account` fail with a persistence error
    pub fn fail_writes_for(&self, account: AccountId) {
        self.failing_writes.insert(account, ());
    }

    pub fn clear_failing_writes(&self) {
        self.failing_writes.clear();
    }

    /// Simulate a store outage; every operation fails while set
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Snapshot of an account's ledger in insertion order
    pub fn transactions(&self, account: AccountId) -> Vec<LedgerTransaction> {
        self.ledgers
            .get(&account)
            .map(|ledger| ledger.clone())
            .unwrap_or_default()
    }

    pub fn account(&self, id: AccountId) -> Option<Account> {
        self.accounts.get(&id).map(|a| a.clone())
    }

    pub fn card(&self, id: CardId) -> Option<Card> {
        self.cards.get(&id).map(|c| c.clone())
    }

    /// All accounts, sorted by ID
    pub fn all_accounts(&self) -> Vec<Account> {
        let mut accounts: Vec<Account> = self
            .accounts
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        accounts.sort_by_key(|a| a.id);
        accounts
    }

    /// All cards, sorted by ID
    pub fn all_cards(&self) -> Vec<Card> {
        let mut cards: Vec<Card> = self.cards.iter().map(|entry| entry.value().clone()).collect();
        cards.sort_by_key(|c| c.id);
        cards
    }

    fn ensure_available(&self, operation: &str) -> Result<(), SyncError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SyncError::persistence(operation, "store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerRepository for InMemoryStore {
    async fn get_account(&self, id: AccountId) -> Result<Account, SyncError> {
        self.ensure_available("get_account")?;
        self.account(id)
            .ok_or_else(|| SyncError::persistence("get_account", format!("account {} not found", id)))
    }

    async fn list_account_ids(&self) -> Result<Vec<AccountId>, SyncError> {
        self.ensure_available("list_account_ids")?;
        let mut ids: Vec<AccountId> = self.accounts.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn get_transactions_since(
        &self,
        account: AccountId,
        from: DateTime<Utc>,
    ) -> Result<Vec<LedgerTransaction>, SyncError> {
        self.ensure_available("get_transactions_since")?;
        let mut transactions: Vec<LedgerTransaction> = self
            .ledgers
            .get(&account)
            .map(|ledger| {
                ledger
                    .iter()
                    .filter(|t| t.timestamp >= from)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        transactions.sort_by_key(|t| (t.timestamp, t.seq));
        Ok(transactions)
    }

    async fn get_anchor_transaction(
        &self,
        account: AccountId,
        from: DateTime<Utc>,
    ) -> Result<Option<LedgerTransaction>, SyncError> {
        self.ensure_available("get_anchor_transaction")?;
        Ok(self.ledgers.get(&account).and_then(|ledger| {
            ledger
                .iter()
                .filter(|t| t.timestamp < from)
                .max_by_key(|t| (t.timestamp, t.seq))
                .cloned()
        }))
    }

    async fn bulk_update_balances(
        &self,
        account: AccountId,
        updates: &[BalanceUpdate],
    ) -> Result<(), SyncError> {
        self.ensure_available("bulk_update_balances")?;
        if self.failing_writes.contains_key(&account) {
            return Err(SyncError::persistence(
                "bulk_update_balances",
                format!("write conflict on account {}", account),
            ));
        }
        if updates.is_empty() {
            return Ok(());
        }

        let mut ledger = self.ledgers.get_mut(&account).ok_or_else(|| {
            SyncError::persistence(
                "bulk_update_balances",
                format!("account {} has no ledger", account),
            )
        })?;

        // Resolve every target before touching anything
        let positions: HashMap<TransactionId, usize> = ledger
            .iter()
            .enumerate()
            .map(|(pos, t)| (t.id, pos))
            .collect();
        let mut targets = Vec::with_capacity(updates.len());
        for update in updates {
            let pos = positions.get(&update.transaction).ok_or_else(|| {
                SyncError::persistence(
                    "bulk_update_balances",
                    format!(
                        "transaction {} not found on account {}",
                        update.transaction, account
                    ),
                )
            })?;
            targets.push((*pos, update.balance));
        }

        for (pos, balance) in targets {
            ledger[pos].balance = balance;
        }
        Ok(())
    }

    async fn set_account_balance(
        &self,
        account: AccountId,
        balance: Decimal,
    ) -> Result<(), SyncError> {
        self.ensure_available("set_account_balance")?;
        let mut entry = self.accounts.get_mut(&account).ok_or_else(|| {
            SyncError::persistence(
                "set_account_balance",
                format!("account {} not found", account),
            )
        })?;
        entry.balance = balance;
        Ok(())
    }

    async fn get_cards_for_account(&self, account: AccountId) -> Result<Vec<Card>, SyncError> {
        self.ensure_available("get_cards_for_account")?;
        let mut cards: Vec<Card> = self
            .cards
            .iter()
            .filter(|entry| entry.account == Some(account))
            .map(|entry| entry.value().clone())
            .collect();
        cards.sort_by_key(|c| c.id);
        Ok(cards)
    }

    async fn update_card_state(&self, card: CardId, state: CardState) -> Result<(), SyncError> {
        self.ensure_available("update_card_state")?;
        let mut entry = self.cards.get_mut(&card).ok_or_else(|| {
            SyncError::persistence("update_card_state", format!("card {} not found", card))
        })?;
        entry.state = state;
        Ok(())
    }

    async fn ingest_transactions(
        &self,
        provider: ProviderKind,
        transactions: &[TxnSnapshot],
    ) -> Result<IngestSummary, SyncError> {
        self.ensure_available("ingest_transactions")?;
        let mut summary = IngestSummary::default();

        for snapshot in transactions {
            let card_id = self
                .card_refs
                .get(&(provider, snapshot.card_ref.clone()))
                .map(|id| *id);
            let owner = card_id.and_then(|id| self.cards.get(&id).and_then(|c| c.account));
            let Some(account) = owner else {
                summary.unmatched += 1;
                continue;
            };

            let mut inserted = false;
            let id = *self
                .external_refs
                .entry((provider, snapshot.external_ref.clone()))
                .or_insert_with(|| {
                    inserted = true;
                    self.next_id.fetch_add(1, Ordering::SeqCst)
                });
            if !inserted {
                summary.duplicates += 1;
                continue;
            }

            self.ledgers
                .entry(account)
                .or_default()
                .push(LedgerTransaction {
                    id,
                    account,
                    timestamp: snapshot.timestamp,
                    delta: snapshot.amount,
                    balance: Decimal::ZERO,
                    seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
                    source: TransactionSource::Provider {
                        provider,
                        external_ref: snapshot.external_ref.clone(),
                    },
                    card: card_id,
                });
            summary.inserted += 1;
            summary
                .touched
                .entry(account)
                .and_modify(|earliest| *earliest = (*earliest).min(snapshot.timestamp))
                .or_insert(snapshot.timestamp);
        }

        Ok(summary)
    }

    async fn apply_card_snapshots(
        &self,
        provider: ProviderKind,
        cards: &[CardSnapshot],
    ) -> Result<usize, SyncError> {
        self.ensure_available("apply_card_snapshots")?;
        let mut changed = 0;

        for snapshot in cards {
            let Some(card_id) = self
                .card_refs
                .get(&(provider, snapshot.external_ref.clone()))
                .map(|id| *id)
            else {
                continue;
            };
            let Some(mut card) = self.cards.get_mut(&card_id) else {
                continue;
            };

            let pin_blocked = card.state == CardState::Blocked(BlockReason::Pin);
            if snapshot.pin_locked && !pin_blocked {
                card.state = CardState::Blocked(BlockReason::Pin);
                changed += 1;
            } else if !snapshot.pin_locked && pin_blocked && snapshot.active {
                card.state = CardState::Active;
                changed += 1;
            }
        }

        Ok(changed)
    }

    async fn expire_temporary_overdrafts(
        &self,
        today: NaiveDate,
    ) -> Result<Vec<AccountId>, SyncError> {
        self.ensure_available("expire_temporary_overdrafts")?;
        let mut expired = Vec::new();
        for mut entry in self.accounts.iter_mut() {
            if entry
                .temporary_overdraft
                .is_some_and(|t| !t.is_active_on(today))
            {
                entry.temporary_overdraft = None;
                expired.push(entry.id);
            }
        }
        expired.sort_unstable();
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TemporaryOverdraft;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 5, 17, hour, minute, 0).unwrap()
    }

    fn store_with_card() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.insert_account(Account::new(1));
        let mut card = Card::new(10, "7005-0001");
        card.account = Some(1);
        card.providers.insert(ProviderKind::ProviderA, "A-10".to_string());
        store.insert_card(card);
        store
    }

    fn snapshot(external_ref: &str, card_ref: &str, ts: DateTime<Utc>, amount: i64) -> TxnSnapshot {
        TxnSnapshot {
            external_ref: external_ref.to_string(),
            card_ref: card_ref.to_string(),
            timestamp: ts,
            amount: Decimal::new(amount, 0),
        }
    }

    #[tokio::test]
    async fn test_ingest_inserts_and_tracks_earliest_timestamp() {
        let store = store_with_card();
        let summary = store
            .ingest_transactions(
                ProviderKind::ProviderA,
                &[
                    snapshot("t1", "A-10", at(10, 5), -20),
                    snapshot("t2", "A-10", at(9, 30), -10),
                ],
            )
            .await
            .unwrap();

        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.touched.get(&1), Some(&at(9, 30)));
        assert_eq!(store.transactions(1).len(), 2);
    }

    #[tokio::test]
    async fn test_ingest_is_idempotent_by_external_ref() {
        let store = store_with_card();
        let batch = [snapshot("t1", "A-10", at(10, 0), -20)];

        store
            .ingest_transactions(ProviderKind::ProviderA, &batch)
            .await
            .unwrap();
        let second = store
            .ingest_transactions(ProviderKind::ProviderA, &batch)
            .await
            .unwrap();

        assert_eq!(second.inserted, 0);
        assert_eq!(second.duplicates, 1);
        assert!(second.touched.is_empty());
        assert_eq!(store.transactions(1).len(), 1);
    }

    #[tokio::test]
    async fn test_ingest_counts_unmatched_cards() {
        let store = store_with_card();
        let summary = store
            .ingest_transactions(
                ProviderKind::ProviderA,
                &[snapshot("t1", "A-99", at(10, 0), -20)],
            )
            .await
            .unwrap();

        assert_eq!(summary.unmatched, 1);
        assert_eq!(summary.inserted, 0);
    }

    #[tokio::test]
    async fn test_same_external_ref_on_other_provider_is_distinct() {
        let store = store_with_card();
        let mut card = store.card(10).unwrap();
        card.providers.insert(ProviderKind::ProviderB, "B-10".to_string());
        store.insert_card(card);

        store
            .ingest_transactions(ProviderKind::ProviderA, &[snapshot("t1", "A-10", at(10, 0), -1)])
            .await
            .unwrap();
        let summary = store
            .ingest_transactions(ProviderKind::ProviderB, &[snapshot("t1", "B-10", at(10, 0), -1)])
            .await
            .unwrap();

        assert_eq!(summary.inserted, 1);
    }

    #[tokio::test]
    async fn test_transactions_since_orders_ties_by_insertion() {
        let store = store_with_card();
        let late = store.add_manual_transaction(1, at(11, 0), Decimal::ONE);
        let first_tie = store.add_manual_transaction(1, at(10, 0), Decimal::TWO);
        let second_tie = store.add_manual_transaction(1, at(10, 0), Decimal::TEN);

        let txns = store.get_transactions_since(1, at(10, 0)).await.unwrap();
        let ids: Vec<TransactionId> = txns.iter().map(|t| t.id).collect();

        assert_eq!(ids, vec![first_tie, second_tie, late]);
    }

    #[tokio::test]
    async fn test_anchor_is_latest_strictly_before() {
        let store = store_with_card();
        store.add_manual_transaction(1, at(8, 0), Decimal::ONE);
        let anchor = store.add_manual_transaction(1, at(9, 0), Decimal::ONE);
        store.add_manual_transaction(1, at(10, 0), Decimal::ONE);

        let found = store.get_anchor_transaction(1, at(10, 0)).await.unwrap();
        assert_eq!(found.map(|t| t.id), Some(anchor));

        let none = store.get_anchor_transaction(1, at(8, 0)).await.unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_bulk_update_is_all_or_nothing() {
        let store = store_with_card();
        let id = store.add_manual_transaction(1, at(10, 0), Decimal::ONE);

        let result = store
            .bulk_update_balances(
                1,
                &[
                    BalanceUpdate { transaction: id, balance: Decimal::TEN },
                    BalanceUpdate { transaction: 9999, balance: Decimal::TWO },
                ],
            )
            .await;

        assert!(matches!(result, Err(SyncError::Persistence { .. })));
        assert_eq!(store.transactions(1)[0].balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_fail_writes_for_rejects_balance_writes() {
        let store = store_with_card();
        let id = store.add_manual_transaction(1, at(10, 0), Decimal::ONE);
        store.fail_writes_for(1);

        let result = store
            .bulk_update_balances(1, &[BalanceUpdate { transaction: id, balance: Decimal::ONE }])
            .await;

        assert!(result.is_err());
        assert_eq!(store.transactions(1)[0].balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_reads() {
        let store = store_with_card();
        store.set_unavailable(true);
        assert!(store.list_account_ids().await.is_err());
        store.set_unavailable(false);
        assert_eq!(store.list_account_ids().await.unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn test_card_snapshots_mirror_pin_lock() {
        let store = store_with_card();
        let locked = CardSnapshot {
            external_ref: "A-10".to_string(),
            active: false,
            pin_locked: true,
        };
        let changed = store
            .apply_card_snapshots(ProviderKind::ProviderA, &[locked])
            .await
            .unwrap();
        assert_eq!(changed, 1);
        assert_eq!(store.card(10).unwrap().state, CardState::Blocked(BlockReason::Pin));

        let unlocked = CardSnapshot {
            external_ref: "A-10".to_string(),
            active: true,
            pin_locked: false,
        };
        store
            .apply_card_snapshots(ProviderKind::ProviderA, &[unlocked])
            .await
            .unwrap();
        assert_eq!(store.card(10).unwrap().state, CardState::Active);
    }

    #[tokio::test]
    async fn test_expire_temporary_overdrafts() {
        let store = InMemoryStore::new();
        let mut expired = Account::new(1);
        expired.temporary_overdraft = Some(TemporaryOverdraft {
            amount: Decimal::new(30000, 0),
            until: NaiveDate::from_ymd_opt(2023, 5, 17).unwrap(),
        });
        let mut live = Account::new(2);
        live.temporary_overdraft = Some(TemporaryOverdraft {
            amount: Decimal::new(100, 0),
            until: NaiveDate::from_ymd_opt(2023, 5, 20).unwrap(),
        });
        store.insert_account(expired);
        store.insert_account(live);

        let ids = store
            .expire_temporary_overdrafts(NaiveDate::from_ymd_opt(2023, 5, 18).unwrap())
            .await
            .unwrap();

        assert_eq!(ids, vec![1]);
        assert!(store.account(1).unwrap().temporary_overdraft.is_none());
        assert!(store.account(2).unwrap().temporary_overdraft.is_some());
    }
}
