//! Persistence boundary
//!
//! The pipeline talks to storage only through [`LedgerRepository`]. Every
//! write for one account is a single all-or-nothing operation, so a failed
//! recompute never leaves a half-rewritten ledger behind.
//!
//! - `memory` - DashMap-backed implementation used by the binary and tests

pub mod memory;

pub use memory::InMemoryStore;

use crate::types::{
    Account, AccountId, BalanceUpdate, Card, CardId, CardSnapshot, CardState, LedgerTransaction,
    ProviderKind, SyncError, TxnSnapshot,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Result of writing a provider's transactions into the ledger
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestSummary {
    pub inserted: usize,

    /// Already known by `(provider, external_ref)`
    pub duplicates: usize,

    /// Card unknown or not issued to any account
    pub unmatched: usize,

    /// Earliest newly inserted timestamp per account
    pub touched: BTreeMap<AccountId, DateTime<Utc>>,
}

/// Storage operations the pipeline needs
///
/// Implementations must make `bulk_update_balances` atomic per account.
/// Callers guarantee that no two recomputes of the same account overlap.
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    async fn get_account(&self, id: AccountId) -> Result<Account, SyncError>;

    async fn list_account_ids(&self) -> Result<Vec<AccountId>, SyncError>;

    /// Transactions at or after `from`, ascending by timestamp, ties in insertion order
    async fn get_transactions_since(
        &self,
        account: AccountId,
        from: DateTime<Utc>,
    ) -> Result<Vec<LedgerTransaction>, SyncError>;

    /// The most recent transaction strictly before `from`
    async fn get_anchor_transaction(
        &self,
        account: AccountId,
        from: DateTime<Utc>,
    ) -> Result<Option<LedgerTransaction>, SyncError>;

    /// Rewrite derived balances; either every update lands or none does
    async fn bulk_update_balances(
        &self,
        account: AccountId,
        updates: &[BalanceUpdate],
    ) -> Result<(), SyncError>;

    async fn set_account_balance(
        &self,
        account: AccountId,
        balance: Decimal,
    ) -> Result<(), SyncError>;

    async fn get_cards_for_account(&self, account: AccountId) -> Result<Vec<Card>, SyncError>;

    async fn update_card_state(&self, card: CardId, state: CardState) -> Result<(), SyncError>;

    /// Insert new provider transactions, idempotent by `(provider, external_ref)`
    async fn ingest_transactions(
        &self,
        provider: ProviderKind,
        transactions: &[TxnSnapshot],
    ) -> Result<IngestSummary, SyncError>;

    /// Mirror provider-side PIN locks onto local cards
    ///
    /// Returns the number of cards whose local state changed.
    async fn apply_card_snapshots(
        &self,
        provider: ProviderKind,
        cards: &[CardSnapshot],
    ) -> Result<usize, SyncError>;

    /// Drop temporary overdrafts whose end date is before `today`
    async fn expire_temporary_overdrafts(
        &self,
        today: NaiveDate,
    ) -> Result<Vec<AccountId>, SyncError>;
}
