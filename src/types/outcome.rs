//! Per-stage result records of a sync cycle
//!
//! Each pipeline stage hands the next one a typed record instead of a loose
//! map, and the cycle as a whole reports a `CycleOutcome`.

use super::account::AccountId;
use super::card::CardId;
use super::error::{ProviderError, SyncError};
use super::provider::ProviderKind;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// How a provider's ingestion branch ended
#[derive(Debug, Clone, PartialEq)]
pub enum IngestStatus {
    Completed,
    Failed { error: String },
    TimedOut,
}

/// Stage 1 output for one provider
#[derive(Debug, Clone, PartialEq)]
pub struct IngestResult {
    pub provider: ProviderKind,
    pub status: IngestStatus,

    /// Contract balance the provider reported
    pub balance: Option<Decimal>,

    pub cards_seen: usize,
    pub transactions_fetched: usize,
    pub transactions_inserted: usize,

    /// Transactions on cards that are unknown or not issued to an account
    pub unmatched: usize,

    /// Earliest newly ingested timestamp per account
    pub touched: BTreeMap<AccountId, DateTime<Utc>>,
}

impl IngestResult {
    /// An empty result for a branch that produced nothing
    pub fn empty(provider: ProviderKind, status: IngestStatus) -> Self {
        IngestResult {
            provider,
            status,
            balance: None,
            cards_seen: 0,
            transactions_fetched: 0,
            transactions_inserted: 0,
            unmatched: 0,
            touched: BTreeMap::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.status, IngestStatus::Completed)
    }
}

/// Stage 3 output for one account
#[derive(Debug, Clone, PartialEq)]
pub struct RecomputeResult {
    pub account: AccountId,
    pub previous_balance: Decimal,
    pub current_balance: Decimal,
    pub overdraft_breached: bool,

    /// Balance plus the overdraft currently in force
    pub available: Decimal,

    pub transactions_updated: usize,
}

impl RecomputeResult {
    pub fn balance_changed(&self) -> bool {
        self.previous_balance != self.current_balance
    }
}

/// What reconciliation did to a card
#[derive(Debug, Clone, PartialEq)]
pub enum CardAction {
    Blocked,
    Activated,

    /// Card already in the desired state
    Unchanged,

    /// The transition is forbidden; recorded as a no-op
    Rejected(SyncError),

    /// At least one provider push failed; the local state was left as is
    Failed,
}

/// Stage 4 outcome for one card
#[derive(Debug, Clone, PartialEq)]
pub struct PerCardResult {
    pub card: CardId,
    pub action: CardAction,
    pub failures: Vec<ProviderError>,
}

impl PerCardResult {
    pub fn new(card: CardId, action: CardAction) -> Self {
        PerCardResult {
            card,
            action,
            failures: Vec::new(),
        }
    }
}

/// Stage 4 outcome for one account's cards
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileResult {
    pub account: AccountId,
    pub desired_active: bool,
    pub cards: Vec<PerCardResult>,
}

impl ReconcileResult {
    /// Some card could not be brought to the desired state
    pub fn has_failures(&self) -> bool {
        self.cards.iter().any(|c| c.action == CardAction::Failed)
    }

    pub fn count(&self, pred: impl Fn(&CardAction) -> bool) -> usize {
        self.cards.iter().filter(|c| pred(&c.action)).count()
    }

    pub fn push_failures(&self) -> usize {
        self.cards.iter().map(|c| c.failures.len()).sum()
    }
}

/// Stage 4 limit branch outcome for one account on one provider
#[derive(Debug, Clone, PartialEq)]
pub struct LimitResult {
    pub account: AccountId,
    pub provider: ProviderKind,
    pub cards_bound: usize,

    /// Group members that no longer belong to the account
    pub cards_unbound: usize,

    pub limits_set: bool,
    pub failures: Vec<ProviderError>,
}

impl LimitResult {
    pub fn is_complete(&self) -> bool {
        self.limits_set && self.failures.is_empty()
    }
}

/// How a cycle ended as a whole
#[derive(Debug, Clone, PartialEq)]
pub enum CycleStatus {
    Completed,

    /// A previous cycle was still running when this one was triggered
    Skipped,

    Failed { reason: String },
}

/// Structured summary of one `run_sync_cycle` call
#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutcome {
    pub cycle: u64,
    pub status: CycleStatus,
    pub ingest: Vec<IngestResult>,
    pub accounts_recomputed: usize,
    pub recompute_failures: usize,

    /// Accounts resolved from their stored balance to retry pushes or apply
    /// a changed threshold
    pub accounts_revisited: usize,

    pub cards_blocked: usize,
    pub cards_activated: usize,
    pub push_failures: usize,
    pub limits_pushed: usize,
}

impl CycleOutcome {
    pub fn new(cycle: u64, status: CycleStatus) -> Self {
        CycleOutcome {
            cycle,
            status,
            ingest: Vec::new(),
            accounts_recomputed: 0,
            recompute_failures: 0,
            accounts_revisited: 0,
            cards_blocked: 0,
            cards_activated: 0,
            push_failures: 0,
            limits_pushed: 0,
        }
    }
}
