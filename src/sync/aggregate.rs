//! Irrelevant-balance aggregation
//!
//! Every provider branch reports, per account, the earliest timestamp of the
//! transactions it newly inserted. From that point onward the account's stored
//! running balances can no longer be trusted. Aggregation merges the branches
//! into one set where each account appears once, at its earliest timestamp.
//!
//! Accounts whose recompute did not finish in an earlier cycle are carried
//! into the next one, so an interrupted cycle never strands a stale balance.

use crate::store::LedgerRepository;
use crate::types::{AccountId, IngestResult, SyncError};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

/// Accounts whose running balances are stale, with the point they are stale from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IrrelevantBalances {
    stale: BTreeMap<AccountId, DateTime<Utc>>,
}

impl IrrelevantBalances {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `account` is stale from `from`; keeps the earlier timestamp
    pub fn mark(&mut self, account: AccountId, from: DateTime<Utc>) {
        self.stale
            .entry(account)
            .and_modify(|current| {
                if from < *current {
                    *current = from;
                }
            })
            .or_insert(from);
    }

    /// Merge the accounts touched by every ingestion branch
    ///
    /// Failed or timed-out branches still contribute whatever they inserted
    /// before stopping.
    pub fn merge(results: &[IngestResult]) -> Self {
        let mut set = Self::new();
        for result in results {
            set.absorb_ingest(result);
        }
        set
    }

    /// Fold another set into this one
    pub fn absorb(&mut self, other: &IrrelevantBalances) {
        for (account, from) in other.iter() {
            self.mark(account, from);
        }
    }

    /// Fold in the accounts one ingestion branch touched
    pub fn absorb_ingest(&mut self, result: &IngestResult) {
        for (&account, &from) in &result.touched {
            self.mark(account, from);
        }
    }

    /// Forget `account` once it was recomputed from `from` or earlier
    pub fn settle(&mut self, account: AccountId, from: DateTime<Utc>) {
        if self.stale.get(&account).is_some_and(|stale| *stale >= from) {
            self.stale.remove(&account);
        }
    }

    pub fn get(&self, account: AccountId) -> Option<DateTime<Utc>> {
        self.stale.get(&account).copied()
    }

    pub fn len(&self) -> usize {
        self.stale.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stale.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (AccountId, DateTime<Utc>)> + '_ {
        self.stale.iter().map(|(&a, &t)| (a, t))
    }

    /// Keep only accounts in `known`, returning the ones dropped
    fn retain_known(&mut self, known: &HashSet<AccountId>) -> Vec<AccountId> {
        let dropped: Vec<AccountId> = self
            .stale
            .keys()
            .filter(|id| !known.contains(id))
            .copied()
            .collect();
        self.stale.retain(|id, _| known.contains(id));
        dropped
    }
}

/// Build the irrelevant-balance set for this cycle from the ingestion
/// results and the accounts `carried` over from earlier cycles
///
/// # Errors
///
/// Returns `SyncError::Aggregation` when the account list cannot be read. The
/// cycle cannot continue without it, so the caller treats this as fatal.
pub async fn aggregate(
    results: &[IngestResult],
    carried: &IrrelevantBalances,
    store: &dyn LedgerRepository,
) -> Result<IrrelevantBalances, SyncError> {
    let mut set = IrrelevantBalances::merge(results);
    set.absorb(carried);

    let known: HashSet<AccountId> = store
        .list_account_ids()
        .await
        .map_err(|e| SyncError::aggregation(format!("cannot list accounts: {e}")))?
        .into_iter()
        .collect();

    let dropped = set.retain_known(&known);
    if !dropped.is_empty() {
        warn!(accounts = ?dropped, "Dropping touched accounts missing from the store");
    }

    Ok(set)
}
