//! Running-balance replay
//!
//! Pure part of the recompute: given the anchor and the transactions from the
//! window start onward, produce the running balances. No I/O happens here, so
//! replaying the same inputs always yields the same output.

use crate::types::{AccountId, BalanceUpdate, LedgerTransaction, SyncError};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashSet;

/// An account's ledger after replay
#[derive(Debug, Clone, PartialEq)]
pub struct RecomputedLedger {
    pub account: AccountId,

    /// Start of the replayed window
    pub from: DateTime<Utc>,

    /// Balance the replay started from (zero without an anchor)
    pub anchor_balance: Decimal,

    /// Replayed transactions in application order, carrying their new balances
    pub entries: Vec<LedgerTransaction>,

    /// Balances that differ from what was stored
    pub updates: Vec<BalanceUpdate>,
}

impl RecomputedLedger {
    /// Balance after the last replayed entry, or the anchor balance if none
    pub fn final_balance(&self) -> Decimal {
        self.entries
            .last()
            .map(|t| t.balance)
            .unwrap_or(self.anchor_balance)
    }
}

/// Replay `transactions` on top of `anchor`
///
/// Transactions are ordered by timestamp with a stable sort, so entries that
/// share a timestamp keep the order they were handed in.
///
/// # Errors
///
/// Returns `SyncError::LedgerInconsistency` if an entry belongs to another
/// account, appears twice, is older than the anchor, or if a running balance
/// overflows.
pub fn replay(
    account: AccountId,
    from: DateTime<Utc>,
    anchor: Option<&LedgerTransaction>,
    mut transactions: Vec<LedgerTransaction>,
) -> Result<RecomputedLedger, SyncError> {
    transactions.sort_by_key(|t| t.timestamp);

    let mut seen = HashSet::with_capacity(transactions.len());
    for txn in &transactions {
        if txn.account != account {
            return Err(SyncError::ledger_inconsistency(
                account,
                format!("transaction {} belongs to account {}", txn.id, txn.account),
            ));
        }
        if !seen.insert(txn.id) {
            return Err(SyncError::ledger_inconsistency(
                account,
                format!("transaction {} appears twice", txn.id),
            ));
        }
    }

    if let (Some(anchor), Some(first)) = (anchor, transactions.first()) {
        if anchor.timestamp > first.timestamp {
            return Err(SyncError::ledger_inconsistency(
                account,
                format!(
                    "anchor {} at {} is later than transaction {} at {}",
                    anchor.id, anchor.timestamp, first.id, first.timestamp
                ),
            ));
        }
    }

    let anchor_balance = anchor.map(|a| a.balance).unwrap_or(Decimal::ZERO);
    let mut running = anchor_balance;
    let mut updates = Vec::new();

    for txn in transactions.iter_mut() {
        running = running.checked_add(txn.delta).ok_or_else(|| {
            SyncError::ledger_inconsistency(
                account,
                format!("running balance overflows at transaction {}", txn.id),
            )
        })?;
        if txn.balance != running {
            txn.balance = running;
            updates.push(BalanceUpdate {
                transaction: txn.id,
                balance: running,
            });
        }
    }

    Ok(RecomputedLedger {
        account,
        from,
        anchor_balance,
        entries: transactions,
        updates,
    })
}
