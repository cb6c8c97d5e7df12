//! Account balance resolution
//!
//! Turns a recomputed ledger into the account's current balance and decides
//! whether the account is past its overdraft tolerance.

use super::replay::RecomputedLedger;
use crate::store::LedgerRepository;
use crate::types::{Account, AccountId, SyncError};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::info;

/// Balance state of an account after recompute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub current_balance: Decimal,

    /// Overdraft in force on the evaluation day
    pub overdraft_limit: Decimal,

    /// `current_balance + overdraft_limit`
    pub available: Decimal,

    pub overdraft_breached: bool,
}

pub struct BalanceResolver;

impl BalanceResolver {
    /// Resolve the balance of `account` from `ledger` as of `today`
    ///
    /// The account is breached when its balance drops below the negated sum of
    /// the fixed overdraft and a temporary overdraft that has not yet expired.
    /// Expired temporary overdrafts are ignored here but not removed.
    pub fn resolve(account: &Account, ledger: &RecomputedLedger, today: NaiveDate) -> Resolution {
        Self::resolve_balance(account, ledger.final_balance(), today)
    }

    /// Resolve an already known balance, e.g. the account's stored one
    pub fn resolve_balance(account: &Account, current_balance: Decimal, today: NaiveDate) -> Resolution {
        let overdraft_limit = account.effective_overdraft(today);
        Resolution {
            current_balance,
            overdraft_limit,
            available: current_balance + overdraft_limit,
            overdraft_breached: current_balance < -overdraft_limit,
        }
    }
}

/// Housekeeping: remove temporary overdrafts that ended before `today`
///
/// Runs on its own schedule, separately from resolution.
pub async fn expire_temporary_overdrafts(
    store: &dyn LedgerRepository,
    today: NaiveDate,
) -> Result<Vec<AccountId>, SyncError> {
    let expired = store.expire_temporary_overdrafts(today).await?;
    if !expired.is_empty() {
        info!(count = expired.len(), accounts = ?expired, "Temporary overdrafts expired");
    }
    Ok(expired)
}
