//! Account-related types for the fuel-card ledger
//!
//! This module defines the Account structure, its contract scheme and the
//! overdraft thresholds the balance resolver checks against.

use super::provider::ProviderKind;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Account identifier
pub type AccountId = u32;

/// Contract scheme an account is billed under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContractScheme {
    /// Fuel is paid for in advance; the balance is a deposit
    #[default]
    Prepaid,

    /// Postpaid contract where the organization may buy more than its deposit
    Overbought,
}

impl ContractScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractScheme::Prepaid => "prepaid",
            ContractScheme::Overbought => "overbought",
        }
    }
}

/// Temporary overdraft granted until (and including) a calendar date
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemporaryOverdraft {
    /// Additional negative balance tolerated while the grant is live
    pub amount: Decimal,

    /// Last day on which the grant counts
    pub until: NaiveDate,
}

impl TemporaryOverdraft {
    /// A grant ending on `until` still counts on that day and stops the day after.
    pub fn is_active_on(&self, today: NaiveDate) -> bool {
        self.until >= today
    }
}

/// Organization billing entity
///
/// The balance is always derivable by replaying the account's ledger from a
/// known anchor. Only the ledger recompute path writes it.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    /// The account ID
    pub id: AccountId,

    /// Current balance as of the last recompute
    pub balance: Decimal,

    /// Permanent overdraft tolerance (a positive amount)
    pub fixed_overdraft: Decimal,

    /// Optional time-limited overdraft on top of the fixed one
    pub temporary_overdraft: Option<TemporaryOverdraft>,

    /// Active contract scheme
    pub scheme: ContractScheme,

    /// Card group this account's cards are bound to, per provider
    pub groups: BTreeMap<ProviderKind, String>,
}

impl Account {
    /// Create a prepaid account with zero balance and no overdraft
    pub fn new(id: AccountId) -> Self {
        Account {
            id,
            balance: Decimal::ZERO,
            fixed_overdraft: Decimal::ZERO,
            temporary_overdraft: None,
            scheme: ContractScheme::Prepaid,
            groups: BTreeMap::new(),
        }
    }

    /// Total negative balance tolerated on `today`
    ///
    /// The temporary part only counts while its end date has not passed.
    pub fn effective_overdraft(&self, today: NaiveDate) -> Decimal {
        let temporary = self
            .temporary_overdraft
            .filter(|t| t.is_active_on(today))
            .map(|t| t.amount)
            .unwrap_or(Decimal::ZERO);
        self.fixed_overdraft + temporary
    }
}
