//! Ledger transaction types
//!
//! A ledger transaction is immutable except for its derived running balance,
//! which only the recompute engine rewrites.

use super::account::AccountId;
use super::card::CardId;
use super::provider::ProviderKind;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Transaction identifier
pub type TransactionId = u64;

/// Where a ledger entry came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionSource {
    /// Imported from a provider; `external_ref` is unique per provider
    Provider {
        provider: ProviderKind,
        external_ref: String,
    },

    /// Corrective entry booked by an operator
    Manual,
}

/// An entry in an account's ledger
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerTransaction {
    /// Unique transaction identifier
    pub id: TransactionId,

    /// The owning account
    pub account: AccountId,

    /// Provider-reported timestamp
    pub timestamp: DateTime<Utc>,

    /// Signed monetary delta; never rewritten
    pub delta: Decimal,

    /// Running balance after this entry (derived)
    pub balance: Decimal,

    /// Insertion order within the store
    ///
    /// Entries sharing a timestamp replay in this order.
    pub seq: u64,

    pub source: TransactionSource,

    /// Card the purchase was made with, if any
    pub card: Option<CardId>,
}

/// A single derived-balance write produced by a recompute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceUpdate {
    pub transaction: TransactionId,
    pub balance: Decimal,
}
