//! Provider identity and the snapshot records exchanged with provider networks

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;

/// One of the two fuel-card networks the ledger is fed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProviderKind {
    ProviderA,
    ProviderB,
}

impl ProviderKind {
    /// All providers, in the order their ingestion branches are spawned
    pub const ALL: [ProviderKind; 2] = [ProviderKind::ProviderA, ProviderKind::ProviderB];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::ProviderA => "provider_a",
            ProviderKind::ProviderB => "provider_b",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "provider_a" | "a" => Ok(ProviderKind::ProviderA),
            "provider_b" | "b" => Ok(ProviderKind::ProviderB),
            other => Err(format!("Unknown provider '{}'", other)),
        }
    }
}

/// Contract balance as reported by a provider
#[derive(Debug, Clone, PartialEq)]
pub struct BalanceSnapshot {
    pub provider: ProviderKind,
    pub balance: Decimal,
}

/// A card as seen by the provider
#[derive(Debug, Clone, PartialEq)]
pub struct CardSnapshot {
    /// Provider-side card identifier
    pub external_ref: String,

    /// Whether the provider currently lets the card transact
    pub active: bool,

    /// Locked by the provider after repeated wrong PIN entry
    pub pin_locked: bool,
}

/// A transaction as reported by a provider
#[derive(Debug, Clone, PartialEq)]
pub struct TxnSnapshot {
    /// Provider-side transaction identifier, unique per provider
    pub external_ref: String,

    /// Provider-side card identifier the purchase was made with
    pub card_ref: String,

    /// Provider-reported time of the purchase or top-up
    pub timestamp: DateTime<Utc>,

    /// Signed monetary delta (purchases are negative)
    pub amount: Decimal,
}

/// One page of a paginated transaction listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TxnPage {
    pub items: Vec<TxnSnapshot>,
    pub has_more: bool,
}

/// Spending limit of a card group for one product category
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupLimit {
    pub category: String,
    pub amount: Decimal,
}
