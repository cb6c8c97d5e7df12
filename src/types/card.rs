//! Fuel card types
//!
//! A card is either active or blocked. Blocks carry the reason that caused
//! them, which decides whether automatic reconciliation may lift the block.

use super::account::AccountId;
use super::provider::ProviderKind;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Card identifier
pub type CardId = u32;

/// Why a card is blocked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// Blocked by reconciliation because the account went over its overdraft
    Overdraft,

    /// Blocked by an operator or manager
    Manual,

    /// Locked by the provider after wrong PIN entries; only a provider-side
    /// unlock clears it
    Pin,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::Overdraft => "overdraft",
            BlockReason::Manual => "manual",
            BlockReason::Pin => "pin",
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlockReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "overdraft" | "provider" => Ok(BlockReason::Overdraft),
            "manual" => Ok(BlockReason::Manual),
            "pin" => Ok(BlockReason::Pin),
            other => Err(format!("Unknown block reason '{}'", other)),
        }
    }
}

/// Activation state of a card
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardState {
    Active,
    Blocked(BlockReason),
}

impl CardState {
    pub fn is_active(&self) -> bool {
        matches!(self, CardState::Active)
    }

    pub fn block_reason(&self) -> Option<BlockReason> {
        match self {
            CardState::Active => None,
            CardState::Blocked(reason) => Some(*reason),
        }
    }
}

/// A fuel card
#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    /// The card ID
    pub id: CardId,

    /// Printed card number
    pub number: String,

    /// The account the card is issued to, if any
    pub account: Option<AccountId>,

    pub state: CardState,

    /// Operator pinned the card's state; reconciliation leaves it alone
    pub manual_lock: bool,

    /// Provider-side identifier of this card, per provider it is bound to
    pub providers: BTreeMap<ProviderKind, String>,
}

impl Card {
    /// Create an active, unassigned card with no provider bindings
    pub fn new(id: CardId, number: impl Into<String>) -> Self {
        Card {
            id,
            number: number.into(),
            account: None,
            state: CardState::Active,
            manual_lock: false,
            providers: BTreeMap::new(),
        }
    }
}
