//! Types module
//!
//! Contains core data structures used throughout the application.
//! This module organizes types into logical submodules:
//! - `account`: Accounts and overdraft thresholds
//! - `card`: Fuel cards and their block state
//! - `transaction`: Ledger entries and balance updates
//! - `provider`: Provider identity and snapshot records
//! - `outcome`: Per-stage result records of a sync cycle
//! - `error`: Error types for the pipeline

pub mod account;
pub mod card;
pub mod error;
pub mod outcome;
pub mod provider;
pub mod transaction;

pub use account::{Account, AccountId, ContractScheme, TemporaryOverdraft};
pub use card::{BlockReason, Card, CardId, CardState};
pub use error::{ProviderError, ProviderErrorKind, SyncError};
pub use outcome::{
    CardAction, CycleOutcome, CycleStatus, IngestResult, IngestStatus, LimitResult,
    PerCardResult, ReconcileResult, RecomputeResult,
};
pub use provider::{BalanceSnapshot, CardSnapshot, GroupLimit, ProviderKind, TxnPage, TxnSnapshot};
pub use transaction::{BalanceUpdate, LedgerTransaction, TransactionId, TransactionSource};
