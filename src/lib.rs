//! Fuel Card Ledger Sync Library
//! # Overview
//!
//! Keeps a local fuel-card ledger consistent with external provider networks.
//! Each sync cycle ingests provider transactions, recomputes the running
//! balances they invalidated, and drives card states and group spending
//! limits toward what each account's balance allows.
//!
//! # Architecture
//!
//! - [`types`] - Domain records, the error taxonomy and per-stage results
//! - [`provider`] - Provider capability traits and the session-managing client
//! - [`store`] - Persistence boundary and the in-memory store
//! - [`ledger`] - Running-balance recompute and overdraft resolution
//! - [`sync`] - Aggregation, reconciliation, limits and the cycle orchestrator
//! - [`io`] - Fixture loading and account output
//! - [`cli`] - CLI argument parsing and logging setup
//! - [`runner`] - Fixture-driven pipeline run used by the binary
//!
//! # Cycle
//!
//! 1. **Ingest**: every provider in parallel, each bounded by a timeout
//! 2. **Aggregate**: earliest stale timestamp per touched account
//! 3. **Recompute**: running balances from that point, one writer per account
//! 4. **Reconcile**: card states and group limits, in parallel
//!
//! # Card States
//!
//! - **Active**: usable
//! - **Blocked (overdraft)**: blocked by reconciliation; lifted automatically
//!   once the account is back within its overdraft
//! - **Blocked (manual)**: blocked by an operator; never lifted automatically
//! - **Blocked (PIN)**: locked at the provider; cleared only by a provider-side
//!   unlock

pub mod cli;
pub mod io;
pub mod ledger;
pub mod provider;
pub mod runner;
pub mod store;
pub mod sync;
pub mod types;

pub use ledger::LedgerEngine;
pub use store::{InMemoryStore, LedgerRepository};
pub use sync::{SyncConfig, SyncOrchestrator};
pub use types::{
    Account, AccountId, Card, CardId, CardState, CycleOutcome, CycleStatus, LedgerTransaction,
    ProviderKind, SyncError,
};
