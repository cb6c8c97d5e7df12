//! Ledger module
//!
//! - `replay` - Pure running-balance replay over an anchor
//! - `engine` - Recompute with single-writer-per-account persistence
//! - `resolver` - Current balance and overdraft decision

pub mod engine;
pub mod replay;
pub mod resolver;

pub use engine::LedgerEngine;
pub use replay::{replay, RecomputedLedger};
pub use resolver::{expire_temporary_overdrafts, BalanceResolver, Resolution};
