//! Sync pipeline
//!
//! - `aggregate` - Merge per-provider stale accounts into one set
//! - `reconciler` - Card states toward the account's overdraft state
//! - `limits` - Group bindings and spending limits
//! - `owed` - Accounts whose provider pushes are retried next cycle
//! - `orchestrator` - One cycle: ingest, aggregate, recompute, reconcile
//! - `schedule` - Periodic triggering with skip-if-running
//! - `config` - Pipeline settings

pub mod aggregate;
pub mod config;
pub mod limits;
pub mod orchestrator;
pub mod owed;
pub mod reconciler;
pub mod schedule;

pub use aggregate::{aggregate, IrrelevantBalances};
pub use config::SyncConfig;
pub use limits::{plan_limits, LimitPlanner};
pub use orchestrator::SyncOrchestrator;
pub use owed::OwedPushes;
pub use reconciler::{plan_transition, CardStateReconciler, Transition};
pub use schedule::run_schedule;
