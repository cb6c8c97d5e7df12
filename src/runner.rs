//! Fixture-driven pipeline run
//!
//! Wires a fixture directory into a full pipeline: a seeded store, one
//! session client per provider directory, and the scheduler. This is what the
//! binary executes.
//!
//! ```text
//! fixtures/ → load_fixtures → InMemoryStore ─────────────┐
//!                           → InMemoryTransport × N      │
//!                               → SessionClient × N ──> SyncOrchestrator → run_schedule
//!                                                                             ↓
//!                                                              write_accounts_csv → output
//! ```

use crate::io::{load_fixtures, write_accounts_csv};
use crate::provider::{ProviderClient, ProviderSet, SessionClient};
use crate::sync::{run_schedule, SyncConfig, SyncOrchestrator};
use crate::types::{Account, Card, CycleOutcome, SyncError};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

/// What a run produced
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub outcomes: Vec<CycleOutcome>,

    /// Final account states, sorted by id
    pub accounts: Vec<Account>,

    /// Final local card states, sorted by id
    pub cards: Vec<Card>,
}

/// Load `fixtures` and run the configured number of cycles
pub async fn run_fixtures(fixtures: &Path, config: SyncConfig) -> Result<RunReport, SyncError> {
    let loaded = load_fixtures(fixtures).await?;
    let store = Arc::new(loaded.seed_store());

    let client_config = config.client_config();
    let mut clients: Vec<Arc<dyn ProviderClient>> = Vec::with_capacity(loaded.providers.len());
    for provider in loaded.providers {
        let transport = provider.into_transport().await;
        clients.push(Arc::new(SessionClient::new(transport, client_config.clone())));
    }

    let orchestrator = Arc::new(SyncOrchestrator::new(
        store.clone(),
        ProviderSet::new(clients),
        config,
    ));
    let outcomes = run_schedule(orchestrator).await;

    Ok(RunReport {
        outcomes,
        accounts: store.all_accounts(),
        cards: store.all_cards(),
    })
}

/// Run on a dedicated multi-threaded runtime and write final balances to `output`
pub fn run(fixtures: &Path, config: SyncConfig, output: &mut dyn Write) -> Result<(), SyncError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.max_concurrent.max(1))
        .enable_all()
        .build()?;

    let report = runtime.block_on(run_fixtures(fixtures, config))?;

    write_accounts_csv(&report.accounts, output).map_err(|e| SyncError::Io {
        message: format!("Failed to write accounts: {}", e),
    })
}
