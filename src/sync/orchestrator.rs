//! Sync cycle orchestration
//!
//! One cycle runs four stages:
//!
//! ```text
//! 1. ingest      provider A ─┐            (parallel, one timeout per branch)
//!                provider B ─┤
//! 2. aggregate               └─> irrelevant balances   (fatal on failure)
//! 3. recompute   account ... account                   (bounded parallelism)
//! 4. reconcile   card states ─┬─ group limits          (parallel)
//! ```
//!
//! A failed provider branch never stops the others; the accounts it did not
//! touch are simply not recomputed this cycle. Per-account and per-card
//! failures are recorded in the outcome and retried on the next cycle: a
//! failed recompute stays in the carried stale set, and a failed card or limit
//! push leaves its account in `OwedPushes`. Owed accounts that are not
//! recomputed are revisited from their stored balance before stage 4.
//!
//! Triggers never stack: a trigger that arrives while a cycle is running
//! returns `CycleStatus::Skipped`.

use super::aggregate::{aggregate, IrrelevantBalances};
use super::config::SyncConfig;
use super::limits::LimitPlanner;
use super::owed::OwedPushes;
use super::reconciler::CardStateReconciler;
use crate::ledger::{self, LedgerEngine};
use crate::provider::{ProviderClient, ProviderSet};
use crate::store::LedgerRepository;
use crate::types::{
    AccountId, CardAction, CycleOutcome, CycleStatus, IngestResult, IngestStatus, RecomputeResult,
    SyncError,
};
use futures::future;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Clears the running flag when the cycle ends, however it ends
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunGuard(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Counters stages update as they go, so a timed-out cycle still reports
/// what it got done
#[derive(Default)]
struct CycleProgress {
    ingest: Mutex<Vec<IngestResult>>,
    accounts_recomputed: AtomicUsize,
    recompute_failures: AtomicUsize,
    accounts_revisited: AtomicUsize,
    cards_blocked: AtomicUsize,
    cards_activated: AtomicUsize,
    push_failures: AtomicUsize,
    limits_pushed: AtomicUsize,
}

impl CycleProgress {
    fn add(counter: &AtomicUsize, n: usize) {
        counter.fetch_add(n, Ordering::SeqCst);
    }

    fn into_outcome(self, cycle: u64, status: CycleStatus) -> CycleOutcome {
        CycleOutcome {
            cycle,
            status,
            ingest: self.ingest.into_inner(),
            accounts_recomputed: self.accounts_recomputed.into_inner(),
            recompute_failures: self.recompute_failures.into_inner(),
            accounts_revisited: self.accounts_revisited.into_inner(),
            cards_blocked: self.cards_blocked.into_inner(),
            cards_activated: self.cards_activated.into_inner(),
            push_failures: self.push_failures.into_inner(),
            limits_pushed: self.limits_pushed.into_inner(),
        }
    }
}

/// Runs sync cycles against one store and one set of providers
///
/// ```text
/// SyncOrchestrator
///     ├── Arc<dyn LedgerRepository>   (shared store)
///     ├── ProviderSet                 (one client per provider)
///     ├── LedgerEngine                (stage 3)
///     ├── CardStateReconciler         (stage 4)
///     └── LimitPlanner                (stage 4)
/// ```
pub struct SyncOrchestrator {
    store: Arc<dyn LedgerRepository>,
    providers: ProviderSet,
    engine: LedgerEngine,
    reconciler: CardStateReconciler,
    limits: LimitPlanner,
    config: SyncConfig,
    running: AtomicBool,
    cycles: AtomicU64,

    /// Stale accounts not yet recomputed; carried across cycles
    pending: Mutex<IrrelevantBalances>,

    /// Accounts whose card or limit pushes have not gone through
    owed: Mutex<OwedPushes>,
}

impl SyncOrchestrator {
    pub fn new(store: Arc<dyn LedgerRepository>, providers: ProviderSet, config: SyncConfig) -> Self {
        Self {
            engine: LedgerEngine::new(Arc::clone(&store)),
            reconciler: CardStateReconciler::new(Arc::clone(&store), providers.clone()),
            limits: LimitPlanner::new(
                Arc::clone(&store),
                providers.clone(),
                config.limit_categories.clone(),
            ),
            store,
            providers,
            config,
            running: AtomicBool::new(false),
            cycles: AtomicU64::new(0),
            pending: Mutex::new(IrrelevantBalances::new()),
            owed: Mutex::new(OwedPushes::new()),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn LedgerRepository> {
        &self.store
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Accounts still waiting for a successful recompute
    pub async fn pending(&self) -> IrrelevantBalances {
        self.pending.lock().await.clone()
    }

    /// Accounts whose provider pushes are retried on the next cycle
    pub async fn owed(&self) -> OwedPushes {
        self.owed.lock().await.clone()
    }

    /// Housekeeping: drop temporary overdrafts that ended before today
    ///
    /// Expired accounts are owed new card states and limits, so the next cycle
    /// applies the lower threshold even if their ledger did not move.
    pub async fn expire_temporary_overdrafts(&self) -> Result<Vec<AccountId>, SyncError> {
        let expired =
            ledger::expire_temporary_overdrafts(self.store.as_ref(), self.config.today()).await?;
        let mut owed = self.owed.lock().await;
        for account in &expired {
            owed.mark_all(*account);
        }
        Ok(expired)
    }

    /// Run one full cycle
    ///
    /// Never fails as a whole: every stage failure is recorded in the returned
    /// outcome. Provider sessions opened during the cycle are released before
    /// it returns.
    pub async fn run_sync_cycle(&self) -> CycleOutcome {
        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        let Some(_guard) = RunGuard::acquire(&self.running) else {
            warn!(cycle, "Previous cycle still running, skipping trigger");
            return CycleOutcome::new(cycle, CycleStatus::Skipped);
        };

        self.run_guarded(cycle)
            .instrument(info_span!("sync_cycle", cycle))
            .await
    }

    async fn run_guarded(&self, cycle: u64) -> CycleOutcome {
        let started = Instant::now();
        let progress = CycleProgress::default();

        let result = timeout(self.config.cycle_timeout, self.run_stages(&progress)).await;
        self.providers.release_all().await;

        let status = match result {
            Ok(Ok(())) => CycleStatus::Completed,
            Ok(Err(e)) => {
                error!(error = %e, "Cycle aborted");
                CycleStatus::Failed {
                    reason: e.to_string(),
                }
            }
            Err(_) => {
                error!(
                    timeout_secs = self.config.cycle_timeout.as_secs_f64(),
                    "Cycle timed out"
                );
                CycleStatus::Failed {
                    reason: format!("cycle exceeded {:?}", self.config.cycle_timeout),
                }
            }
        };

        let outcome = progress.into_outcome(cycle, status);
        info!(
            status = ?outcome.status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            providers_ok = outcome.ingest.iter().filter(|r| r.is_completed()).count(),
            accounts_recomputed = outcome.accounts_recomputed,
            recompute_failures = outcome.recompute_failures,
            accounts_revisited = outcome.accounts_revisited,
            cards_blocked = outcome.cards_blocked,
            cards_activated = outcome.cards_activated,
            push_failures = outcome.push_failures,
            limits_pushed = outcome.limits_pushed,
            "Cycle finished"
        );
        outcome
    }

    async fn run_stages(&self, progress: &CycleProgress) -> Result<(), SyncError> {
        let ingest = future::join_all(
            self.providers
                .iter()
                .map(|client| self.ingest_branch(client.as_ref(), progress)),
        )
        .await;

        let carried = self.pending.lock().await.clone();
        let stale = aggregate(&ingest, &carried, self.store.as_ref()).await?;
        *self.pending.lock().await = stale.clone();
        info!(accounts = stale.len(), "Irrelevant balances aggregated");

        let recomputed = self.recompute_all(&stale, progress).await;

        let owed = self.owed.lock().await.clone();
        let revisited = self.revisit_all(&owed, &recomputed, progress).await;

        let card_targets: Vec<RecomputeResult> = recomputed
            .iter()
            .chain(revisited.iter().filter(|r| owed.cards.contains(&r.account)))
            .cloned()
            .collect();
        let limit_targets: Vec<RecomputeResult> = recomputed
            .iter()
            .filter(|r| r.balance_changed() || owed.limits.contains(&r.account))
            .chain(revisited.iter().filter(|r| owed.limits.contains(&r.account)))
            .cloned()
            .collect();

        tokio::join!(
            self.reconcile_all(card_targets, progress),
            self.push_limits(limit_targets, progress)
        );
        Ok(())
    }

    /// Stage 1 for one provider, bounded by the provider timeout
    async fn ingest_branch(
        &self,
        client: &dyn ProviderClient,
        progress: &CycleProgress,
    ) -> IngestResult {
        let provider = client.provider();
        let mut result = IngestResult::empty(provider, IngestStatus::Completed);

        let finished = timeout(
            self.config.provider_timeout,
            self.ingest_provider(client, &mut result),
        )
        .await;

        match finished {
            Ok(Ok(())) => info!(
                provider = %provider,
                fetched = result.transactions_fetched,
                inserted = result.transactions_inserted,
                accounts = result.touched.len(),
                "Provider ingested"
            ),
            Ok(Err(e)) => {
                warn!(provider = %provider, error = %e, "Provider ingestion failed");
                result.status = IngestStatus::Failed {
                    error: e.to_string(),
                };
            }
            Err(_) => {
                warn!(provider = %provider, "Provider ingestion timed out");
                result.status = IngestStatus::TimedOut;
            }
        }
        progress.ingest.lock().await.push(result.clone());
        result
    }

    async fn ingest_provider(
        &self,
        client: &dyn ProviderClient,
        result: &mut IngestResult,
    ) -> Result<(), SyncError> {
        let provider = client.provider();

        let balance = client.fetch_balance().await?;
        debug!(provider = %provider, balance = %balance.balance, "Contract balance");
        result.balance = Some(balance.balance);

        let cards = client.fetch_cards().await?;
        result.cards_seen = cards.len();
        let changed = self.store.apply_card_snapshots(provider, &cards).await?;
        if changed > 0 {
            info!(provider = %provider, changed, "Card locks mirrored from provider");
        }

        let transactions = client.fetch_transactions(self.config.window_days).await?;
        result.transactions_fetched = transactions.len();
        let summary = self
            .store
            .ingest_transactions(provider, &transactions)
            .await?;
        if summary.unmatched > 0 {
            warn!(
                provider = %provider,
                unmatched = summary.unmatched,
                "Transactions on cards not issued to any account"
            );
        }

        result.transactions_inserted = summary.inserted;
        result.unmatched = summary.unmatched;
        result.touched = summary.touched;
        // Kept even if the cycle is aborted from here on
        self.pending.lock().await.absorb_ingest(result);
        Ok(())
    }

    /// Stage 3: recompute every stale account, a bounded number at a time
    async fn recompute_all(
        &self,
        stale: &IrrelevantBalances,
        progress: &CycleProgress,
    ) -> Vec<RecomputeResult> {
        let today = self.config.today();
        let work: Vec<_> = stale.iter().collect();

        stream::iter(work)
            .map(|(account, from)| async move {
                match self.engine.recompute_and_resolve(account, from, today).await {
                    Ok(result) => {
                        CycleProgress::add(&progress.accounts_recomputed, 1);
                        self.pending.lock().await.settle(account, from);
                        debug!(
                            account,
                            balance = %result.current_balance,
                            breached = result.overdraft_breached,
                            "Account recomputed"
                        );
                        Some(result)
                    }
                    Err(e) => {
                        CycleProgress::add(&progress.recompute_failures, 1);
                        warn!(account, error = %e, "Recompute failed, retrying next cycle");
                        None
                    }
                }
            })
            .buffer_unordered(self.config.max_concurrent.max(1))
            .filter_map(future::ready)
            .collect()
            .await
    }

    /// Resolve owed accounts that were not recomputed this cycle
    async fn revisit_all(
        &self,
        owed: &OwedPushes,
        recomputed: &[RecomputeResult],
        progress: &CycleProgress,
    ) -> Vec<RecomputeResult> {
        let today = self.config.today();
        let work: Vec<AccountId> = owed
            .accounts()
            .into_iter()
            .filter(|account| recomputed.iter().all(|r| r.account != *account))
            .collect();

        stream::iter(work)
            .map(|account| async move {
                match self.engine.resolve_stored(account, today).await {
                    Ok(result) => {
                        CycleProgress::add(&progress.accounts_revisited, 1);
                        debug!(
                            account,
                            breached = result.overdraft_breached,
                            "Account revisited for owed pushes"
                        );
                        Some(result)
                    }
                    Err(e) => {
                        warn!(account, error = %e, "Cannot resolve owed account, retrying next cycle");
                        None
                    }
                }
            })
            .buffer_unordered(self.config.max_concurrent.max(1))
            .filter_map(future::ready)
            .collect()
            .await
    }

    /// Stage 4: drive card states toward each account's overdraft state
    async fn reconcile_all(&self, targets: Vec<RecomputeResult>, progress: &CycleProgress) {
        stream::iter(targets)
            .for_each_concurrent(self.config.max_concurrent.max(1), |result| async move {
                let cards = match self.store.get_cards_for_account(result.account).await {
                    Ok(cards) => cards,
                    Err(e) => {
                        warn!(account = result.account, error = %e, "Cannot load cards");
                        self.owed.lock().await.record_cards(result.account, false);
                        return;
                    }
                };
                let reconciled = self
                    .reconciler
                    .reconcile(result.account, !result.overdraft_breached, &cards)
                    .await;

                CycleProgress::add(
                    &progress.cards_blocked,
                    reconciled.count(|a| *a == CardAction::Blocked),
                );
                CycleProgress::add(
                    &progress.cards_activated,
                    reconciled.count(|a| *a == CardAction::Activated),
                );
                CycleProgress::add(&progress.push_failures, reconciled.push_failures());
                self.owed
                    .lock()
                    .await
                    .record_cards(result.account, !reconciled.has_failures());
            })
            .await;
    }

    /// Stage 4: push group limits for accounts whose balance moved or whose
    /// last push did not complete
    async fn push_limits(&self, targets: Vec<RecomputeResult>, progress: &CycleProgress) {
        stream::iter(targets)
            .for_each_concurrent(self.config.max_concurrent.max(1), |result| async move {
                let Some(pushed) = self.limits.push(&result).await else {
                    self.owed.lock().await.record_limits(result.account, false);
                    return;
                };
                for limit in &pushed {
                    if limit.limits_set {
                        CycleProgress::add(&progress.limits_pushed, 1);
                    }
                    CycleProgress::add(&progress.push_failures, limit.failures.len());
                }
                let done = pushed.iter().all(|limit| limit.is_complete());
                self.owed.lock().await.record_limits(result.account, done);
            })
            .await;
    }
}
