//! Card state reconciliation
//!
//! Brings every card of an account in line with the account's overdraft
//! state: cards of a breached account are blocked, cards of an account back
//! within tolerance are reactivated. Desired states are pushed to each
//! provider the card is bound to, and the local state only moves once every
//! push has succeeded. A card whose push failed keeps its old local state and
//! is pushed again on the next cycle.
//!
//! Cards are handled independently: one card's failure never affects another.

use crate::provider::ProviderSet;
use crate::store::LedgerRepository;
use crate::types::{
    AccountId, BlockReason, Card, CardAction, CardState, PerCardResult, ReconcileResult, SyncError,
};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What to do with one card
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Push this state to the providers, then store it
    Apply(CardState),

    /// Already in the desired state
    Keep,

    /// Forbidden transition
    Reject(SyncError),
}

/// Decide the transition for `card` given the account's desired card state
///
/// Only blocks this pipeline placed itself are lifted. A card held by an
/// operator (`manual_lock` or a manual block) or PIN-locked at the provider is
/// never reactivated here.
pub fn plan_transition(card: &Card, desired_active: bool) -> Transition {
    match (card.state, desired_active) {
        (CardState::Active, true) | (CardState::Blocked(_), false) => Transition::Keep,
        _ if card.manual_lock => Transition::Reject(SyncError::policy_violation(
            card.id,
            "card state is pinned by an operator",
        )),
        (CardState::Active, false) => {
            Transition::Apply(CardState::Blocked(BlockReason::Overdraft))
        }
        (CardState::Blocked(BlockReason::Overdraft), true) => Transition::Apply(CardState::Active),
        (CardState::Blocked(BlockReason::Pin), true) => Transition::Reject(
            SyncError::policy_violation(card.id, "card is PIN-locked at the provider"),
        ),
        (CardState::Blocked(BlockReason::Manual), true) => Transition::Reject(
            SyncError::policy_violation(card.id, "card was blocked by an operator"),
        ),
    }
}

#[derive(Clone)]
pub struct CardStateReconciler {
    store: Arc<dyn LedgerRepository>,
    providers: ProviderSet,
}

impl CardStateReconciler {
    pub fn new(store: Arc<dyn LedgerRepository>, providers: ProviderSet) -> Self {
        Self { store, providers }
    }

    /// Reconcile `cards` of `account` toward `desired_active`
    ///
    /// Cards are processed concurrently. The result lists every card, in the
    /// order given.
    pub async fn reconcile(
        &self,
        account: AccountId,
        desired_active: bool,
        cards: &[Card],
    ) -> ReconcileResult {
        let results = join_all(
            cards
                .iter()
                .map(|card| self.reconcile_card(card, desired_active)),
        )
        .await;

        ReconcileResult {
            account,
            desired_active,
            cards: results,
        }
    }

    async fn reconcile_card(&self, card: &Card, desired_active: bool) -> PerCardResult {
        let target = match plan_transition(card, desired_active) {
            Transition::Keep => return PerCardResult::new(card.id, CardAction::Unchanged),
            Transition::Reject(reason) => {
                info!(card = card.id, reason = %reason, "Card transition refused");
                return PerCardResult::new(card.id, CardAction::Rejected(reason));
            }
            Transition::Apply(target) => target,
        };

        let active = target.is_active();
        let pushes = card.providers.iter().filter_map(|(&provider, card_ref)| {
            match self.providers.get(provider) {
                Some(client) => Some(client.set_card_state(card_ref, active)),
                None => {
                    debug!(card = card.id, provider = %provider, "No client for bound provider");
                    None
                }
            }
        });
        let failures: Vec<_> = join_all(pushes)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();

        if !failures.is_empty() {
            for failure in &failures {
                warn!(card = card.id, error = %failure, "Card state push failed");
            }
            return PerCardResult {
                card: card.id,
                action: CardAction::Failed,
                failures,
            };
        }

        if let Err(e) = self.store.update_card_state(card.id, target).await {
            warn!(card = card.id, error = %e, "Card state pushed but not stored");
            return PerCardResult::new(card.id, CardAction::Failed);
        }

        let action = if active {
            CardAction::Activated
        } else {
            CardAction::Blocked
        };
        info!(card = card.id, number = %card.number, action = ?action, "Card state reconciled");
        PerCardResult::new(card.id, action)
    }
}
