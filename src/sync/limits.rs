//! Group spending limits
//!
//! Each account owns one card group per provider. When an account's balance
//! moves, its cards are (re)bound to that group, members that are no longer
//! the account's cards are unbound, and the group's limit is set to what the
//! account can still spend, for every configured category.

use crate::provider::ProviderSet;
use crate::store::LedgerRepository;
use crate::types::{Card, GroupLimit, LimitResult, ProviderKind, RecomputeResult};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};

/// Limit for every category given the account's available amount
///
/// Negative availability is pushed as zero. Amounts are rounded to cents.
pub fn plan_limits(available: Decimal, categories: &[String]) -> Vec<GroupLimit> {
    let amount = available.max(Decimal::ZERO).round_dp(2);
    categories
        .iter()
        .map(|category| GroupLimit {
            category: category.clone(),
            amount,
        })
        .collect()
}

#[derive(Clone)]
pub struct LimitPlanner {
    store: Arc<dyn LedgerRepository>,
    providers: ProviderSet,
    categories: Vec<String>,
}

impl LimitPlanner {
    pub fn new(
        store: Arc<dyn LedgerRepository>,
        providers: ProviderSet,
        categories: Vec<String>,
    ) -> Self {
        Self {
            store,
            providers,
            categories,
        }
    }

    /// Push group bindings and limits for a resolved account
    ///
    /// Returns one entry per provider the account has a group on, or `None`
    /// if the account could not be read from the store.
    pub async fn push(&self, recomputed: &RecomputeResult) -> Option<Vec<LimitResult>> {
        let account_id = recomputed.account;
        let (account, cards) = match tokio::try_join!(
            self.store.get_account(account_id),
            self.store.get_cards_for_account(account_id)
        ) {
            Ok(found) => found,
            Err(e) => {
                warn!(account = account_id, error = %e, "Skipping limit push");
                return None;
            }
        };

        let limits = plan_limits(recomputed.available, &self.categories);
        let mut results = Vec::with_capacity(account.groups.len());

        for (&provider, group_ref) in &account.groups {
            let Some(client) = self.providers.get(provider) else {
                debug!(account = account_id, provider = %provider, "No client for group provider");
                continue;
            };
            let card_refs = card_refs_on(provider, &cards);

            let mut failures = Vec::new();
            let bound = client.bind_cards_to_group(&card_refs, group_ref).await;
            failures.extend(bound.failed.into_iter().map(|(_, e)| e));

            let cards_unbound = match client.fetch_group_cards(group_ref).await {
                Ok(members) => {
                    let stale: Vec<String> = members
                        .into_iter()
                        .filter(|member| !card_refs.contains(member))
                        .collect();
                    if stale.is_empty() {
                        0
                    } else {
                        debug!(account = account_id, group = %group_ref, stale = ?stale, "Unbinding foreign cards");
                        let unbound = client.unbind_cards_from_group(&stale).await;
                        failures.extend(unbound.failed.into_iter().map(|(_, e)| e));
                        unbound.succeeded.len()
                    }
                }
                Err(e) => {
                    failures.push(e);
                    0
                }
            };

            let limits_set = match client.set_group_limits(group_ref, &limits).await {
                Ok(()) => true,
                Err(e) => {
                    failures.push(e);
                    false
                }
            };

            for failure in &failures {
                warn!(account = account_id, group = %group_ref, error = %failure, "Limit push failed");
            }
            results.push(LimitResult {
                account: account_id,
                provider,
                cards_bound: bound.succeeded.len(),
                cards_unbound,
                limits_set,
                failures,
            });
        }

        Some(results)
    }
}

fn card_refs_on(provider: ProviderKind, cards: &[Card]) -> Vec<String> {
    cards
        .iter()
        .filter_map(|card| card.providers.get(&provider).cloned())
        .collect()
}
