//! Provider pushes still owed from earlier cycles
//!
//! Stage 4 only sees accounts that were recomputed in the current cycle. A
//! card or limit push that failed, or a threshold that changed without any new
//! transaction, would otherwise wait for the account's next ledger change.
//! Accounts listed here are resolved from their stored balance every cycle
//! until their pushes go through.

use crate::types::AccountId;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwedPushes {
    /// Accounts with at least one card not in its desired state
    pub cards: BTreeSet<AccountId>,

    /// Accounts whose group bindings or limits are not in place
    pub limits: BTreeSet<AccountId>,
}

impl OwedPushes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty() && self.limits.is_empty()
    }

    /// Every account owed anything
    pub fn accounts(&self) -> BTreeSet<AccountId> {
        self.cards.union(&self.limits).copied().collect()
    }

    /// Owe both card states and limits, e.g. after the threshold changed
    pub fn mark_all(&mut self, account: AccountId) {
        self.cards.insert(account);
        self.limits.insert(account);
    }

    pub fn record_cards(&mut self, account: AccountId, done: bool) {
        record(&mut self.cards, account, done);
    }

    pub fn record_limits(&mut self, account: AccountId, done: bool) {
        record(&mut self.limits, account, done);
    }
}

fn record(set: &mut BTreeSet<AccountId>, account: AccountId, done: bool) {
    if done {
        set.remove(&account);
    } else {
        set.insert(account);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_stays_owed_until_push_succeeds() {
        let mut owed = OwedPushes::new();

        owed.record_cards(3, false);
        owed.record_cards(3, false);
        assert_eq!(owed.cards.len(), 1);

        owed.record_cards(3, true);
        assert!(owed.is_empty());
    }

    #[test]
    fn test_accounts_unions_both_sets() {
        let mut owed = OwedPushes::new();
        owed.mark_all(1);
        owed.record_limits(2, false);
        owed.record_limits(1, true);

        assert_eq!(owed.accounts().into_iter().collect::<Vec<_>>(), vec![1, 2]);
        assert!(owed.cards.contains(&1));
        assert!(!owed.limits.contains(&1));
    }
}
