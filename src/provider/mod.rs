//! Provider networks
//!
//! Two traits split the provider boundary:
//!
//! - [`ProviderTransport`] is the raw wire capability of one network: one
//!   call per request, explicit session tokens, pages. Its shape is owned by
//!   the network and treated as a black box.
//! - [`ProviderClient`] is what the pipeline uses. [`SessionClient`] builds it
//!   on top of any transport and owns the session lifecycle, pagination, the
//!   one-month window clamp and backoff.
//!
//! `memory` holds a fixture-backed transport used by the binary and tests.

pub mod memory;
pub mod retry;
pub mod session;

pub use memory::InMemoryTransport;
pub use retry::RetryPolicy;
pub use session::{ClientConfig, SessionClient, MAX_WINDOW_DAYS};

use crate::types::{
    BalanceSnapshot, CardSnapshot, GroupLimit, ProviderError, ProviderKind, TxnPage, TxnSnapshot,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;

/// Opaque session token issued by a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken(pub String);

/// Per-item result of a batched, non-transactional provider write
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, ProviderError)>,
}

impl BatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Wire-level operations of one provider network
#[async_trait]
pub trait ProviderTransport: Send + Sync {
    fn provider(&self) -> ProviderKind;

    async fn authenticate(&self) -> Result<SessionToken, ProviderError>;

    async fn logout(&self, session: &SessionToken) -> Result<(), ProviderError>;

    async fn balance(&self, session: &SessionToken) -> Result<BalanceSnapshot, ProviderError>;

    async fn cards(&self, session: &SessionToken) -> Result<Vec<CardSnapshot>, ProviderError>;

    /// One page of transactions in `[from, to]`; the range may not exceed a month
    async fn transactions_page(
        &self,
        session: &SessionToken,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        offset: usize,
        limit: usize,
    ) -> Result<TxnPage, ProviderError>;

    async fn set_card_state(
        &self,
        session: &SessionToken,
        card_ref: &str,
        active: bool,
    ) -> Result<(), ProviderError>;

    async fn bind_card(
        &self,
        session: &SessionToken,
        group_ref: &str,
        card_ref: &str,
    ) -> Result<(), ProviderError>;

    /// Cards currently bound to `group_ref`
    async fn group_cards(
        &self,
        session: &SessionToken,
        group_ref: &str,
    ) -> Result<Vec<String>, ProviderError>;

    async fn unbind_card(&self, session: &SessionToken, card_ref: &str)
        -> Result<(), ProviderError>;

    async fn set_group_limit(
        &self,
        session: &SessionToken,
        group_ref: &str,
        limit: &GroupLimit,
    ) -> Result<(), ProviderError>;
}

/// Capability object the pipeline uses to talk to one provider
///
/// Every write is idempotent by external identifier: repeating a call with
/// the same intent leaves the provider in the same state.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn provider(&self) -> ProviderKind;

    async fn fetch_balance(&self) -> Result<BalanceSnapshot, ProviderError>;

    async fn fetch_cards(&self) -> Result<Vec<CardSnapshot>, ProviderError>;

    /// All transactions of the last `window_days`, across every page
    async fn fetch_transactions(&self, window_days: u32) -> Result<Vec<TxnSnapshot>, ProviderError>;

    async fn set_card_state(&self, card_ref: &str, active: bool) -> Result<(), ProviderError>;

    async fn bind_cards_to_group(&self, card_refs: &[String], group_ref: &str) -> BatchOutcome;

    async fn fetch_group_cards(&self, group_ref: &str) -> Result<Vec<String>, ProviderError>;

    async fn unbind_cards_from_group(&self, card_refs: &[String]) -> BatchOutcome;

    async fn set_group_limits(
        &self,
        group_ref: &str,
        limits: &[GroupLimit],
    ) -> Result<(), ProviderError>;

    /// End the session, if one is open
    async fn release(&self);
}

/// The provider clients of one pipeline, looked up by network
///
/// Sessions opened through these clients are closed by `release_all` at the
/// end of every run.
#[derive(Clone, Default)]
pub struct ProviderSet {
    clients: Vec<Arc<dyn ProviderClient>>,
}

impl ProviderSet {
    pub fn new(clients: Vec<Arc<dyn ProviderClient>>) -> Self {
        Self { clients }
    }

    pub fn get(&self, provider: ProviderKind) -> Option<&Arc<dyn ProviderClient>> {
        self.clients.iter().find(|c| c.provider() == provider)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ProviderClient>> {
        self.clients.iter()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub async fn release_all(&self) {
        join_all(self.clients.iter().map(|c| c.release())).await;
    }
}
