//! Fixture-backed provider network
//!
//! `InMemoryTransport` behaves like a provider API without a network: it
//! issues session tokens, pages transactions, enforces the one-month range
//! limit and keeps card, group and limit state. The binary feeds it from
//! fixture files; tests use its fault knobs to simulate outages, rate
//! limits, expired sessions, slow responses and per-card rejections.

use super::{ProviderTransport, SessionToken};
use crate::types::{
    BalanceSnapshot, CardSnapshot, GroupLimit, ProviderError, ProviderErrorKind, ProviderKind,
    TxnPage, TxnSnapshot,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// In-memory provider network
#[derive(Debug)]
pub struct InMemoryTransport {
    provider: ProviderKind,
    balance: RwLock<Decimal>,
    cards: DashMap<String, CardSnapshot>,

    /// Transactions in provider-reported order
    transactions: RwLock<Vec<TxnSnapshot>>,

    groups: DashMap<String, BTreeSet<String>>,
    limits: DashMap<(String, String), Decimal>,

    /// Number of the session currently accepted; 0 when none is
    live_session: AtomicU64,
    sessions_issued: AtomicU64,
    logouts: AtomicU64,
    page_requests: AtomicUsize,
    card_state_calls: AtomicUsize,

    transient_read_failures: AtomicU32,
    rate_limited_reads: AtomicU32,
    unreachable: AtomicBool,
    failing_cards: DashMap<String, ()>,
    rejecting_limits: AtomicBool,
    latency_ms: AtomicU64,
}

impl InMemoryTransport {
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            balance: RwLock::new(Decimal::ZERO),
            cards: DashMap::new(),
            transactions: RwLock::new(Vec::new()),
            groups: DashMap::new(),
            limits: DashMap::new(),
            live_session: AtomicU64::new(0),
            sessions_issued: AtomicU64::new(0),
            logouts: AtomicU64::new(0),
            page_requests: AtomicUsize::new(0),
            card_state_calls: AtomicUsize::new(0),
            transient_read_failures: AtomicU32::new(0),
            rate_limited_reads: AtomicU32::new(0),
            unreachable: AtomicBool::new(false),
            failing_cards: DashMap::new(),
            rejecting_limits: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
        }
    }

    pub async fn set_balance(&self, balance: Decimal) {
        *self.balance.write().await = balance;
    }

    pub fn upsert_card(&self, card: CardSnapshot) {
        self.cards.insert(card.external_ref.clone(), card);
    }

    pub async fn push_transaction(&self, transaction: TxnSnapshot) {
        self.transactions.write().await.push(transaction);
    }

    /// The next `count` reads fail with a transport error
    pub fn fail_next_reads(&self, count: u32) {
        self.transient_read_failures.store(count, Ordering::SeqCst);
    }

    /// The next `count` reads are answered with a rate-limit response
    pub fn rate_limit_next_reads(&self, count: u32) {
        self.rate_limited_reads.store(count, Ordering::SeqCst);
    }

    /// Every call, including authentication, fails while set
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Writes targeting `card_ref` are rejected by the API
    pub fn fail_card(&self, card_ref: &str) {
        self.failing_cards.insert(card_ref.to_string(), ());
    }

    pub fn clear_failing_cards(&self) {
        self.failing_cards.clear();
    }

    /// Group limit writes are rejected by the API while set
    pub fn reject_group_limits(&self, rejecting: bool) {
        self.rejecting_limits.store(rejecting, Ordering::SeqCst);
    }

    /// Invalidate the current session server-side
    pub fn expire_session(&self) {
        self.live_session.store(0, Ordering::SeqCst);
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn sessions_issued(&self) -> u64 {
        self.sessions_issued.load(Ordering::SeqCst)
    }

    pub fn logouts(&self) -> u64 {
        self.logouts.load(Ordering::SeqCst)
    }

    pub fn page_requests(&self) -> usize {
        self.page_requests.load(Ordering::SeqCst)
    }

    pub fn card_state_calls(&self) -> usize {
        self.card_state_calls.load(Ordering::SeqCst)
    }

    pub fn card(&self, card_ref: &str) -> Option<CardSnapshot> {
        self.cards.get(card_ref).map(|c| c.clone())
    }

    /// Cards bound to `group_ref`, sorted
    pub fn group_members(&self, group_ref: &str) -> Vec<String> {
        self.groups
            .get(group_ref)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn group_limit(&self, group_ref: &str, category: &str) -> Option<Decimal> {
        self.limits
            .get(&(group_ref.to_string(), category.to_string()))
            .map(|amount| *amount)
    }

    fn token(&self, number: u64) -> String {
        format!("{}-session-{}", self.provider, number)
    }

    /// Session number `session` was issued with, if it is the live one
    fn live_number(&self, session: &SessionToken) -> Option<u64> {
        let live = self.live_session.load(Ordering::SeqCst);
        (live != 0 && session.0 == self.token(live)).then_some(live)
    }

    fn error(&self, operation: &str, kind: ProviderErrorKind, payload: impl Into<String>) -> ProviderError {
        ProviderError::new(self.provider, operation, kind, payload)
    }

    /// Latency, reachability and session checks shared by every call
    async fn enter(&self, operation: &str, session: &SessionToken) -> Result<(), ProviderError> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(self.error(operation, ProviderErrorKind::Transport, "connection refused"));
        }
        if self.live_number(session).is_none() {
            return Err(self.error(
                operation,
                ProviderErrorKind::SessionExpired,
                "{\"error\":\"session expired\"}",
            ));
        }
        Ok(())
    }

    /// Consume one injected read fault, if any
    fn read_fault(&self, operation: &str) -> Result<(), ProviderError> {
        if take_one(&self.transient_read_failures) {
            return Err(self.error(operation, ProviderErrorKind::Transport, "502 Bad Gateway"));
        }
        if take_one(&self.rate_limited_reads) {
            return Err(self.error(
                operation,
                ProviderErrorKind::RateLimited,
                "429 Too Many Requests",
            ));
        }
        Ok(())
    }

    fn write_fault(&self, operation: &str, card_ref: &str) -> Result<(), ProviderError> {
        if self.failing_cards.contains_key(card_ref) {
            return Err(self.error(
                operation,
                ProviderErrorKind::Api,
                format!("{{\"error\":\"card {} rejected\"}}", card_ref),
            ));
        }
        Ok(())
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl ProviderTransport for InMemoryTransport {
    fn provider(&self) -> ProviderKind {
        self.provider
    }

    async fn authenticate(&self) -> Result<SessionToken, ProviderError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(self.error("authenticate", ProviderErrorKind::Transport, "connection refused"));
        }
        let n = self.sessions_issued.fetch_add(1, Ordering::SeqCst) + 1;
        self.live_session.store(n, Ordering::SeqCst);
        Ok(SessionToken(self.token(n)))
    }

    async fn logout(&self, session: &SessionToken) -> Result<(), ProviderError> {
        if let Some(n) = self.live_number(session) {
            let _ = self
                .live_session
                .compare_exchange(n, 0, Ordering::SeqCst, Ordering::SeqCst);
        }
        self.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn balance(&self, session: &SessionToken) -> Result<BalanceSnapshot, ProviderError> {
        self.enter("fetch_balance", session).await?;
        self.read_fault("fetch_balance")?;
        Ok(BalanceSnapshot {
            provider: self.provider,
            balance: *self.balance.read().await,
        })
    }

    async fn cards(&self, session: &SessionToken) -> Result<Vec<CardSnapshot>, ProviderError> {
        self.enter("fetch_cards", session).await?;
        self.read_fault("fetch_cards")?;
        let mut cards: Vec<CardSnapshot> = self.cards.iter().map(|c| c.value().clone()).collect();
        cards.sort_by(|a, b| a.external_ref.cmp(&b.external_ref));
        Ok(cards)
    }

    async fn transactions_page(
        &self,
        session: &SessionToken,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        offset: usize,
        limit: usize,
    ) -> Result<TxnPage, ProviderError> {
        self.enter("fetch_transactions", session).await?;
        self.page_requests.fetch_add(1, Ordering::SeqCst);
        self.read_fault("fetch_transactions")?;
        if to - from > chrono::Duration::days(31) {
            return Err(self.error(
                "fetch_transactions",
                ProviderErrorKind::Api,
                "{\"error\":\"date range exceeds one month\"}",
            ));
        }

        let transactions = self.transactions.read().await;
        let in_range: Vec<&TxnSnapshot> = transactions
            .iter()
            .filter(|t| t.timestamp >= from && t.timestamp <= to)
            .collect();
        let items = in_range
            .iter()
            .skip(offset)
            .take(limit)
            .map(|t| (*t).clone())
            .collect();
        Ok(TxnPage {
            items,
            has_more: offset + limit < in_range.len(),
        })
    }

    async fn set_card_state(
        &self,
        session: &SessionToken,
        card_ref: &str,
        active: bool,
    ) -> Result<(), ProviderError> {
        self.card_state_calls.fetch_add(1, Ordering::SeqCst);
        self.enter("set_card_state", session).await?;
        self.write_fault("set_card_state", card_ref)?;
        let mut card = self.cards.get_mut(card_ref).ok_or_else(|| {
            self.error(
                "set_card_state",
                ProviderErrorKind::Api,
                format!("{{\"error\":\"card {} not found\"}}", card_ref),
            )
        })?;
        if active && card.pin_locked {
            return Err(self.error(
                "set_card_state",
                ProviderErrorKind::Api,
                format!("{{\"error\":\"card {} is PIN-locked\"}}", card_ref),
            ));
        }
        card.active = active;
        Ok(())
    }

    async fn bind_card(
        &self,
        session: &SessionToken,
        group_ref: &str,
        card_ref: &str,
    ) -> Result<(), ProviderError> {
        self.enter("bind_card", session).await?;
        self.write_fault("bind_card", card_ref)?;
        // A card belongs to at most one group
        for mut group in self.groups.iter_mut() {
            group.value_mut().remove(card_ref);
        }
        self.groups
            .entry(group_ref.to_string())
            .or_default()
            .insert(card_ref.to_string());
        Ok(())
    }

    async fn group_cards(
        &self,
        session: &SessionToken,
        group_ref: &str,
    ) -> Result<Vec<String>, ProviderError> {
        self.enter("group_cards", session).await?;
        self.read_fault("group_cards")?;
        Ok(self.group_members(group_ref))
    }

    async fn unbind_card(&self, session: &SessionToken, card_ref: &str) -> Result<(), ProviderError> {
        self.enter("unbind_card", session).await?;
        self.write_fault("unbind_card", card_ref)?;
        for mut group in self.groups.iter_mut() {
            group.value_mut().remove(card_ref);
        }
        Ok(())
    }

    async fn set_group_limit(
        &self,
        session: &SessionToken,
        group_ref: &str,
        limit: &GroupLimit,
    ) -> Result<(), ProviderError> {
        self.enter("set_group_limit", session).await?;
        if self.rejecting_limits.load(Ordering::SeqCst) {
            return Err(self.error(
                "set_group_limit",
                ProviderErrorKind::Api,
                format!("{{\"error\":\"group {} is frozen\"}}", group_ref),
            ));
        }
        self.limits.insert(
            (group_ref.to_string(), limit.category.clone()),
            limit.amount,
        );
        Ok(())
    }
}
