//! Session-managing provider client
//!
//! `SessionClient` turns a raw [`ProviderTransport`] into a
//! [`ProviderClient`]:
//!
//! - authenticates lazily on first use and caches the token
//! - re-authenticates once when the provider reports the session expired
//! - bounds every call by a per-call timeout
//! - retries retryable failures with exponential backoff
//! - walks transaction pages until the provider reports no more results
//! - clamps the requested window to the provider's one-month maximum
//!
//! A client is built once per pipeline run and released at the end of it.

use super::{BatchOutcome, ProviderClient, ProviderTransport, RetryPolicy, SessionToken};
use crate::types::{
    BalanceSnapshot, CardSnapshot, GroupLimit, ProviderError, ProviderErrorKind, ProviderKind,
    TxnSnapshot,
};
use async_trait::async_trait;
use backon::Retryable;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Longest transaction window a provider accepts per request
pub const MAX_WINDOW_DAYS: u32 = 31;

/// Per-client settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Transactions requested per page
    pub page_size: usize,

    /// Upper bound for a single provider call
    pub call_timeout: Duration,

    pub retry: RetryPolicy,

    /// Fixed evaluation time; `None` means the wall clock
    pub as_of: Option<DateTime<Utc>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            page_size: 500,
            call_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            as_of: None,
        }
    }
}

impl ClientConfig {
    pub fn now(&self) -> DateTime<Utc> {
        self.as_of.unwrap_or_else(Utc::now)
    }
}

/// Clamp a requested look-back window to what one request may cover
pub fn clamp_window(provider: ProviderKind, window_days: u32) -> u32 {
    if window_days > MAX_WINDOW_DAYS {
        warn!(
            provider = %provider,
            requested = window_days,
            max = MAX_WINDOW_DAYS,
            "Transaction window exceeds provider maximum, clamping"
        );
    }
    window_days.clamp(1, MAX_WINDOW_DAYS)
}

/// [`ProviderClient`] over any [`ProviderTransport`]
#[derive(Debug)]
pub struct SessionClient<T: ProviderTransport> {
    transport: Arc<T>,
    config: ClientConfig,
    session: Mutex<Option<SessionToken>>,
}

impl<T: ProviderTransport> SessionClient<T> {
    pub fn new(transport: Arc<T>, config: ClientConfig) -> Self {
        Self {
            transport,
            config,
            session: Mutex::new(None),
        }
    }

    /// The cached session, authenticating first if there is none
    async fn session(&self) -> Result<SessionToken, ProviderError> {
        let mut current = self.session.lock().await;
        if let Some(token) = current.as_ref() {
            return Ok(token.clone());
        }

        let token = self
            .timed("authenticate", self.transport.authenticate())
            .await?;
        debug!(provider = %self.provider(), "Authenticated");
        *current = Some(token.clone());
        Ok(token)
    }

    /// Forget `stale` unless another call already replaced it
    async fn invalidate(&self, stale: &SessionToken) {
        let mut current = self.session.lock().await;
        if current.as_ref() == Some(stale) {
            *current = None;
        }
    }

    async fn timed<R>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<R, ProviderError>>,
    ) -> Result<R, ProviderError> {
        match tokio::time::timeout(self.config.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::new(
                self.provider(),
                operation,
                ProviderErrorKind::Timeout,
                format!("no response within {:?}", self.config.call_timeout),
            )),
        }
    }

    /// One attempt, with a single transparent re-authentication
    async fn attempt<R, F, Fut>(&self, operation: &str, call: &F) -> Result<R, ProviderError>
    where
        F: Fn(SessionToken) -> Fut,
        Fut: Future<Output = Result<R, ProviderError>>,
    {
        let token = self.session().await?;
        match self.timed(operation, call(token.clone())).await {
            Err(e) if e.kind == ProviderErrorKind::SessionExpired => {
                debug!(provider = %self.provider(), operation, "Session expired, re-authenticating");
                self.invalidate(&token).await;
                let fresh = self.session().await?;
                self.timed(operation, call(fresh)).await
            }
            other => other,
        }
    }

    /// Run a call with backoff on retryable failures
    async fn call<R, F, Fut>(&self, operation: &'static str, call: F) -> Result<R, ProviderError>
    where
        F: Fn(SessionToken) -> Fut + Send + Sync,
        Fut: Future<Output = Result<R, ProviderError>> + Send,
        R: Send,
    {
        let provider = self.provider();
        (|| self.attempt(operation, &call))
            .retry(self.config.retry.backoff())
            .when(|e: &ProviderError| e.is_retryable())
            .notify(|e: &ProviderError, delay: Duration| {
                warn!(provider = %provider, operation, error = %e, delay = ?delay, "Provider call failed, retrying");
            })
            .await
    }
}

#[async_trait]
impl<T: ProviderTransport> ProviderClient for SessionClient<T> {
    fn provider(&self) -> ProviderKind {
        self.transport.provider()
    }

    async fn fetch_balance(&self) -> Result<BalanceSnapshot, ProviderError> {
        self.call("fetch_balance", move |token| async move {
            self.transport.balance(&token).await
        })
        .await
    }

    async fn fetch_cards(&self) -> Result<Vec<CardSnapshot>, ProviderError> {
        self.call("fetch_cards", move |token| async move {
            self.transport.cards(&token).await
        })
        .await
    }

    async fn fetch_transactions(&self, window_days: u32) -> Result<Vec<TxnSnapshot>, ProviderError> {
        let days = clamp_window(self.provider(), window_days);
        let to = self.config.now();
        let from = to - chrono::Duration::days(i64::from(days));
        let page_size = self.config.page_size.max(1);

        let mut transactions = Vec::new();
        let mut offset = 0;
        loop {
            let page = self
                .call("fetch_transactions", move |token| async move {
                    self.transport
                        .transactions_page(&token, from, to, offset, page_size)
                        .await
                })
                .await?;

            let received = page.items.len();
            transactions.extend(page.items);
            if !page.has_more || received == 0 {
                break;
            }
            offset += page_size;
        }

        debug!(
            provider = %self.provider(),
            days,
            count = transactions.len(),
            "Fetched transactions"
        );
        Ok(transactions)
    }

    async fn set_card_state(&self, card_ref: &str, active: bool) -> Result<(), ProviderError> {
        self.call("set_card_state", move |token| async move {
            self.transport.set_card_state(&token, card_ref, active).await
        })
        .await
    }

    async fn bind_cards_to_group(&self, card_refs: &[String], group_ref: &str) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for card_ref in card_refs {
            let card = card_ref.as_str();
            let result = self
                .call("bind_card", move |token| async move {
                    self.transport.bind_card(&token, group_ref, card).await
                })
                .await;
            match result {
                Ok(()) => outcome.succeeded.push(card_ref.clone()),
                Err(e) => outcome.failed.push((card_ref.clone(), e)),
            }
        }
        outcome
    }

    async fn fetch_group_cards(&self, group_ref: &str) -> Result<Vec<String>, ProviderError> {
        self.call("group_cards", move |token| async move {
            self.transport.group_cards(&token, group_ref).await
        })
        .await
    }

    async fn unbind_cards_from_group(&self, card_refs: &[String]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for card_ref in card_refs {
            let card = card_ref.as_str();
            let result = self
                .call("unbind_card", move |token| async move {
                    self.transport.unbind_card(&token, card).await
                })
                .await;
            match result {
                Ok(()) => outcome.succeeded.push(card_ref.clone()),
                Err(e) => outcome.failed.push((card_ref.clone(), e)),
            }
        }
        outcome
    }

    async fn set_group_limits(
        &self,
        group_ref: &str,
        limits: &[GroupLimit],
    ) -> Result<(), ProviderError> {
        // Every category is attempted; the first failure is reported
        let mut first_error = None;
        for limit in limits {
            let result = self
                .call("set_group_limit", move |token| async move {
                    self.transport.set_group_limit(&token, group_ref, limit).await
                })
                .await;
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn release(&self) {
        let Some(token) = self.session.lock().await.take() else {
            return;
        };
        match self.timed("logout", self.transport.logout(&token)).await {
            Ok(()) => debug!(provider = %self.provider(), "Session released"),
            Err(e) => warn!(provider = %self.provider(), error = %e, "Logout failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::InMemoryTransport;
    use chrono::Duration as ChronoDuration;
    use rust_decimal::Decimal;

    fn config() -> ClientConfig {
        ClientConfig {
            page_size: 3,
            call_timeout: Duration::from_millis(200),
            retry: RetryPolicy::immediate(2),
            as_of: None,
        }
    }

    fn client(transport: &Arc<InMemoryTransport>) -> SessionClient<InMemoryTransport> {
        SessionClient::new(Arc::clone(transport), config())
    }

    fn card(external_ref: &str) -> CardSnapshot {
        CardSnapshot {
            external_ref: external_ref.to_string(),
            active: true,
            pin_locked: false,
        }
    }

    async fn transport_with_transactions(count: i64) -> Arc<InMemoryTransport> {
        let transport = Arc::new(InMemoryTransport::new(ProviderKind::ProviderA));
        for i in 0..count {
            transport
                .push_transaction(TxnSnapshot {
                    external_ref: format!("t{}", i),
                    card_ref: "A-1".to_string(),
                    timestamp: Utc::now() - ChronoDuration::hours(i + 1),
                    amount: Decimal::new(-i, 0),
                })
                .await;
        }
        transport
    }

    #[tokio::test]
    async fn test_authenticates_lazily_and_reuses_session() {
        let transport = Arc::new(InMemoryTransport::new(ProviderKind::ProviderA));
        let client = client(&transport);
        assert_eq!(transport.sessions_issued(), 0);

        client.fetch_balance().await.unwrap();
        client.fetch_cards().await.unwrap();

        assert_eq!(transport.sessions_issued(), 1);
    }

    #[tokio::test]
    async fn test_reauthenticates_after_session_expiry() {
        let transport = Arc::new(InMemoryTransport::new(ProviderKind::ProviderA));
        let client = client(&transport);
        client.fetch_balance().await.unwrap();

        transport.expire_session();
        let result = client.fetch_balance().await;

        assert!(result.is_ok());
        assert_eq!(transport.sessions_issued(), 2);
    }

    #[tokio::test]
    async fn test_fetch_transactions_walks_all_pages() {
        let transport = transport_with_transactions(7).await;
        let client = client(&transport);

        let transactions = client.fetch_transactions(3).await.unwrap();

        assert_eq!(transactions.len(), 7);
        assert_eq!(transport.page_requests(), 3);
    }

    #[tokio::test]
    async fn test_fetch_transactions_clamps_window_to_one_month() {
        let transport = transport_with_transactions(2).await;
        transport
            .push_transaction(TxnSnapshot {
                external_ref: "old".to_string(),
                card_ref: "A-1".to_string(),
                timestamp: Utc::now() - ChronoDuration::days(60),
                amount: Decimal::ONE,
            })
            .await;
        let client = client(&transport);

        // The transport rejects ranges over a month; a clamped request succeeds
        let transactions = client.fetch_transactions(90).await.unwrap();

        assert_eq!(transactions.len(), 2);
    }

    #[tokio::test]
    async fn test_transient_read_failures_are_retried() {
        let transport = Arc::new(InMemoryTransport::new(ProviderKind::ProviderA));
        transport.fail_next_reads(2);
        let client = client(&transport);

        assert!(client.fetch_cards().await.is_ok());
    }

    #[tokio::test]
    async fn test_read_gives_up_after_retry_budget() {
        let transport = Arc::new(InMemoryTransport::new(ProviderKind::ProviderA));
        transport.fail_next_reads(10);
        let client = client(&transport);

        let error = client.fetch_cards().await.unwrap_err();

        assert_eq!(error.kind, ProviderErrorKind::Transport);
        assert_eq!(error.operation, "fetch_cards");
    }

    #[tokio::test]
    async fn test_api_rejections_are_not_retried() {
        let transport = Arc::new(InMemoryTransport::new(ProviderKind::ProviderA));
        let client = client(&transport);

        let error = client.set_card_state("missing", false).await.unwrap_err();

        assert_eq!(error.kind, ProviderErrorKind::Api);
        assert_eq!(transport.card_state_calls(), 1);
    }

    #[tokio::test]
    async fn test_slow_calls_time_out() {
        let transport = Arc::new(InMemoryTransport::new(ProviderKind::ProviderA));
        let client = client(&transport);
        client.fetch_balance().await.unwrap();

        transport.set_latency(Duration::from_millis(500));
        let error = client.fetch_balance().await.unwrap_err();

        assert_eq!(error.kind, ProviderErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_set_card_state_is_idempotent() {
        let transport = Arc::new(InMemoryTransport::new(ProviderKind::ProviderA));
        transport.upsert_card(card("A-1"));
        let client = client(&transport);

        client.set_card_state("A-1", false).await.unwrap();
        client.set_card_state("A-1", false).await.unwrap();

        assert!(!transport.card("A-1").unwrap().active);
    }

    #[tokio::test]
    async fn test_bind_batch_reports_failures_per_item() {
        let transport = Arc::new(InMemoryTransport::new(ProviderKind::ProviderA));
        for r in ["A-1", "A-2", "A-3"] {
            transport.upsert_card(card(r));
        }
        transport.fail_card("A-2");
        let client = client(&transport);

        let refs = vec!["A-1".to_string(), "A-2".to_string(), "A-3".to_string()];
        let outcome = client.bind_cards_to_group(&refs, "G-1").await;

        assert_eq!(outcome.succeeded, vec!["A-1".to_string(), "A-3".to_string()]);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(transport.group_members("G-1"), vec!["A-1".to_string(), "A-3".to_string()]);

        let unbound = client.unbind_cards_from_group(&["A-1".to_string()]).await;
        assert!(unbound.is_complete());
        assert_eq!(transport.group_members("G-1"), vec!["A-3".to_string()]);
    }

    #[tokio::test]
    async fn test_fetch_group_cards_retries_rate_limit() {
        let transport = Arc::new(InMemoryTransport::new(ProviderKind::ProviderA));
        let client = client(&transport);
        client
            .bind_cards_to_group(&["A-2".to_string(), "A-1".to_string()], "G-1")
            .await;
        transport.rate_limit_next_reads(1);

        let members = client.fetch_group_cards("G-1").await.unwrap();

        assert_eq!(members, vec!["A-1".to_string(), "A-2".to_string()]);
    }

    #[tokio::test]
    async fn test_set_group_limits_sets_every_category() {
        let transport = Arc::new(InMemoryTransport::new(ProviderKind::ProviderA));
        let client = client(&transport);
        let limits = vec![
            GroupLimit { category: "fuel".to_string(), amount: Decimal::new(1500, 0) },
            GroupLimit { category: "wash".to_string(), amount: Decimal::new(1500, 0) },
        ];

        client.set_group_limits("G-1", &limits).await.unwrap();

        assert_eq!(transport.group_limit("G-1", "fuel"), Some(Decimal::new(1500, 0)));
        assert_eq!(transport.group_limit("G-1", "wash"), Some(Decimal::new(1500, 0)));
    }

    #[tokio::test]
    async fn test_release_logs_out_once() {
        let transport = Arc::new(InMemoryTransport::new(ProviderKind::ProviderA));
        let client = client(&transport);
        client.fetch_balance().await.unwrap();

        client.release().await;
        client.release().await;

        assert_eq!(transport.logouts(), 1);
    }
}
