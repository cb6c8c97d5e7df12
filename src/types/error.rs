//! Error types for the ledger sync pipeline
//!
//! This module defines the errors that can occur while syncing with providers,
//! recomputing ledgers and reconciling card state.
//!
//! # Error Categories
//!
//! - **Provider Errors**: transport or provider-reported failures on an external call
//! - **Ledger Inconsistency**: a ledger that violates the running-balance invariant
//! - **Persistence Errors**: store unavailable or write conflict
//! - **Policy Violations**: requested card transitions the rules forbid
//! - **Aggregation Errors**: the stale-account set could not be built (cycle-fatal)
//! - **Fixture Errors**: malformed input files for the binary

use super::account::AccountId;
use super::card::CardId;
use super::provider::ProviderKind;
use thiserror::Error;

/// What went wrong on a provider call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Network failure or non-2xx response
    Transport,

    /// The provider answered with an error payload
    Api,

    /// The provider asked us to slow down
    RateLimited,

    /// The session token is no longer accepted
    SessionExpired,

    /// The call did not finish within the configured per-call timeout
    Timeout,
}

impl ProviderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderErrorKind::Transport => "transport",
            ProviderErrorKind::Api => "api",
            ProviderErrorKind::RateLimited => "rate_limited",
            ProviderErrorKind::SessionExpired => "session_expired",
            ProviderErrorKind::Timeout => "timeout",
        }
    }
}

/// Failure of a single call against a provider network
///
/// Carries the provider, the operation and the raw error payload so the
/// cycle report can show exactly what the provider said.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{provider} {operation} failed ({}): {payload}", kind.as_str())]
pub struct ProviderError {
    pub provider: ProviderKind,
    pub operation: String,
    pub kind: ProviderErrorKind,
    pub payload: String,
}

impl ProviderError {
    pub fn new(
        provider: ProviderKind,
        operation: &str,
        kind: ProviderErrorKind,
        payload: impl Into<String>,
    ) -> Self {
        ProviderError {
            provider,
            operation: operation.to_string(),
            kind,
            payload: payload.into(),
        }
    }

    /// Whether repeating the same call may succeed
    ///
    /// API rejections are final. Session expiry is handled by re-authenticating,
    /// not by blind retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::Transport
                | ProviderErrorKind::RateLimited
                | ProviderErrorKind::Timeout
        )
    }
}

/// Main error type for the sync pipeline
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    /// A provider call failed
    ///
    /// Retryable for reads; logged and skipped per item for writes.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The ledger of an account violates the running-balance invariant
    ///
    /// Fatal for that account's recompute only.
    #[error("Ledger inconsistency on account {account}: {message}")]
    LedgerInconsistency {
        /// Account whose ledger is inconsistent
        account: AccountId,
        /// Description of the violation
        message: String,
    },

    /// The store failed or rejected a write
    ///
    /// Retryable at the operation level.
    #[error("Persistence error in {operation}: {message}")]
    Persistence {
        /// Store operation that failed
        operation: String,
        /// Description of the failure
        message: String,
    },

    /// A card transition the rules do not allow
    ///
    /// Rejected, never retried, logged as a no-op.
    #[error("Policy violation on card {card}: {message}")]
    PolicyViolation {
        /// Card the transition was requested for
        card: CardId,
        /// Description of the rule that forbids it
        message: String,
    },

    /// The stale-account set could not be built; the cycle cannot continue
    #[error("Aggregation failed: {message}")]
    Aggregation {
        /// Description of the failure
        message: String,
    },

    /// An input file for the binary could not be understood
    #[error("Fixture error in {file}{}: {message}", line.map(|l| format!(" at line {}", l)).unwrap_or_default())]
    Fixture {
        /// The file being read
        file: String,
        /// Line number where the error occurred (if available)
        line: Option<u64>,
        /// Description of the problem
        message: String,
    },

    /// I/O error while reading input or writing output
    #[error("I/O error: {message}")]
    Io {
        /// Description of the I/O error
        message: String,
    },
}

impl From<std::io::Error> for SyncError {
    fn from(error: std::io::Error) -> Self {
        SyncError::Io {
            message: error.to_string(),
        }
    }
}

// Helper functions for creating common errors

impl SyncError {
    /// Create a LedgerInconsistency error
    pub fn ledger_inconsistency(account: AccountId, message: impl Into<String>) -> Self {
        SyncError::LedgerInconsistency {
            account,
            message: message.into(),
        }
    }

    /// Create a Persistence error
    pub fn persistence(operation: &str, message: impl Into<String>) -> Self {
        SyncError::Persistence {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    /// Create a PolicyViolation error
    pub fn policy_violation(card: CardId, message: impl Into<String>) -> Self {
        SyncError::PolicyViolation {
            card,
            message: message.into(),
        }
    }

    /// Create an Aggregation error
    pub fn aggregation(message: impl Into<String>) -> Self {
        SyncError::Aggregation {
            message: message.into(),
        }
    }

    /// Create a Fixture error
    pub fn fixture(file: &str, line: Option<u64>, message: impl Into<String>) -> Self {
        SyncError::Fixture {
            file: file.to_string(),
            line,
            message: message.into(),
        }
    }
}
