//! CSV format handling for fixtures and account output
//!
//! Row structs mirror the fixture files column for column. Conversion into
//! domain types happens in pure functions so the formats can be tested
//! without touching the filesystem.
//!
//! | file                           | columns                                                                          |
//! |--------------------------------|----------------------------------------------------------------------------------|
//! | `accounts.csv`                 | id, balance, fixed_overdraft, temporary_overdraft, temporary_until, scheme, group_a, group_b |
//! | `transactions.csv`             | id, account, timestamp, delta, balance, card, provider, external_ref             |
//! | `cards.csv`                    | id, number, account, state, manual_lock, ref_a, ref_b                            |
//! | `provider_*/cards.csv`         | external_ref, active, pin_locked                                                 |
//! | `provider_*/transactions.csv`  | external_ref, card_ref, timestamp, amount                                        |
//! | `provider_*/balance.csv`       | balance                                                                          |

use crate::types::{
    Account, AccountId, BlockReason, Card, CardId, CardSnapshot, CardState, ContractScheme,
    LedgerTransaction, ProviderKind, TemporaryOverdraft, TransactionId, TransactionSource,
    TxnSnapshot,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Write;
use std::str::FromStr;

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AccountRow {
    pub id: AccountId,
    pub balance: Option<String>,
    pub fixed_overdraft: Option<String>,
    pub temporary_overdraft: Option<String>,
    pub temporary_until: Option<String>,
    pub scheme: Option<String>,
    pub group_a: Option<String>,
    pub group_b: Option<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LedgerRow {
    pub id: TransactionId,
    pub account: AccountId,
    pub timestamp: String,
    pub delta: String,
    pub balance: Option<String>,
    pub card: Option<CardId>,
    pub provider: Option<String>,
    pub external_ref: Option<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CardRow {
    pub id: CardId,
    pub number: String,
    pub account: Option<AccountId>,
    pub state: Option<String>,
    pub manual_lock: Option<bool>,
    pub ref_a: Option<String>,
    pub ref_b: Option<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ProviderCardRow {
    pub external_ref: String,
    pub active: bool,
    pub pin_locked: Option<bool>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ProviderTxnRow {
    pub external_ref: String,
    pub card_ref: String,
    pub timestamp: String,
    pub amount: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BalanceRow {
    pub balance: String,
}

/// Present and non-blank
fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

pub fn parse_decimal(value: &str, field: &str) -> Result<Decimal, String> {
    Decimal::from_str(value.trim()).map_err(|_| format!("Invalid {} '{}'", field, value))
}

fn parse_optional_decimal(value: &Option<String>, field: &str) -> Result<Decimal, String> {
    non_empty(value)
        .map(|v| parse_decimal(v, field))
        .transpose()
        .map(|d| d.unwrap_or(Decimal::ZERO))
}

/// RFC 3339 timestamp, normalized to UTC
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| format!("Invalid timestamp '{}': {}", value, e))
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|_| format!("Invalid date '{}'", value))
}

fn parse_scheme(value: &Option<String>) -> Result<ContractScheme, String> {
    match non_empty(value).map(str::to_lowercase).as_deref() {
        None | Some("prepaid") => Ok(ContractScheme::Prepaid),
        Some("overbought") => Ok(ContractScheme::Overbought),
        Some(other) => Err(format!("Invalid scheme '{}'", other)),
    }
}

fn parse_card_state(value: &Option<String>) -> Result<CardState, String> {
    match non_empty(value).map(str::to_lowercase).as_deref() {
        None | Some("active") => Ok(CardState::Active),
        Some(blocked) => {
            let reason = blocked.strip_prefix("blocked").unwrap_or(blocked);
            let reason = reason.trim_start_matches(':');
            if reason.is_empty() {
                return Ok(CardState::Blocked(BlockReason::Overdraft));
            }
            BlockReason::from_str(reason)
                .map(CardState::Blocked)
                .map_err(|_| format!("Invalid card state '{}'", blocked))
        }
    }
}

/// Format a card state the way `cards.csv` spells it
pub fn format_card_state(state: CardState) -> String {
    match state {
        CardState::Active => "active".to_string(),
        CardState::Blocked(reason) => format!("blocked:{}", reason.as_str()),
    }
}

pub fn convert_account_row(row: AccountRow) -> Result<Account, String> {
    let mut account = Account::new(row.id);
    account.balance = parse_optional_decimal(&row.balance, "balance")?;
    account.fixed_overdraft = parse_optional_decimal(&row.fixed_overdraft, "fixed_overdraft")?;
    account.scheme = parse_scheme(&row.scheme)?;

    account.temporary_overdraft = match (
        non_empty(&row.temporary_overdraft),
        non_empty(&row.temporary_until),
    ) {
        (None, None) => None,
        (Some(amount), Some(until)) => Some(TemporaryOverdraft {
            amount: parse_decimal(amount, "temporary_overdraft")?,
            until: parse_date(until)?,
        }),
        _ => {
            return Err(format!(
                "Account {} needs both temporary_overdraft and temporary_until",
                row.id
            ))
        }
    };

    for (provider, group) in [
        (ProviderKind::ProviderA, &row.group_a),
        (ProviderKind::ProviderB, &row.group_b),
    ] {
        if let Some(group) = non_empty(group) {
            account.groups.insert(provider, group.to_string());
        }
    }
    Ok(account)
}

pub fn convert_ledger_row(row: LedgerRow) -> Result<LedgerTransaction, String> {
    let source = match (non_empty(&row.provider), non_empty(&row.external_ref)) {
        (None, None) => TransactionSource::Manual,
        (Some(provider), Some(external_ref)) => TransactionSource::Provider {
            provider: ProviderKind::from_str(provider)
                .map_err(|e| format!("Transaction {}: {}", row.id, e))?,
            external_ref: external_ref.to_string(),
        },
        _ => {
            return Err(format!(
                "Transaction {} needs both provider and external_ref",
                row.id
            ))
        }
    };

    Ok(LedgerTransaction {
        id: row.id,
        account: row.account,
        timestamp: parse_timestamp(&row.timestamp)?,
        delta: parse_decimal(&row.delta, "delta")?,
        balance: parse_optional_decimal(&row.balance, "balance")?,
        seq: 0,
        source,
        card: row.card,
    })
}

pub fn convert_card_row(row: CardRow) -> Result<Card, String> {
    let mut card = Card::new(row.id, row.number.trim());
    card.account = row.account;
    card.state = parse_card_state(&row.state)?;
    card.manual_lock = row.manual_lock.unwrap_or(false);
    for (provider, external_ref) in [
        (ProviderKind::ProviderA, &row.ref_a),
        (ProviderKind::ProviderB, &row.ref_b),
    ] {
        if let Some(external_ref) = non_empty(external_ref) {
            card.providers.insert(provider, external_ref.to_string());
        }
    }
    Ok(card)
}

pub fn convert_provider_card_row(row: ProviderCardRow) -> CardSnapshot {
    CardSnapshot {
        external_ref: row.external_ref.trim().to_string(),
        active: row.active,
        pin_locked: row.pin_locked.unwrap_or(false),
    }
}

pub fn convert_provider_txn_row(row: ProviderTxnRow) -> Result<TxnSnapshot, String> {
    Ok(TxnSnapshot {
        external_ref: row.external_ref.trim().to_string(),
        card_ref: row.card_ref.trim().to_string(),
        timestamp: parse_timestamp(&row.timestamp)?,
        amount: parse_decimal(&row.amount, "amount")?,
    })
}

/// Write account balances as CSV
///
/// Columns: account, balance, fixed_overdraft, temporary_overdraft, scheme.
/// Accounts are sorted by id for deterministic output.
pub fn write_accounts_csv(accounts: &[Account], output: &mut dyn Write) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(output);
    writer.write_record([
        "account",
        "balance",
        "fixed_overdraft",
        "temporary_overdraft",
        "scheme",
    ])?;

    let mut sorted: Vec<&Account> = accounts.iter().collect();
    sorted.sort_by_key(|account| account.id);

    for account in sorted {
        let temporary = account
            .temporary_overdraft
            .map(|t| format!("{:.2}@{}", t.amount, t.until))
            .unwrap_or_default();
        writer.write_record(&[
            account.id.to_string(),
            format!("{:.2}", account.balance),
            format!("{:.2}", account.fixed_overdraft),
            temporary,
            account.scheme.as_str().to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}
