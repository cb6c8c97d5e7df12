//! Asynchronous fixture loading
//!
//! Reads a fixture directory into domain records:
//!
//! ```text
//! fixtures/
//!     accounts.csv            (required)
//!     transactions.csv        (local ledger, optional)
//!     cards.csv               (optional)
//!     provider_a/             (optional)
//!         balance.csv         (optional)
//!         cards.csv
//!         transactions.csv
//!     provider_b/
//!         ...
//! ```
//!
//! Files are streamed with csv-async over tokio files. Any malformed row
//! fails the load with the file and row it came from.

use crate::io::csv_format::{
    convert_account_row, convert_card_row, convert_ledger_row, convert_provider_card_row,
    convert_provider_txn_row, parse_decimal, BalanceRow, ProviderCardRow,
};
use crate::provider::InMemoryTransport;
use crate::store::InMemoryStore;
use crate::types::{
    Account, Card, CardSnapshot, LedgerTransaction, ProviderKind, SyncError, TxnSnapshot,
};
use csv_async::{AsyncReaderBuilder, Trim};
use futures::io::AsyncRead;
use futures::stream::StreamExt;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio_util::compat::TokioAsyncReadCompatExt;
use tracing::{debug, info};

/// One provider network's fixture data
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderFixture {
    pub provider: ProviderKind,
    pub balance: Decimal,
    pub cards: Vec<CardSnapshot>,
    pub transactions: Vec<TxnSnapshot>,
}

impl ProviderFixture {
    /// A transport serving this fixture
    pub async fn into_transport(self) -> Arc<InMemoryTransport> {
        let transport = Arc::new(InMemoryTransport::new(self.provider));
        transport.set_balance(self.balance).await;
        for card in self.cards {
            transport.upsert_card(card);
        }
        for transaction in self.transactions {
            transport.push_transaction(transaction).await;
        }
        transport
    }
}

/// Everything a fixture directory describes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fixtures {
    pub accounts: Vec<Account>,
    pub transactions: Vec<LedgerTransaction>,
    pub cards: Vec<Card>,
    pub providers: Vec<ProviderFixture>,
}

impl Fixtures {
    /// Seed a store with the local records
    ///
    /// Ledger rows keep their file order as insertion order.
    pub fn seed_store(&self) -> InMemoryStore {
        let store = InMemoryStore::new();
        for account in &self.accounts {
            store.insert_account(account.clone());
        }
        for card in &self.cards {
            store.insert_card(card.clone());
        }
        for transaction in &self.transactions {
            store.insert_transaction(transaction.clone());
        }
        store
    }
}

/// Deserialize and convert every row of a CSV stream
///
/// `file` names the source in errors. Rows are numbered from 1, after the
/// header.
pub async fn read_rows<R, T, U, F>(reader: R, file: &str, convert: F) -> Result<Vec<U>, SyncError>
where
    R: AsyncRead + Unpin + Send,
    T: DeserializeOwned + 'static,
    F: Fn(T) -> Result<U, String>,
{
    let mut deserializer = AsyncReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .create_deserializer(reader);
    let mut records = deserializer.deserialize::<T>();

    let mut rows = Vec::new();
    let mut line: u64 = 0;
    while let Some(record) = records.next().await {
        line += 1;
        let record = record.map_err(|e| SyncError::fixture(file, Some(line), e.to_string()))?;
        rows.push(convert(record).map_err(|e| SyncError::fixture(file, Some(line), e))?);
    }
    Ok(rows)
}

async fn read_file<T, U, F>(path: &Path, convert: F) -> Result<Vec<U>, SyncError>
where
    T: DeserializeOwned + 'static,
    F: Fn(T) -> Result<U, String>,
{
    let name = path.display().to_string();
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| SyncError::fixture(&name, None, e.to_string()))?;
    let rows = read_rows(file.compat(), &name, convert).await?;
    debug!(file = %name, rows = rows.len(), "Fixture file loaded");
    Ok(rows)
}

/// Like `read_file`, but a missing file yields no rows
async fn read_optional_file<T, U, F>(path: &Path, convert: F) -> Result<Vec<U>, SyncError>
where
    T: DeserializeOwned + 'static,
    F: Fn(T) -> Result<U, String>,
{
    if tokio::fs::try_exists(path).await? {
        read_file(path, convert).await
    } else {
        Ok(Vec::new())
    }
}

async fn load_provider(dir: &Path, provider: ProviderKind) -> Result<ProviderFixture, SyncError> {
    let balance = read_optional_file(&dir.join("balance.csv"), |row: BalanceRow| {
        parse_decimal(&row.balance, "balance")
    })
    .await?
    .into_iter()
    .next()
    .unwrap_or(Decimal::ZERO);

    let cards = read_optional_file(&dir.join("cards.csv"), |row: ProviderCardRow| {
        Ok(convert_provider_card_row(row))
    })
    .await?;
    let transactions =
        read_optional_file(&dir.join("transactions.csv"), convert_provider_txn_row).await?;

    Ok(ProviderFixture {
        provider,
        balance,
        cards,
        transactions,
    })
}

/// Load a fixture directory
///
/// # Errors
///
/// * `SyncError::Fixture` - `accounts.csv` is missing, or a row is malformed
/// * `SyncError::Io` - The directory cannot be inspected
pub async fn load_fixtures(dir: &Path) -> Result<Fixtures, SyncError> {
    let accounts = read_file(&dir.join("accounts.csv"), convert_account_row).await?;
    let transactions =
        read_optional_file(&dir.join("transactions.csv"), convert_ledger_row).await?;
    let cards = read_optional_file(&dir.join("cards.csv"), convert_card_row).await?;

    let mut providers = Vec::new();
    for provider in ProviderKind::ALL {
        let provider_dir = dir.join(provider.as_str());
        if tokio::fs::try_exists(&provider_dir).await? {
            providers.push(load_provider(&provider_dir, provider).await?);
        }
    }

    info!(
        dir = %dir.display(),
        accounts = accounts.len(),
        transactions = transactions.len(),
        cards = cards.len(),
        providers = providers.len(),
        "Fixtures loaded"
    );
    Ok(Fixtures {
        accounts,
        transactions,
        cards,
        providers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::csv_format::LedgerRow;
    use futures::io::Cursor;

    #[tokio::test]
    async fn test_read_rows_converts_every_record() {
        let csv = "external_ref,card_ref,timestamp,amount\n\
                   T-1, A-1 ,2023-05-17T10:00:00Z,-20.00\n\
                   T-2,A-1,2023-05-17T11:00:00Z,5\n";

        let rows = read_rows(Cursor::new(csv.as_bytes()), "tx.csv", convert_provider_txn_row)
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].card_ref, "A-1");
        assert_eq!(rows[1].amount, Decimal::new(5, 0));
    }

    #[tokio::test]
    async fn test_read_rows_reports_failing_row() {
        let csv = "external_ref,card_ref,timestamp,amount\n\
                   T-1,A-1,2023-05-17T10:00:00Z,-20.00\n\
                   T-2,A-1,yesterday,5\n";

        let result = read_rows(Cursor::new(csv.as_bytes()), "tx.csv", convert_provider_txn_row).await;

        match result {
            Err(SyncError::Fixture { file, line, message }) => {
                assert_eq!(file, "tx.csv");
                assert_eq!(line, Some(2));
                assert!(message.contains("Invalid timestamp"));
            }
            other => panic!("expected fixture error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_rows_empty_file() {
        let csv = "balance\n";

        let rows = read_rows(Cursor::new(csv.as_bytes()), "balance.csv", |row: BalanceRow| {
            parse_decimal(&row.balance, "balance")
        })
        .await
        .unwrap();

        assert!(rows.is_empty());
    }

    #[test]
    fn test_seed_store_keeps_ledger_order() {
        let fixtures = Fixtures {
            accounts: vec![Account::new(1)],
            transactions: vec![
                convert_ledger_row(LedgerRow {
                    id: 5,
                    account: 1,
                    timestamp: "2023-05-17T10:00:00Z".to_string(),
                    delta: "1".to_string(),
                    balance: None,
                    card: None,
                    provider: None,
                    external_ref: None,
                })
                .unwrap(),
                convert_ledger_row(LedgerRow {
                    id: 2,
                    account: 1,
                    timestamp: "2023-05-17T10:00:00Z".to_string(),
                    delta: "2".to_string(),
                    balance: None,
                    card: None,
                    provider: None,
                    external_ref: None,
                })
                .unwrap(),
            ],
            ..Fixtures::default()
        };

        let store = fixtures.seed_store();

        let ids: Vec<u64> = store.transactions(1).iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![5, 2]);
    }
}
