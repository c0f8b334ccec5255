use std::{
    fmt,
    io::{self, Write},
    sync::{Mutex, PoisonError},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{account::AccountId, inventory::MachineId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    /// Manual balance correction adding funds.
    Credit,
    /// Manual balance correction removing funds.
    Debit,
}

/// Journal entry documenting one committed balance change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub account_id: AccountId,
    pub machine_id: MachineId,
    pub amount: u64,
    pub kind: TransactionKind,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("Failed to write transaction: {0}")]
    Csv(#[from] csv::Error),
    #[error("Failed to flush transaction log: {0}")]
    Io(#[from] io::Error),
}

/// Append-only sink for [`Transaction`]s.
///
/// Once `append` returns `Ok` the entry is the sink's responsibility.
pub trait TransactionLog: Send + Sync {
    fn append(&self, transaction: &Transaction) -> Result<(), LogError>;
}

#[derive(Debug, Default)]
pub struct InMemoryTransactionLog {
    entries: Mutex<Vec<Transaction>>,
}

impl InMemoryTransactionLog {
    /// All recorded transactions, oldest first.
    pub fn entries(&self) -> Vec<Transaction> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TransactionLog for InMemoryTransactionLog {
    fn append(&self, transaction: &Transaction) -> Result<(), LogError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(transaction.clone());
        Ok(())
    }
}

/// Writes transactions as CSV rows, flushing after every entry.
pub struct CsvTransactionLog<W: Write> {
    writer: Mutex<csv::Writer<W>>,
}

impl<W> CsvTransactionLog<W>
where
    W: Write,
{
    pub fn new(output: W) -> Self {
        Self {
            writer: Mutex::new(csv::Writer::from_writer(output)),
        }
    }

    pub fn into_inner(self) -> Result<W, LogError> {
        let writer = self
            .writer
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        writer
            .into_inner()
            .map_err(|err| LogError::Io(err.into_error()))
    }
}

impl<W> TransactionLog for CsvTransactionLog<W>
where
    W: Write + Send,
{
    fn append(&self, transaction: &Transaction) -> Result<(), LogError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writer.serialize(transaction)?;
        writer.flush()?;
        Ok(())
    }
}

impl<T> TransactionLog for &T
where
    T: TransactionLog + ?Sized,
{
    fn append(&self, transaction: &Transaction) -> Result<(), LogError> {
        (**self).append(transaction)
    }
}

impl<T> TransactionLog for Box<T>
where
    T: TransactionLog + ?Sized,
{
    fn append(&self, transaction: &Transaction) -> Result<(), LogError> {
        (**self).append(transaction)
    }
}
