use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub u32);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountEventKind {
    Deposited,
    Withdrawn,
}

/// A balance change that has already been validated against the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountEvent {
    amount: u64,
    kind: AccountEventKind,
}

impl AccountEvent {
    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn kind(&self) -> AccountEventKind {
        self.kind
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccountError {
    #[error("Insufficient balance: {balance} available, {requested} requested")]
    InsufficientBalance { balance: u64, requested: u64 },
    #[error("Balance would exceed the supported maximum")]
    BalanceOverflow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub client_name: String,
    balance: u64,
}

impl Account {
    pub fn new(id: AccountId, client_name: impl Into<String>, balance: u64) -> Self {
        Self {
            id,
            client_name: client_name.into(),
            balance,
        }
    }

    pub fn balance(&self) -> u64 {
        self.balance
    }

    /// Events are validated by the `handle_*` methods, so applying one never fails.
    pub fn apply(&mut self, event: &AccountEvent) {
        match event.kind {
            AccountEventKind::Deposited => self.balance += event.amount,
            AccountEventKind::Withdrawn => self.balance -= event.amount,
        }
    }

    pub fn handle_deposit(&self, amount: u64) -> Result<AccountEvent, AccountError> {
        self.balance
            .checked_add(amount)
            .ok_or(AccountError::BalanceOverflow)?;
        Ok(AccountEvent {
            amount,
            kind: AccountEventKind::Deposited,
        })
    }

    pub fn handle_withdrawal(&self, amount: u64) -> Result<AccountEvent, AccountError> {
        if self.balance >= amount {
            Ok(AccountEvent {
                amount,
                kind: AccountEventKind::Withdrawn,
            })
        } else {
            Err(AccountError::InsufficientBalance {
                balance: self.balance,
                requested: amount,
            })
        }
    }

    /// Signed balance change, positive deltas deposit and negative ones withdraw.
    pub fn handle_adjustment(&self, delta: i64) -> Result<AccountEvent, AccountError> {
        if delta >= 0 {
            self.handle_deposit(delta.unsigned_abs())
        } else {
            self.handle_withdrawal(delta.unsigned_abs())
        }
    }
}
