use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use thiserror::Error;

use crate::account::{Account, AccountId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Account store rejected the write for account {0}")]
    Rejected(AccountId),
    #[error("Account store is unavailable: {0}")]
    Unavailable(String),
}

/// Where accounts live between operations.
///
/// Implementations only need key based lookup and upsert; serializing
/// concurrent updates to the same account is done by [`crate::ledger::Ledger`].
pub trait AccountStore: Send + Sync {
    fn find(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    fn save(&self, account: &Account) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    accounts: RwLock<HashMap<AccountId, Account>>,
}

impl InMemoryAccountStore {
    pub fn new(accounts: impl IntoIterator<Item = Account>) -> Self {
        Self {
            accounts: RwLock::new(accounts.into_iter().map(|acc| (acc.id, acc)).collect()),
        }
    }

    pub fn len(&self) -> usize {
        self.accounts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AccountStore for InMemoryAccountStore {
    fn find(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let accounts = self.accounts.read().unwrap_or_else(PoisonError::into_inner);
        Ok(accounts.get(&id).cloned())
    }

    fn save(&self, account: &Account) -> Result<(), StoreError> {
        let mut accounts = self.accounts.write().unwrap_or_else(PoisonError::into_inner);
        accounts.insert(account.id, account.clone());
        Ok(())
    }
}
