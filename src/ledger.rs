use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use thiserror::Error;
use tracing::debug;

use crate::{
    account::{Account, AccountError, AccountEvent, AccountId},
    store::{AccountStore, StoreError},
};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Account {0} was not found")]
    AccountNotFound(AccountId),
    #[error(transparent)]
    AccountErr(#[from] AccountError),
    #[error(transparent)]
    StoreErr(#[from] StoreError),
}

/// Balances of all accounts, with mutations serialized per account.
///
/// Every operation runs while holding the account's own lock, so two
/// concurrent withdrawals against one account never both see the balance
/// from before the other one.
#[derive(Debug, Default)]
pub struct Ledger<S> {
    store: S,
    locks: Mutex<HashMap<AccountId, Arc<Mutex<()>>>>,
}

impl<S> Ledger<S>
where
    S: AccountStore,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            locks: Mutex::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn balance(&self, id: AccountId) -> Result<u64, LedgerError> {
        self.with_account(id, |entry| Ok(entry.account().balance()))
    }

    /// Adds `delta` to the balance, rejecting the change if the balance would
    /// drop below zero.
    pub fn adjust(&self, id: AccountId, delta: i64) -> Result<u64, LedgerError> {
        self.with_account(id, |entry| {
            let evt = entry.account().handle_adjustment(delta)?;
            entry.commit(&evt)
        })
    }

    /// Runs `f` with exclusive access to the account.
    ///
    /// Changes are only persisted through [`AccountEntry::commit`] and
    /// [`AccountEntry::restore`]; the lock is held until `f` returns.
    pub fn with_account<T, E>(
        &self,
        id: AccountId,
        f: impl FnOnce(&mut AccountEntry<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<LedgerError>,
    {
        let lock = self.account_lock(id);
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            match self.store.find(id) {
                Ok(Some(account)) => f(&mut AccountEntry {
                    store: &self.store,
                    account,
                }),
                Ok(None) => Err(LedgerError::AccountNotFound(id).into()),
                Err(err) => Err(LedgerError::from(err).into()),
            }
        };
        drop(lock);
        self.release_lock(id);
        result
    }

    fn account_lock(&self, id: AccountId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(id).or_default().clone()
    }

    /// Drops the account's lock once no other caller holds or waits on it.
    fn release_lock(&self, id: AccountId) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(&id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&id);
        }
    }
}

/// Working copy of an account, only reachable while its lock is held.
pub struct AccountEntry<'a> {
    store: &'a dyn AccountStore,
    account: Account,
}

impl AccountEntry<'_> {
    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Applies the event and saves the account, returning the new balance.
    /// Nothing changes when the store rejects the write.
    pub fn commit(&mut self, event: &AccountEvent) -> Result<u64, LedgerError> {
        let mut next = self.account.clone();
        next.apply(event);
        self.store.save(&next)?;
        debug!(account = %next.id, balance = next.balance(), ?event, "balance updated");
        self.account = next;
        Ok(self.account.balance())
    }

    /// Writes back an earlier snapshot, undoing commits made in this entry.
    pub fn restore(&mut self, previous: Account) -> Result<(), LedgerError> {
        self.store.save(&previous)?;
        self.account = previous;
        Ok(())
    }
}
