use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::{
    account::{AccountEvent, AccountId},
    inventory::{Inventory, MachineId, MachineState},
    journal::{LogError, Transaction, TransactionId, TransactionKind, TransactionLog},
    ledger::{AccountEntry, Ledger, LedgerError},
    store::AccountStore,
};

use super::{TransactionProcessError, TransactionProcessor, WithdrawalReceipt};

/// Serves any number of machines against one account store and one journal.
///
/// Lock order is account first, then machine, so concurrent withdrawals
/// cannot deadlock.
pub struct AtmProcessor<S, L> {
    ledger: Ledger<S>,
    machines: HashMap<MachineId, Inventory>,
    journal: L,
    /// Id of the last entry the journal accepted.
    last_tx_id: Mutex<u64>,
}

impl<S, L> AtmProcessor<S, L>
where
    S: AccountStore,
    L: TransactionLog,
{
    pub fn new(store: S, journal: L) -> Self {
        Self {
            ledger: Ledger::new(store),
            machines: HashMap::new(),
            journal,
            last_tx_id: Mutex::new(0),
        }
    }

    /// Registers a machine, replacing any previous one with the same id.
    pub fn with_machine(mut self, inventory: Inventory) -> Self {
        info!(machine = %inventory.machine_id(), bills = ?inventory.snapshot().bills, "machine registered");
        self.machines.insert(inventory.machine_id(), inventory);
        self
    }

    pub fn ledger(&self) -> &Ledger<S> {
        &self.ledger
    }

    pub fn journal(&self) -> &L {
        &self.journal
    }

    fn inventory(&self, machine: MachineId) -> Result<&Inventory, TransactionProcessError> {
        self.machines
            .get(&machine)
            .ok_or(TransactionProcessError::MachineNotFound(machine))
    }

    /// Appends a journal entry. Ids are only consumed by accepted entries,
    /// so the journal never has gaps.
    fn record(
        &self,
        account_id: AccountId,
        machine_id: MachineId,
        amount: u64,
        kind: TransactionKind,
    ) -> Result<(), LogError> {
        let mut last_tx_id = self.last_tx_id.lock().unwrap_or_else(PoisonError::into_inner);
        let transaction = Transaction {
            id: TransactionId(*last_tx_id + 1),
            account_id,
            machine_id,
            amount,
            kind,
            recorded_at: Utc::now(),
        };
        self.journal.append(&transaction)?;
        *last_tx_id = transaction.id.0;
        debug!(?transaction, "transaction recorded");
        Ok(())
    }

    /// Commits a balance change and its journal entry, undoing the balance
    /// change when the journal rejects the entry.
    ///
    /// Fails with [`TransactionProcessError::Unjournaled`] when the undo is
    /// rejected too; the balance change then stays in the store.
    fn commit_recorded(
        &self,
        entry: &mut AccountEntry<'_>,
        event: &AccountEvent,
        machine: MachineId,
        kind: TransactionKind,
    ) -> Result<u64, TransactionProcessError> {
        let previous = entry.account().clone();
        let account = previous.id;
        let balance = entry.commit(event)?;
        let Err(journal) = self.record(account, machine, event.amount(), kind) else {
            return Ok(balance);
        };
        warn!(%account, %journal, "journal rejected entry, rolling back balance");
        match entry.restore(previous) {
            Ok(()) => Err(journal.into()),
            Err(LedgerError::StoreErr(restore)) => {
                error!(
                    %account,
                    %machine,
                    ?kind,
                    amount = event.amount(),
                    %journal,
                    %restore,
                    "balance change kept without a journal entry"
                );
                Err(TransactionProcessError::Unjournaled {
                    account,
                    journal,
                    restore,
                })
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl<S, L> TransactionProcessor for AtmProcessor<S, L>
where
    S: AccountStore,
    L: TransactionLog,
{
    fn balance(&self, account: AccountId) -> Result<u64, TransactionProcessError> {
        Ok(self.ledger.balance(account)?)
    }

    fn deposit(
        &self,
        machine: MachineId,
        account: AccountId,
        amount: u64,
    ) -> Result<u64, TransactionProcessError> {
        self.inventory(machine)?;
        self.ledger.with_account(account, |entry| {
            let event = entry.account().handle_deposit(amount)?;
            self.commit_recorded(entry, &event, machine, TransactionKind::Deposit)
        })
    }

    fn withdraw(
        &self,
        machine: MachineId,
        account: AccountId,
        amount: u64,
    ) -> Result<WithdrawalReceipt, TransactionProcessError> {
        let inventory = self.inventory(machine)?;
        self.ledger.with_account(account, |entry| {
            let event = entry.account().handle_withdrawal(amount)?;

            let mut bills = inventory.lock();
            let Some(allocation) = bills.allocate(amount) else {
                debug!(%machine, amount, bills = ?bills.bills(), "no exact bill combination");
                return Err(TransactionProcessError::InsufficientBills { machine, amount });
            };
            bills.reserve(&allocation)?;

            match self.commit_recorded(entry, &event, machine, TransactionKind::Withdrawal) {
                Ok(balance) => Ok(WithdrawalReceipt {
                    balance,
                    allocation,
                }),
                // the debit is persisted, so the bills count as dispensed
                Err(err @ TransactionProcessError::Unjournaled { .. }) => Err(err),
                Err(err) => {
                    warn!(%machine, %account, %err, "withdrawal failed, returning bills");
                    bills.release(&allocation);
                    Err(err)
                }
            }
        })
    }

    fn adjust_balance(
        &self,
        machine: MachineId,
        account: AccountId,
        delta: i64,
    ) -> Result<u64, TransactionProcessError> {
        self.inventory(machine)?;
        self.ledger.with_account(account, |entry| {
            let event = entry.account().handle_adjustment(delta)?;
            let kind = if delta < 0 {
                TransactionKind::Debit
            } else {
                TransactionKind::Credit
            };
            self.commit_recorded(entry, &event, machine, kind)
        })
    }

    fn machine_state(&self, machine: MachineId) -> Result<MachineState, TransactionProcessError> {
        Ok(self.inventory(machine)?.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::atomic::{AtomicBool, AtomicUsize, Ordering},
        thread,
    };

    use crate::{
        account::Account,
        journal::InMemoryTransactionLog,
        store::{InMemoryAccountStore, StoreError},
    };

    use super::*;

    const MACHINE: MachineId = MachineId(1);

    fn processor(
        accounts: impl IntoIterator<Item = Account>,
        bills: [(u64, u32); 4],
    ) -> AtmProcessor<InMemoryAccountStore, InMemoryTransactionLog> {
        AtmProcessor::new(
            InMemoryAccountStore::new(accounts),
            InMemoryTransactionLog::default(),
        )
        .with_machine(Inventory::new(MACHINE, bills))
    }

    fn full_machine(balance: u64) -> AtmProcessor<InMemoryAccountStore, InMemoryTransactionLog> {
        processor(
            [Account::new(AccountId(1), "Dana", balance)],
            [(200, 5), (100, 5), (50, 5), (20, 5)],
        )
    }

    /// Journal that can be switched to reject appends.
    #[derive(Default)]
    struct FlakyLog {
        inner: InMemoryTransactionLog,
        failing: AtomicBool,
    }

    impl TransactionLog for FlakyLog {
        fn append(&self, transaction: &Transaction) -> Result<(), LogError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(io::Error::other("disk full").into());
            }
            self.inner.append(transaction)
        }
    }

    /// Store that rejects every write once `failing` is set, or after
    /// `save_limit` writes went through.
    #[derive(Default)]
    struct FlakyStore {
        inner: InMemoryAccountStore,
        failing: AtomicBool,
        saves: AtomicUsize,
        save_limit: Option<usize>,
    }

    impl AccountStore for FlakyStore {
        fn find(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
            self.inner.find(id)
        }

        fn save(&self, account: &Account) -> Result<(), StoreError> {
            let saves = self.saves.load(Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) || self.save_limit.is_some_and(|n| saves >= n) {
                return Err(StoreError::Rejected(account.id));
            }
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.inner.save(account)
        }
    }

    #[test]
    fn withdraw_fewest_bills() {
        let processor = full_machine(1_000);
        let receipt = processor.withdraw(MACHINE, AccountId(1), 270).unwrap();
        assert_eq!(receipt.balance, 730);
        assert_eq!(
            receipt.allocation.dispensed().collect::<Vec<_>>(),
            vec![(200, 1), (50, 1), (20, 1)]
        );
        assert_eq!(receipt.allocation.total_bills(), 3);
        assert_eq!(
            processor.machine_state(MACHINE).unwrap().bills,
            vec![(200, 4), (100, 5), (50, 4), (20, 4)]
        );
        assert_eq!(processor.balance(AccountId(1)).unwrap(), 730);

        let entries = processor.journal().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, TransactionId(1));
        assert_eq!(entries[0].kind, TransactionKind::Withdrawal);
        assert_eq!(entries[0].amount, 270);
        assert_eq!(entries[0].account_id, AccountId(1));
        assert_eq!(entries[0].machine_id, MACHINE);
    }

    #[test]
    fn withdraw_from_empty_machine() {
        let processor = processor(
            [Account::new(AccountId(1), "Dana", 1_000)],
            [(200, 0), (100, 0), (50, 0), (20, 0)],
        );
        let err = processor.withdraw(MACHINE, AccountId(1), 20).unwrap_err();
        assert!(matches!(
            err,
            TransactionProcessError::InsufficientBills {
                machine: MACHINE,
                amount: 20
            }
        ));
        assert!(err.is_rejection());
        assert_eq!(processor.balance(AccountId(1)).unwrap(), 1_000);
        assert!(processor.journal().entries().is_empty());
    }

    #[test]
    fn withdraw_more_than_balance() {
        let processor = full_machine(50);
        let before = processor.machine_state(MACHINE).unwrap();
        let err = processor.withdraw(MACHINE, AccountId(1), 100).unwrap_err();
        assert!(matches!(
            err,
            TransactionProcessError::InsufficientBalance {
                balance: 50,
                requested: 100
            }
        ));
        assert_eq!(processor.machine_state(MACHINE).unwrap(), before);
        assert_eq!(processor.balance(AccountId(1)).unwrap(), 50);
        assert!(processor.journal().entries().is_empty());
    }

    #[test]
    fn withdraw_amount_without_bill_combination() {
        let processor = full_machine(1_000);
        let err = processor.withdraw(MACHINE, AccountId(1), 10).unwrap_err();
        assert!(matches!(err, TransactionProcessError::InsufficientBills { .. }));
        assert_eq!(processor.balance(AccountId(1)).unwrap(), 1_000);
    }

    #[test]
    fn deposit_then_balance() {
        let processor = full_machine(50);
        assert_eq!(processor.deposit(MACHINE, AccountId(1), 100).unwrap(), 150);
        assert_eq!(processor.balance(AccountId(1)).unwrap(), 150);

        let entries = processor.journal().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, TransactionKind::Deposit);
        assert_eq!(entries[0].amount, 100);
        // deposits never touch the bills
        assert_eq!(
            processor.machine_state(MACHINE).unwrap().bills,
            vec![(200, 5), (100, 5), (50, 5), (20, 5)]
        );
    }

    #[test]
    fn adjust_balance_records_direction() {
        let processor = full_machine(50);
        assert_eq!(processor.adjust_balance(MACHINE, AccountId(1), -30).unwrap(), 20);
        assert_eq!(processor.adjust_balance(MACHINE, AccountId(1), 5).unwrap(), 25);
        assert!(matches!(
            processor.adjust_balance(MACHINE, AccountId(1), -26),
            Err(TransactionProcessError::InsufficientBalance { .. })
        ));
        let kinds: Vec<_> = processor
            .journal()
            .entries()
            .iter()
            .map(|tx| (tx.kind, tx.amount))
            .collect();
        assert_eq!(
            kinds,
            vec![(TransactionKind::Debit, 30), (TransactionKind::Credit, 5)]
        );
    }

    #[test]
    fn unknown_account_or_machine() {
        let processor = full_machine(50);
        let err = processor.balance(AccountId(2)).unwrap_err();
        assert!(matches!(err, TransactionProcessError::AccountNotFound(AccountId(2))));
        assert!(err.is_not_found());
        assert!(matches!(
            processor.deposit(MACHINE, AccountId(2), 10),
            Err(TransactionProcessError::AccountNotFound(_))
        ));
        assert!(matches!(
            processor.withdraw(MACHINE, AccountId(2), 20),
            Err(TransactionProcessError::AccountNotFound(_))
        ));
        assert!(matches!(
            processor.withdraw(MachineId(9), AccountId(1), 20),
            Err(TransactionProcessError::MachineNotFound(MachineId(9)))
        ));
        assert!(matches!(
            processor.machine_state(MachineId(9)),
            Err(TransactionProcessError::MachineNotFound(_))
        ));
        assert!(processor.journal().entries().is_empty());
    }

    #[test]
    fn reads_do_not_mutate() {
        let processor = full_machine(500);
        let state = processor.machine_state(MACHINE).unwrap();
        for _ in 0..3 {
            assert_eq!(processor.balance(AccountId(1)).unwrap(), 500);
            assert_eq!(processor.machine_state(MACHINE).unwrap(), state);
        }
        assert!(processor.journal().entries().is_empty());
    }

    #[test]
    fn machines_are_independent() {
        let processor = full_machine(1_000)
            .with_machine(Inventory::new(MachineId(2), [(100, 1), (20, 0)]));
        processor.withdraw(MachineId(2), AccountId(1), 100).unwrap();
        assert_eq!(
            processor.machine_state(MachineId(2)).unwrap().bills,
            vec![(100, 0), (20, 0)]
        );
        assert_eq!(processor.machine_state(MACHINE).unwrap().count(100), Some(5));
        assert!(matches!(
            processor.withdraw(MachineId(2), AccountId(1), 100),
            Err(TransactionProcessError::InsufficientBills { .. })
        ));
        assert_eq!(processor.balance(AccountId(1)).unwrap(), 900);
    }

    #[test]
    fn journal_failure_rolls_back_withdrawal() {
        let processor = AtmProcessor::new(
            InMemoryAccountStore::new([Account::new(AccountId(1), "Dana", 1_000)]),
            FlakyLog::default(),
        )
        .with_machine(Inventory::new(MACHINE, [(200, 5), (100, 5), (50, 5), (20, 5)]));
        let before = processor.machine_state(MACHINE).unwrap();
        processor.journal().failing.store(true, Ordering::SeqCst);

        let err = processor.withdraw(MACHINE, AccountId(1), 270).unwrap_err();
        assert!(matches!(err, TransactionProcessError::LogErr(_)));
        assert_eq!(processor.machine_state(MACHINE).unwrap(), before);
        assert_eq!(processor.balance(AccountId(1)).unwrap(), 1_000);

        let err = processor.deposit(MACHINE, AccountId(1), 100).unwrap_err();
        assert!(matches!(err, TransactionProcessError::LogErr(_)));
        assert_eq!(processor.balance(AccountId(1)).unwrap(), 1_000);

        processor.journal().failing.store(false, Ordering::SeqCst);
        processor.withdraw(MACHINE, AccountId(1), 270).unwrap();
        processor.deposit(MACHINE, AccountId(1), 30).unwrap();
        // rejected entries do not use up ids
        let ids: Vec<_> = processor.journal().inner.entries().iter().map(|tx| tx.id).collect();
        assert_eq!(ids, vec![TransactionId(1), TransactionId(2)]);
    }

    #[test]
    fn failed_rollback_keeps_bills_with_debit() {
        let store = FlakyStore {
            inner: InMemoryAccountStore::new([Account::new(AccountId(1), "Dana", 1_000)]),
            save_limit: Some(1),
            ..Default::default()
        };
        let journal = FlakyLog::default();
        journal.failing.store(true, Ordering::SeqCst);
        let processor = AtmProcessor::new(store, journal)
            .with_machine(Inventory::new(MACHINE, [(200, 5), (100, 5), (50, 5), (20, 5)]));

        let err = processor.withdraw(MACHINE, AccountId(1), 270).unwrap_err();
        assert!(matches!(
            err,
            TransactionProcessError::Unjournaled {
                account: AccountId(1),
                journal: LogError::Io(_),
                restore: StoreError::Rejected(AccountId(1)),
            }
        ));
        assert!(!err.is_rejection());
        assert!(!err.is_not_found());

        // the debit could not be undone, so the bills stay out of the machine
        assert_eq!(processor.balance(AccountId(1)).unwrap(), 730);
        assert_eq!(
            processor.machine_state(MACHINE).unwrap().bills,
            vec![(200, 4), (100, 5), (50, 4), (20, 4)]
        );
        assert!(processor.journal().inner.entries().is_empty());
    }

    #[test]
    fn store_failure_rolls_back_withdrawal() {
        let store = FlakyStore {
            inner: InMemoryAccountStore::new([Account::new(AccountId(1), "Dana", 1_000)]),
            ..Default::default()
        };
        store.failing.store(true, Ordering::SeqCst);
        let processor = AtmProcessor::new(store, InMemoryTransactionLog::default())
            .with_machine(Inventory::new(MACHINE, [(200, 5), (100, 5), (50, 5), (20, 5)]));
        let before = processor.machine_state(MACHINE).unwrap();

        let err = processor.withdraw(MACHINE, AccountId(1), 270).unwrap_err();
        assert!(matches!(
            err,
            TransactionProcessError::StoreErr(StoreError::Rejected(AccountId(1)))
        ));
        assert_eq!(processor.machine_state(MACHINE).unwrap(), before);
        assert_eq!(processor.balance(AccountId(1)).unwrap(), 1_000);
        assert!(processor.journal().entries().is_empty());
        assert_eq!(processor.ledger().store().saves.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn concurrent_withdrawals_share_one_bill() {
        let processor = &processor(
            [
                Account::new(AccountId(1), "Dana", 1_000),
                Account::new(AccountId(2), "Omer", 1_000),
            ],
            [(200, 1), (100, 0), (50, 0), (20, 0)],
        );
        let results: Vec<_> = thread::scope(|s| {
            let handles: Vec<_> = [AccountId(1), AccountId(2)]
                .into_iter()
                .map(|account| s.spawn(move || processor.withdraw(MACHINE, account, 200)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(TransactionProcessError::InsufficientBills { amount: 200, .. })
        )));
        assert_eq!(processor.machine_state(MACHINE).unwrap().count(200), Some(0));
        let total: u64 = [AccountId(1), AccountId(2)]
            .into_iter()
            .map(|id| processor.balance(id).unwrap())
            .sum();
        assert_eq!(total, 1_800);
    }

    #[test]
    fn concurrent_withdrawals_keep_state_consistent() {
        let processor = &full_machine(1_500);
        let dispensed: u64 = thread::scope(|s| {
            let handles: Vec<_> = [270, 120, 200, 50, 90, 340, 20, 150, 400, 70]
                .into_iter()
                .cycle()
                .take(40)
                .map(|amount| {
                    s.spawn(move || {
                        processor
                            .withdraw(MACHINE, AccountId(1), amount)
                            .map_or(0, |receipt| receipt.allocation.value())
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        let balance = processor.balance(AccountId(1)).unwrap();
        let left_in_machine: u64 = processor
            .machine_state(MACHINE)
            .unwrap()
            .bills
            .iter()
            .map(|(d, c)| d * u64::from(*c))
            .sum();
        let journaled: u64 = processor.journal().entries().iter().map(|tx| tx.amount).sum();
        assert_eq!(balance + dispensed, 1_500);
        assert_eq!(left_in_machine + dispensed, 1_850);
        assert_eq!(journaled, dispensed);
    }
}
