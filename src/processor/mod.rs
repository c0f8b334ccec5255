use serde::Serialize;
use thiserror::Error;

use crate::{
    account::{AccountError, AccountId},
    allocator::Allocation,
    command::AtmCommand,
    inventory::{InventoryError, MachineId, MachineState},
    journal::LogError,
    ledger::LedgerError,
    store::StoreError,
};

pub mod atm_processor;

#[derive(Debug, Error)]
pub enum TransactionProcessError {
    #[error("Account {0} was not found")]
    AccountNotFound(AccountId),
    #[error("Machine {0} was not found")]
    MachineNotFound(MachineId),
    #[error("Insufficient balance: {balance} available, {requested} requested")]
    InsufficientBalance { balance: u64, requested: u64 },
    #[error("Not enough bills in machine {machine} to dispense {amount}")]
    InsufficientBills { machine: MachineId, amount: u64 },
    #[error("Balance would exceed the supported maximum")]
    BalanceOverflow,
    #[error(transparent)]
    StoreErr(#[from] StoreError),
    #[error(transparent)]
    LogErr(#[from] LogError),
    #[error(transparent)]
    InventoryErr(#[from] InventoryError),
    /// The journal rejected the entry and the balance could not be put back,
    /// so the change stays applied without a journal entry.
    #[error("Transaction for account {account} was applied but not journaled ({journal}); restoring the balance failed: {restore}")]
    Unjournaled {
        account: AccountId,
        journal: LogError,
        restore: StoreError,
    },
}

impl TransactionProcessError {
    /// The referenced account or machine does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::AccountNotFound(_) | Self::MachineNotFound(_))
    }

    /// Routine business rejections, as opposed to collaborator failures.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::InsufficientBalance { .. } | Self::InsufficientBills { .. } | Self::BalanceOverflow
        )
    }
}

impl From<AccountError> for TransactionProcessError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::InsufficientBalance { balance, requested } => {
                Self::InsufficientBalance { balance, requested }
            }
            AccountError::BalanceOverflow => Self::BalanceOverflow,
        }
    }
}

impl From<LedgerError> for TransactionProcessError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::AccountNotFound(id) => Self::AccountNotFound(id),
            LedgerError::AccountErr(err) => err.into(),
            LedgerError::StoreErr(err) => Self::StoreErr(err),
        }
    }
}

/// Outcome of a successful withdrawal: the new balance and the bills handed out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WithdrawalReceipt {
    pub balance: u64,
    pub allocation: Allocation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Balance(u64),
    Withdrawal(WithdrawalReceipt),
    MachineState(MachineState),
}

/// Operations a cash machine offers to its customers.
///
/// Every method either applies its whole effect (balance, bills and journal
/// entry) or none of it.
pub trait TransactionProcessor {
    fn balance(&self, account: AccountId) -> Result<u64, TransactionProcessError>;

    fn deposit(
        &self,
        machine: MachineId,
        account: AccountId,
        amount: u64,
    ) -> Result<u64, TransactionProcessError>;

    fn withdraw(
        &self,
        machine: MachineId,
        account: AccountId,
        amount: u64,
    ) -> Result<WithdrawalReceipt, TransactionProcessError>;

    /// Manual correction by a signed amount; the balance may not go negative.
    fn adjust_balance(
        &self,
        machine: MachineId,
        account: AccountId,
        delta: i64,
    ) -> Result<u64, TransactionProcessError>;

    fn machine_state(&self, machine: MachineId) -> Result<MachineState, TransactionProcessError>;

    fn execute(
        &self,
        machine: MachineId,
        command: AtmCommand,
    ) -> Result<Response, TransactionProcessError> {
        match command {
            AtmCommand::Balance { account } => self.balance(account).map(Response::Balance),
            AtmCommand::Deposit { account, amount } => self
                .deposit(machine, account, amount)
                .map(Response::Balance),
            AtmCommand::Withdraw { account, amount } => self
                .withdraw(machine, account, amount)
                .map(Response::Withdrawal),
            AtmCommand::Adjust { account, delta } => self
                .adjust_balance(machine, account, delta)
                .map(Response::Balance),
            AtmCommand::MachineState => self.machine_state(machine).map(Response::MachineState),
        }
    }
}
