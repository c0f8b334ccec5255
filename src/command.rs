use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::account::AccountId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Balance,
    Deposit,
    Withdrawal,
    Adjust,
    Machine,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Account is required for {kind:?}")]
    AccountRequired { kind: RequestKind },
    #[error("Amount is required for {kind:?}")]
    AmountRequired { kind: RequestKind },
    #[error("Amount must be positive for {kind:?}, got {amount}")]
    InvalidAmount { kind: RequestKind, amount: i64 },
    #[error("Amount cannot be zero for {kind:?}")]
    ZeroAdjustment { kind: RequestKind },
}

/// A request that passed boundary validation and can be handed to a
/// [`crate::processor::TransactionProcessor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtmCommand {
    Balance { account: AccountId },
    Deposit { account: AccountId, amount: u64 },
    Withdraw { account: AccountId, amount: u64 },
    Adjust { account: AccountId, delta: i64 },
    MachineState,
}

impl AtmCommand {
    pub fn parse_command(
        kind: RequestKind,
        account: Option<AccountId>,
        amount: Option<i64>,
    ) -> Result<Self, CommandError> {
        match kind {
            RequestKind::Balance => Ok(Self::Balance {
                account: Self::require_account(kind, account)?,
            }),
            RequestKind::Deposit => Ok(Self::Deposit {
                account: Self::require_account(kind, account)?,
                amount: Self::parse_positive_amount(kind, amount)?,
            }),
            RequestKind::Withdrawal => Ok(Self::Withdraw {
                account: Self::require_account(kind, account)?,
                amount: Self::parse_positive_amount(kind, amount)?,
            }),
            RequestKind::Adjust => {
                let account = Self::require_account(kind, account)?;
                match amount {
                    Some(0) => Err(CommandError::ZeroAdjustment { kind }),
                    Some(delta) => Ok(Self::Adjust { account, delta }),
                    None => Err(CommandError::AmountRequired { kind }),
                }
            }
            RequestKind::Machine => Ok(Self::MachineState),
        }
    }

    fn require_account(
        kind: RequestKind,
        account: Option<AccountId>,
    ) -> Result<AccountId, CommandError> {
        account.ok_or(CommandError::AccountRequired { kind })
    }

    fn parse_positive_amount(kind: RequestKind, amount: Option<i64>) -> Result<u64, CommandError> {
        let Some(amount) = amount else {
            return Err(CommandError::AmountRequired { kind });
        };
        if amount > 0 {
            Ok(amount.unsigned_abs())
        } else {
            Err(CommandError::InvalidAmount { kind, amount })
        }
    }
}
