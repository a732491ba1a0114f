//! Error types for ledger operations.

use thiserror::Error;

use crate::amount::AmountError;
use crate::model::{TxId, UserId};
use crate::store::StoreError;
use crate::Amount;

/// Top-level error returned by [`LedgerService`](super::LedgerService).
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("invalid amount: {0}")]
    InvalidAmount(#[from] AmountError),

    #[error("unknown source type '{0}'")]
    UnknownSource(String),

    #[error("transaction id is empty")]
    EmptyTransactionId,

    #[error("user id is empty")]
    EmptyUserId,

    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error("user {0} already registered")]
    UserAlreadyRegistered(UserId),

    #[error("user limit of {0} reached")]
    UserLimitReached(usize),

    #[error("duplicate transaction id {0}")]
    DuplicateTransaction(TxId),

    #[error("insufficient balance for user {user}: balance {balance}, requested {requested}")]
    InsufficientBalance {
        user: UserId,
        balance: Amount,
        requested: Amount,
    },

    #[error("balance overflow for user {0}")]
    BalanceOverflow(UserId),

    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

/// Error from [`BalanceStore::apply_delta`](super::BalanceStore::apply_delta).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BalanceError {
    #[error("user {0} not found")]
    UserNotFound(UserId),

    #[error("insufficient balance for user {user}: balance {balance}, requested {requested}")]
    InsufficientBalance {
        user: UserId,
        balance: Amount,
        requested: Amount,
    },

    #[error("balance overflow for user {0}")]
    Overflow(UserId),
}

impl From<BalanceError> for LedgerError {
    fn from(err: BalanceError) -> Self {
        match err {
            BalanceError::UserNotFound(user) => LedgerError::UserNotFound(user),
            BalanceError::InsufficientBalance {
                user,
                balance,
                requested,
            } => LedgerError::InsufficientBalance {
                user,
                balance,
                requested,
            },
            BalanceError::Overflow(user) => LedgerError::BalanceOverflow(user),
        }
    }
}
