// SPDX-FileCopyrightText: 2025 Abe Kohandel <abe@kodebooth.com>
// SPDX-License-Identifier: MIT

use std::error::Error;

use rust_decimal::Decimal;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum LockError {
    /// The backing store failed to answer. Distinct from the key being held.
    #[error("lock store unavailable: {0}")]
    StoreUnavailable(Box<dyn Error + Send + Sync>),

    /// Release found no live record, the lock expired or was never held.
    #[error("lock not found")]
    LockNotFound,

    #[error("could not acquire lock {key} after {attempts} attempts")]
    LockAcquisitionFailed { key: String, attempts: u32 },

    /// A zero TTL would expire the record as it is created.
    #[error("lock ttl must be greater than zero")]
    ZeroTtl,
}

impl LockError {
    pub(crate) fn store(error: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self::StoreUnavailable(error.into())
    }
}

#[derive(ThisError, Debug)]
pub enum TransactionError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("insufficient funds in account {account}: balance {balance}, amount {amount}")]
    InsufficientFunds {
        account: String,
        balance: Decimal,
        amount: Decimal,
    },

    #[error("account {0} not found")]
    AccountNotFound(String),
}
