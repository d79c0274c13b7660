// SPDX-FileCopyrightText: 2025 Abe Kohandel <abe@kodebooth.com>
// SPDX-License-Identifier: MIT

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::TransactionError;

/// Key of the lock guarding `account_id`.
pub fn lock_key(account_id: &str) -> String {
    format!("lock:{account_id}")
}

/// Snapshot of an account as served to readers.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Account {
    #[serde(rename = "accountNumber")]
    pub id: String,
    #[serde(rename = "customerName")]
    pub name: String,
    /// Written as a JSON number.
    #[serde(with = "rust_decimal::serde::float")]
    pub balance: Decimal,
}

impl Account {
    pub fn new(id: impl Into<String>, name: impl Into<String>, balance: Decimal) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            balance,
        }
    }
}

/// A signed balance change: positive credits, negative debits.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub account_id: String,
    pub amount: Decimal,
}

impl Transaction {
    pub fn new(account_id: impl Into<String>, amount: Decimal) -> Self {
        Self {
            account_id: account_id.into(),
            amount,
        }
    }

    pub fn is_debit(&self) -> bool {
        self.amount < Decimal::ZERO
    }

    pub fn lock_key(&self) -> String {
        lock_key(&self.account_id)
    }
}

#[derive(Debug)]
struct Entry {
    name: String,
    // Written only by the holder of the account's lock.
    balance: Mutex<Decimal>,
}

/// Fixed set of accounts and their balances.
#[derive(Debug, Default)]
pub struct Ledger {
    accounts: HashMap<String, Entry>,
}

impl Ledger {
    pub fn new(accounts: impl IntoIterator<Item = Account>) -> Self {
        accounts.into_iter().collect()
    }

    /// Current view of `account_id`.
    pub fn account(&self, account_id: &str) -> Result<Account, TransactionError> {
        let entry = self.entry(account_id)?;
        Ok(Account {
            id: account_id.to_string(),
            name: entry.name.clone(),
            balance: *entry.balance.lock().unwrap_or_else(PoisonError::into_inner),
        })
    }

    pub fn balance(&self, account_id: &str) -> Option<Decimal> {
        self.account(account_id).ok().map(|account| account.balance)
    }

    pub fn contains(&self, account_id: &str) -> bool {
        self.accounts.contains_key(account_id)
    }

    /// Every account, sorted by id.
    pub fn accounts(&self) -> Vec<Account> {
        let mut ids: Vec<&String> = self.accounts.keys().collect();
        ids.sort();
        ids.into_iter()
            .filter_map(|id| self.account(id).ok())
            .collect()
    }

    /// Apply `transaction`, refusing debits that would overdraw the account.
    ///
    /// Callers must hold the account's lock; this is the critical section.
    /// Returns the new balance.
    pub(crate) fn apply(&self, transaction: &Transaction) -> Result<Decimal, TransactionError> {
        let entry = self.entry(&transaction.account_id)?;
        let mut balance = entry.balance.lock().unwrap_or_else(PoisonError::into_inner);
        let next = *balance + transaction.amount;

        if transaction.is_debit() && next < Decimal::ZERO {
            return Err(TransactionError::InsufficientFunds {
                account: transaction.account_id.clone(),
                balance: *balance,
                amount: transaction.amount,
            });
        }

        *balance = next;
        Ok(next)
    }

    fn entry(&self, account_id: &str) -> Result<&Entry, TransactionError> {
        self.accounts
            .get(account_id)
            .ok_or_else(|| TransactionError::AccountNotFound(account_id.to_string()))
    }
}

impl FromIterator<Account> for Ledger {
    fn from_iter<T: IntoIterator<Item = Account>>(iter: T) -> Self {
        Self {
            accounts: iter
                .into_iter()
                .map(|account| {
                    (
                        account.id,
                        Entry {
                            name: account.name,
                            balance: Mutex::new(account.balance),
                        },
                    )
                })
                .collect(),
        }
    }
}
