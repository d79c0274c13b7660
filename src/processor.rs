// SPDX-FileCopyrightText: 2025 Abe Kohandel <abe@kodebooth.com>
// SPDX-License-Identifier: MIT

use std::{sync::Arc, time::Duration};

use bon::Builder;
use rust_decimal::Decimal;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::{
    error::TransactionError,
    ledger::{Ledger, Transaction},
    lock::Provider,
    retry::RetryPolicy,
};

/// Default lock TTL, well above the time a balance update takes.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5);

/// A transaction that made it into the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub account_id: String,
    pub amount: Decimal,
    /// Balance right after the transaction.
    pub balance: Decimal,
}

/// Applies transactions to a [Ledger], one account lock per transaction.
///
/// Works the same with any [Provider]: [DistributedLocks](crate::DistributedLocks)
/// over any store, or [LocalLocks](crate::LocalLocks).
#[derive(Builder, Debug, Clone)]
pub struct Processor<P>
where
    P: Provider,
{
    provider: P,
    ledger: Arc<Ledger>,
    #[builder(default)]
    retry: RetryPolicy,
    #[builder(default = DEFAULT_TTL)]
    ttl: Duration,
}

impl<P> Processor<P>
where
    P: Provider,
{
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Apply one transaction while holding its account's lock.
    ///
    /// Unknown accounts are rejected before any lock is taken. Nothing is
    /// mutated unless the lock was acquired and the balance rule holds.
    pub async fn apply(&self, transaction: &Transaction) -> Result<Applied, TransactionError> {
        let result = self.apply_locked(transaction).await;

        match &result {
            Ok(applied) => info!(
                account = %applied.account_id,
                amount = %applied.amount,
                balance = %applied.balance,
                "Applied transaction"
            ),
            Err(error) => warn!(
                account = %transaction.account_id,
                amount = %transaction.amount,
                %error,
                "Skipped transaction"
            ),
        }

        result
    }

    async fn apply_locked(&self, transaction: &Transaction) -> Result<Applied, TransactionError> {
        if !self.ledger.contains(&transaction.account_id) {
            return Err(TransactionError::AccountNotFound(
                transaction.account_id.clone(),
            ));
        }

        let lock = self.provider.lock(transaction.lock_key());
        let balance = self
            .retry
            .with(&lock, self.ttl, || self.ledger.apply(transaction))
            .await??;

        Ok(Applied {
            account_id: transaction.account_id.clone(),
            amount: transaction.amount,
            balance,
        })
    }
}

impl<P> Processor<P>
where
    P: Provider + Clone + 'static,
{
    /// Apply every transaction on its own task.
    ///
    /// Outcomes come back in input order. A failed transaction never stops
    /// the others.
    pub async fn run(
        &self,
        transactions: impl IntoIterator<Item = Transaction>,
    ) -> Vec<(Transaction, Result<Applied, TransactionError>)> {
        let mut set = JoinSet::new();

        for (index, transaction) in transactions.into_iter().enumerate() {
            let processor = self.clone();
            set.spawn(async move {
                let outcome = processor.apply(&transaction).await;
                (index, transaction, outcome)
            });
        }

        let mut outcomes = set.join_all().await;
        outcomes.sort_by_key(|(index, _, _)| *index);
        outcomes
            .into_iter()
            .map(|(_, transaction, outcome)| (transaction, outcome))
            .collect()
    }
}
