// SPDX-FileCopyrightText: 2025 Abe Kohandel <abe@kodebooth.com>
// SPDX-License-Identifier: MIT

//! TTL bounded account locks for concurrent balance updates
//!
//! Every account is guarded by a lock keyed `lock:<account id>`. A lock is a
//! record in a [Store] holding the token of its current holder and an expiry.
//! Acquisition is a single atomic create-if-absent, release only removes the
//! record when the token still matches, and an abandoned record is reclaimed
//! once its TTL elapses. Callers wrap acquisition in a [RetryPolicy] and
//! treat running out of attempts as "skip this unit of work".
//!
//! Stores:
//! - [MemoryStore]: one shared map inside the process.
//! - [DynamodbStore]: DynamoDB conditional writes, shared by every process
//!   pointed at the same table (`dynamodb` feature).
//!
//! [LocalLocks] offers the same [Lock] contract without a store, for workers
//! that all live in one process.
//!
//! # Examples
//!
//! ## Transactions
//! [Processor] applies transactions to a [Ledger] while holding the account's
//! lock and rejects debits that would overdraw.
//! ```rust
//! use acctlock::{Account, DistributedLocks, Ledger, MemoryStore, Processor, Transaction};
//! use rust_decimal::Decimal;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let ledger = Arc::new(Ledger::new([
//!         Account::new("11111", "John Doe", Decimal::from(1000)),
//!     ]));
//!     let processor = Processor::builder()
//!         .provider(DistributedLocks::new(MemoryStore::new()))
//!         .ledger(Arc::clone(&ledger))
//!         .build();
//!
//!     let outcomes = processor
//!         .run([
//!             Transaction::new("11111", Decimal::from(-200)),
//!             Transaction::new("11111", Decimal::from(-5000)),
//!         ])
//!         .await;
//!
//!     assert!(outcomes[0].1.is_ok());
//!     assert!(outcomes[1].1.is_err());
//!     assert_eq!(ledger.balance("11111"), Some(Decimal::from(800)));
//! }
//! ```
//!
//! ## Manually
//! You are responsible for acquiring and releasing the lock.
//! ```rust
//! use acctlock::{DLock, Lock, MemoryStore, Release};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let lock = DLock::builder()
//!         .key("lock:11111")
//!         .store(MemoryStore::new())
//!         .build();
//!
//!     assert!(lock.acquire(Duration::from_secs(1)).await.unwrap());
//!     // do synchronized work!
//!     assert_eq!(lock.release().await.unwrap(), Release::Removed);
//! }
//! ```

pub mod error;
pub mod ledger;
pub mod local;
pub mod lock;
pub mod processor;
pub mod providers;
pub mod retry;

pub use error::{LockError, TransactionError};
pub use ledger::{Account, Ledger, Transaction, lock_key};
pub use local::{LocalLock, LocalLocks};
pub use lock::{DLock, DistributedLocks, Lock, Provider, Release};
pub use processor::{Applied, DEFAULT_TTL, Processor};
#[cfg(feature = "dynamodb")]
pub use providers::dynamodb::DynamodbStore;
pub use providers::{Store, memory::MemoryStore};
pub use retry::{Backoff, RetryPolicy};
