// SPDX-FileCopyrightText: 2025 Abe Kohandel <abe@kodebooth.com>
// SPDX-License-Identifier: MIT

use std::{future::Future, time::Duration};

use uuid::Uuid;

use crate::error::LockError;

#[cfg(feature = "dynamodb")]
pub mod dynamodb;
pub mod memory;

/// `Store` is a trait that abstracts the backend specific details of keeping
/// lock records.
///
/// A record is live until its TTL elapses. Expired records must be invisible
/// to [Store::read] and must not block [Store::create_if_absent], whether or
/// not they have been physically removed yet.
pub trait Store: Send + Sync {
    /// Atomically create the record for `key` unless a live one exists.
    ///
    /// Returns `Ok(false)` when the key is held; that is contention, not an
    /// error. Two concurrent calls for the same key never both return `true`.
    fn create_if_absent(
        &self,
        key: &str,
        token: Uuid,
        ttl: Duration,
    ) -> impl Future<Output = Result<bool, LockError>> + Send;

    /// Token of the live record for `key`, if any.
    fn read(&self, key: &str) -> impl Future<Output = Result<Option<Uuid>, LockError>> + Send;

    /// Remove the record for `key`. Returns whether a live record was removed.
    fn delete(&self, key: &str) -> impl Future<Output = Result<bool, LockError>> + Send;
}
