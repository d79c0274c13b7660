// SPDX-FileCopyrightText: 2025 Abe Kohandel <abe@kodebooth.com>
// SPDX-License-Identifier: MIT

use std::{future::Future, time::Duration};

use bon::Builder;
use tracing::debug;
use uuid::Uuid;

use crate::{error::LockError, providers::Store};

/// Outcome of a successful release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// The record belonged to this lock and was removed.
    Removed,
    /// The record belongs to a newer holder and was left in place. This lock's
    /// TTL lapsed while it was held.
    Superseded,
}

/// `Lock` is the acquire/hold/release contract shared by every lock kind.
pub trait Lock: Send + Sync {
    fn key(&self) -> &str;

    /// Single non-blocking acquisition attempt.
    ///
    /// `Ok(false)` means someone else holds the lock. A zero `ttl` fails with
    /// [LockError::ZeroTtl]; other errors are reserved for failures of the
    /// lock backend.
    fn acquire(&self, ttl: Duration) -> impl Future<Output = Result<bool, LockError>> + Send;

    /// Give the lock back.
    ///
    /// Fails with [LockError::LockNotFound] when this lock holds nothing it
    /// can give back. Calling this on a lock that never acquired differs per
    /// kind: a [DLock] sees another holder's live record and answers
    /// [Release::Superseded], while a [LocalLock](crate::LocalLock) has no
    /// guard of its own and answers [LockError::LockNotFound] even though the
    /// key is held.
    fn release(&self) -> impl Future<Output = Result<Release, LockError>> + Send;
}

/// `Provider` hands out a [Lock] per resource key.
pub trait Provider: Send + Sync {
    type L: Lock;

    fn lock(&self, key: impl Into<String>) -> Self::L;
}

/// A lock over a [Store] record, identified by a per-instance token.
#[derive(Builder, Debug)]
pub struct DLock<S>
where
    S: Store,
{
    #[builder(into)]
    key: String,
    #[builder(default = Uuid::new_v4())]
    token: Uuid,

    store: S,
}

impl<S> DLock<S>
where
    S: Store,
{
    pub fn token(&self) -> Uuid {
        self.token
    }
}

impl<S> Lock for DLock<S>
where
    S: Store,
{
    fn key(&self) -> &str {
        &self.key
    }

    async fn acquire(&self, ttl: Duration) -> Result<bool, LockError> {
        if ttl.is_zero() {
            return Err(LockError::ZeroTtl);
        }

        let acquired = self
            .store
            .create_if_absent(&self.key, self.token, ttl)
            .await?;
        if acquired {
            debug!(key = %self.key, token = %self.token, ?ttl, "Acquired lock");
        }
        Ok(acquired)
    }

    async fn release(&self) -> Result<Release, LockError> {
        let Some(holder) = self.store.read(&self.key).await? else {
            return Err(LockError::LockNotFound);
        };

        if holder != self.token {
            debug!(key = %self.key, token = %self.token, %holder, "Lock superseded, leaving record");
            return Ok(Release::Superseded);
        }

        self.store.delete(&self.key).await?;
        debug!(key = %self.key, token = %self.token, "Released lock");
        Ok(Release::Removed)
    }
}

/// [Provider] of [DLock]s sharing one [Store].
///
/// Every lock handed out carries a fresh token.
#[derive(Debug, Clone)]
pub struct DistributedLocks<S> {
    store: S,
}

impl<S> DistributedLocks<S>
where
    S: Store + Clone,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S> Provider for DistributedLocks<S>
where
    S: Store + Clone,
{
    type L = DLock<S>;

    fn lock(&self, key: impl Into<String>) -> DLock<S> {
        DLock::builder()
            .key(key)
            .store(self.store.clone())
            .build()
    }
}

#[cfg(test)]
mod tests {
    use tokio::{task::JoinSet, time::sleep};

    use super::*;
    use crate::providers::memory::MemoryStore;

    const KEY: &str = "lock:11111";

    fn lock(store: &MemoryStore) -> DLock<MemoryStore> {
        DLock::builder().key(KEY).store(store.clone()).build()
    }

    #[tokio::test]
    async fn acquire_fresh_lock() {
        let store = MemoryStore::new();
        let lock = lock(&store);

        assert!(lock.acquire(Duration::from_secs(5)).await.unwrap());
        assert_eq!(store.read(KEY).await.unwrap(), Some(lock.token()));
    }

    #[tokio::test]
    async fn reject_already_locked() {
        let store = MemoryStore::new();
        let holder = lock(&store);
        let contender = lock(&store);

        assert!(holder.acquire(Duration::from_secs(5)).await.unwrap());
        assert!(!contender.acquire(Duration::from_secs(5)).await.unwrap());
        assert_eq!(store.read(KEY).await.unwrap(), Some(holder.token()));
    }

    #[tokio::test]
    async fn relock_released_lock() {
        let store = MemoryStore::new();
        let first = lock(&store);
        let second = lock(&store);

        assert!(first.acquire(Duration::from_secs(5)).await.unwrap());
        assert_eq!(first.release().await.unwrap(), Release::Removed);
        assert!(second.acquire(Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn release_twice_fails() {
        let store = MemoryStore::new();
        let lock = lock(&store);

        lock.acquire(Duration::from_secs(5)).await.unwrap();
        lock.release().await.unwrap();

        assert!(matches!(
            lock.release().await,
            Err(LockError::LockNotFound)
        ));
    }

    #[tokio::test]
    async fn release_unheld_lock_fails() {
        let store = MemoryStore::new();

        assert!(matches!(
            lock(&store).release().await,
            Err(LockError::LockNotFound)
        ));
    }

    #[tokio::test]
    async fn stale_release_keeps_newer_holder() {
        let store = MemoryStore::new();
        let stale = lock(&store);
        let fresh = lock(&store);

        assert!(stale.acquire(Duration::from_millis(50)).await.unwrap());
        sleep(Duration::from_millis(80)).await;
        assert!(fresh.acquire(Duration::from_secs(5)).await.unwrap());

        assert_eq!(stale.release().await.unwrap(), Release::Superseded);
        assert_eq!(store.read(KEY).await.unwrap(), Some(fresh.token()));
    }

    #[tokio::test]
    async fn recover_expired_lock() {
        let store = MemoryStore::new();
        let crashed = lock(&store);

        assert!(crashed.acquire(Duration::from_millis(100)).await.unwrap());
        sleep(Duration::from_millis(150)).await;

        assert_eq!(store.read(KEY).await.unwrap(), None);
        assert!(lock(&store).acquire(Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn zero_ttl_is_rejected() {
        let store = MemoryStore::new();
        let first = lock(&store);
        let second = lock(&store);

        assert!(matches!(
            first.acquire(Duration::ZERO).await,
            Err(LockError::ZeroTtl)
        ));
        assert!(matches!(
            second.acquire(Duration::ZERO).await,
            Err(LockError::ZeroTtl)
        ));
        assert_eq!(store.record_count(), 0);
    }

    #[tokio::test]
    async fn never_acquired_release_sees_holder() {
        let store = MemoryStore::new();
        let holder = lock(&store);
        let contender = lock(&store);

        assert!(holder.acquire(Duration::from_secs(5)).await.unwrap());

        assert_eq!(contender.release().await.unwrap(), Release::Superseded);
        assert_eq!(store.read(KEY).await.unwrap(), Some(holder.token()));
    }

    #[tokio::test]
    async fn same_instance_is_not_reentrant() {
        let store = MemoryStore::new();
        let lock = lock(&store);

        assert!(lock.acquire(Duration::from_secs(5)).await.unwrap());
        assert!(!lock.acquire(Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn provider_locks_are_exclusive() {
        let locks = DistributedLocks::new(MemoryStore::new());
        let mut set = JoinSet::new();

        for _ in 0..32 {
            let lock = locks.lock(KEY);
            set.spawn(async move { lock.acquire(Duration::from_secs(5)).await.unwrap() });
        }

        let winners = set.join_all().await.into_iter().filter(|won| *won).count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn provider_tokens_are_unique() {
        let locks = DistributedLocks::new(MemoryStore::new());

        assert_ne!(locks.lock(KEY).token(), locks.lock(KEY).token());
    }
}
