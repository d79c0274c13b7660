// SPDX-FileCopyrightText: 2025 Abe Kohandel <abe@kodebooth.com>
// SPDX-License-Identifier: MIT

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::{
    error::LockError,
    lock::{Lock, Provider, Release},
};

/// [Provider] of in-process locks, one exclusive mutex per key.
///
/// Only usable when every contender lives in the same address space.
///
/// Mutexes are kept for the life of the registry, one per key ever asked for.
/// That suits a fixed set of accounts; keys drawn from an unbounded space
/// would grow it without limit.
#[derive(Debug, Clone, Default)]
pub struct LocalLocks {
    mutexes: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl LocalLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn mutex(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut mutexes = self.mutexes.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(mutexes.entry(key.to_string()).or_default())
    }
}

impl Provider for LocalLocks {
    type L = LocalLock;

    fn lock(&self, key: impl Into<String>) -> LocalLock {
        let key = key.into();
        let mutex = self.mutex(&key);
        LocalLock {
            key,
            mutex,
            guard: Mutex::default(),
        }
    }
}

/// Handle on a per-key mutex from [LocalLocks].
///
/// The TTL passed to [Lock::acquire] only has to be non-zero: a holder in this
/// process cannot disappear without dropping its guard. Dropping a held
/// `LocalLock` releases it.
///
/// Releasing a handle that never acquired fails with
/// [LockError::LockNotFound], even while another handle holds the key.
#[derive(Debug)]
pub struct LocalLock {
    key: String,
    mutex: Arc<AsyncMutex<()>>,
    guard: Mutex<Option<OwnedMutexGuard<()>>>,
}

impl LocalLock {
    /// Standalone lock, not shared with any [LocalLocks] registry.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            mutex: Arc::default(),
            guard: Mutex::default(),
        }
    }

    fn guard(&self) -> MutexGuard<'_, Option<OwnedMutexGuard<()>>> {
        self.guard.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Lock for LocalLock {
    fn key(&self) -> &str {
        &self.key
    }

    async fn acquire(&self, ttl: Duration) -> Result<bool, LockError> {
        if ttl.is_zero() {
            return Err(LockError::ZeroTtl);
        }

        match Arc::clone(&self.mutex).try_lock_owned() {
            Ok(guard) => {
                *self.guard() = Some(guard);
                debug!(key = %self.key, "Acquired local lock");
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    async fn release(&self) -> Result<Release, LockError> {
        match self.guard().take() {
            Some(_) => {
                debug!(key = %self.key, "Released local lock");
                Ok(Release::Removed)
            }
            None => Err(LockError::LockNotFound),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn acquire_and_contend() {
        let locks = LocalLocks::new();
        let holder = locks.lock("lock:11111");
        let contender = locks.lock("lock:11111");

        assert!(holder.acquire(TTL).await.unwrap());
        assert!(!contender.acquire(TTL).await.unwrap());
    }

    #[tokio::test]
    async fn relock_released_lock() {
        let locks = LocalLocks::new();
        let first = locks.lock("lock:11111");
        let second = locks.lock("lock:11111");

        assert!(first.acquire(TTL).await.unwrap());
        assert_eq!(first.release().await.unwrap(), Release::Removed);
        assert!(second.acquire(TTL).await.unwrap());
    }

    #[tokio::test]
    async fn release_twice_fails() {
        let lock = LocalLock::new("lock:11111");

        lock.acquire(TTL).await.unwrap();
        lock.release().await.unwrap();

        assert!(matches!(
            lock.release().await,
            Err(LockError::LockNotFound)
        ));
    }

    #[tokio::test]
    async fn contender_cannot_release_holder() {
        let locks = LocalLocks::new();
        let holder = locks.lock("lock:11111");
        let contender = locks.lock("lock:11111");

        holder.acquire(TTL).await.unwrap();

        assert!(matches!(
            contender.release().await,
            Err(LockError::LockNotFound)
        ));
        assert!(!contender.acquire(TTL).await.unwrap());
    }

    #[tokio::test]
    async fn zero_ttl_is_rejected() {
        let lock = LocalLock::new("lock:11111");

        assert!(matches!(
            lock.acquire(Duration::ZERO).await,
            Err(LockError::ZeroTtl)
        ));
        assert!(lock.acquire(TTL).await.unwrap());
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let locks = LocalLocks::new();
        let first = locks.lock("lock:11111");
        let second = locks.lock("lock:22222");

        assert!(first.acquire(TTL).await.unwrap());
        assert!(second.acquire(TTL).await.unwrap());
    }

    #[tokio::test]
    async fn drop_releases_lock() {
        let locks = LocalLocks::new();
        {
            let holder = locks.lock("lock:11111");
            assert!(holder.acquire(TTL).await.unwrap());
        }

        assert!(locks.lock("lock:11111").acquire(TTL).await.unwrap());
    }
}
