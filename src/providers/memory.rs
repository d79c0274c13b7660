// SPDX-FileCopyrightText: 2025 Abe Kohandel <abe@kodebooth.com>
// SPDX-License-Identifier: MIT

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use tokio::{
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::debug;
use uuid::Uuid;

use crate::{error::LockError, providers::Store};

type Records = Mutex<HashMap<String, Record>>;

/// In-process [Store] backed by a single shared map.
///
/// Clones share the same map, so every [DLock](crate::DLock) built from a
/// clone contends on the same key space. Expiry is checked lazily on every
/// access; [MemoryStore::spawn_reaper] can additionally sweep keys that are
/// never touched again.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Arc<Records>,
}

#[derive(Debug, Clone, Copy)]
struct Record {
    token: Uuid,
    /// `None` when the TTL reaches past what an [Instant] can hold.
    expires_at: Option<Instant>,
}

impl Record {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|expires_at| now < expires_at)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records physically stored, expired ones included.
    pub fn record_count(&self) -> usize {
        self.records().len()
    }

    /// Periodically drop expired records.
    ///
    /// The task exits on the first tick after the last clone of the store is
    /// dropped.
    pub fn spawn_reaper(&self, period: Duration) -> JoinHandle<()> {
        let records = Arc::downgrade(&self.records);
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(records) = records.upgrade() else {
                    debug!("Lock store dropped, stopping reaper");
                    break;
                };
                let reaped = sweep(&records);
                if reaped > 0 {
                    debug!(reaped, "Reaped expired lock records");
                }
            }
        })
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, Record>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn sweep(records: &Records) -> usize {
    let now = Instant::now();
    let mut records = records.lock().unwrap_or_else(PoisonError::into_inner);
    let before = records.len();
    records.retain(|_, record| record.is_live(now));
    before - records.len()
}

impl Store for MemoryStore {
    async fn create_if_absent(
        &self,
        key: &str,
        token: Uuid,
        ttl: Duration,
    ) -> Result<bool, LockError> {
        let now = Instant::now();
        let mut records = self.records();

        if records.get(key).is_some_and(|record| record.is_live(now)) {
            debug!(key, "Lock record already held");
            return Ok(false);
        }

        records.insert(
            key.to_string(),
            Record {
                token,
                expires_at: now.checked_add(ttl),
            },
        );
        Ok(true)
    }

    async fn read(&self, key: &str) -> Result<Option<Uuid>, LockError> {
        let now = Instant::now();
        let mut records = self.records();

        match records.get(key).copied() {
            Some(record) if record.is_live(now) => Ok(Some(record.token)),
            Some(_) => {
                records.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, LockError> {
        let now = Instant::now();
        Ok(self
            .records()
            .remove(key)
            .is_some_and(|record| record.is_live(now)))
    }
}

#[cfg(test)]
mod tests {
    use tokio::{task::JoinSet, time::sleep};

    use super::*;

    const KEY: &str = "lock:11111";

    #[tokio::test]
    async fn create_fresh_record() {
        let store = MemoryStore::new();
        let token = Uuid::new_v4();

        assert!(
            store
                .create_if_absent(KEY, token, Duration::from_secs(5))
                .await
                .unwrap()
        );
        assert_eq!(store.read(KEY).await.unwrap(), Some(token));
    }

    #[tokio::test]
    async fn reject_live_record() {
        let store = MemoryStore::new();
        let first = Uuid::new_v4();

        assert!(
            store
                .create_if_absent(KEY, first, Duration::from_secs(5))
                .await
                .unwrap()
        );
        assert!(
            !store
                .create_if_absent(KEY, Uuid::new_v4(), Duration::from_secs(5))
                .await
                .unwrap()
        );
        assert_eq!(store.read(KEY).await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn expired_record_is_invisible() {
        let store = MemoryStore::new();

        assert!(
            store
                .create_if_absent(KEY, Uuid::new_v4(), Duration::from_millis(100))
                .await
                .unwrap()
        );

        sleep(Duration::from_millis(150)).await;

        assert_eq!(store.read(KEY).await.unwrap(), None);
        let next = Uuid::new_v4();
        assert!(
            store
                .create_if_absent(KEY, next, Duration::from_millis(100))
                .await
                .unwrap()
        );
        assert_eq!(store.read(KEY).await.unwrap(), Some(next));
    }

    #[tokio::test]
    async fn huge_ttl_does_not_overflow() {
        let store = MemoryStore::new();
        let token = Uuid::new_v4();

        assert!(
            store
                .create_if_absent(KEY, token, Duration::MAX)
                .await
                .unwrap()
        );
        assert_eq!(store.read(KEY).await.unwrap(), Some(token));
        assert!(
            !store
                .create_if_absent(KEY, Uuid::new_v4(), Duration::from_secs(5))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn delete_reports_removal() {
        let store = MemoryStore::new();

        assert!(!store.delete(KEY).await.unwrap());
        store
            .create_if_absent(KEY, Uuid::new_v4(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(store.delete(KEY).await.unwrap());
        assert!(!store.delete(KEY).await.unwrap());
        assert_eq!(store.read(KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_expired_record_removes_nothing_live() {
        let store = MemoryStore::new();
        store
            .create_if_absent(KEY, Uuid::new_v4(), Duration::from_millis(10))
            .await
            .unwrap();

        sleep(Duration::from_millis(30)).await;

        assert!(!store.delete(KEY).await.unwrap());
        assert_eq!(store.record_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn single_winner_under_contention() {
        let store = MemoryStore::new();
        let mut set = JoinSet::new();

        for _ in 0..64 {
            let store = store.clone();
            set.spawn(async move {
                store
                    .create_if_absent(KEY, Uuid::new_v4(), Duration::from_secs(5))
                    .await
                    .unwrap()
            });
        }

        let winners = set.join_all().await.into_iter().filter(|won| *won).count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn reaper_sweeps_untouched_keys() {
        let store = MemoryStore::new();
        for key in ["lock:a", "lock:b", "lock:c"] {
            store
                .create_if_absent(key, Uuid::new_v4(), Duration::from_millis(10))
                .await
                .unwrap();
        }
        store
            .create_if_absent("lock:d", Uuid::new_v4(), Duration::from_secs(60))
            .await
            .unwrap();

        let reaper = store.spawn_reaper(Duration::from_millis(5));
        sleep(Duration::from_millis(60)).await;

        assert_eq!(store.record_count(), 1);
        reaper.abort();
    }

    #[tokio::test]
    async fn reaper_stops_with_store() {
        let store = MemoryStore::new();
        let reaper = store.spawn_reaper(Duration::from_millis(5));

        drop(store);

        tokio::time::timeout(Duration::from_secs(1), reaper)
            .await
            .expect("reaper should stop once the store is gone")
            .expect("reaper should not panic");
    }
}
