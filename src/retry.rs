// SPDX-FileCopyrightText: 2025 Abe Kohandel <abe@kodebooth.com>
// SPDX-License-Identifier: MIT

use std::{
    panic::{self, AssertUnwindSafe},
    time::Duration,
};

use bon::Builder;
use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::{
    error::LockError,
    lock::{Lock, Release},
};

/// How the delay between acquisition attempts evolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    /// Multiply the delay by `factor` after every failed attempt, up to `max`.
    Exponential { factor: u32, max: Duration },
}

/// Bounded acquisition loop around [Lock::acquire].
///
/// ```rust
/// use acctlock::{Backoff, RetryPolicy};
/// use std::time::Duration;
///
/// let policy = RetryPolicy::builder()
///     .attempts(5)
///     .delay(Duration::from_millis(10))
///     .backoff(Backoff::Exponential {
///         factor: 2,
///         max: Duration::from_millis(200),
///     })
///     .jitter(true)
///     .build();
/// assert_eq!(policy.attempts(), 5);
/// ```
#[derive(Builder, Debug, Clone)]
pub struct RetryPolicy {
    #[builder(default = 3)]
    attempts: u32,
    #[builder(default = Duration::from_millis(100))]
    delay: Duration,
    #[builder(default = Backoff::Fixed)]
    backoff: Backoff,
    /// Draw each delay uniformly from zero up to the computed delay.
    #[builder(default)]
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Total attempts made before giving up, never less than one.
    pub fn attempts(&self) -> u32 {
        self.attempts.max(1)
    }

    /// Delay to wait after failed attempt number `attempt`, counting from 1.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let delay = match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential { factor, max } => {
                let scale = factor.saturating_pow(attempt.saturating_sub(1));
                self.delay.saturating_mul(scale).min(max)
            }
        };

        if self.jitter {
            delay.mul_f64(rand::rng().random::<f64>())
        } else {
            delay
        }
    }

    /// Acquire `lock`, retrying on contention.
    ///
    /// Backend errors are returned as soon as they occur. Running out of
    /// attempts yields [LockError::LockAcquisitionFailed].
    pub async fn acquire<L>(&self, lock: &L, ttl: Duration) -> Result<(), LockError>
    where
        L: Lock,
    {
        let attempts = self.attempts();
        for attempt in 1..=attempts {
            if lock.acquire(ttl).await? {
                return Ok(());
            }

            if attempt < attempts {
                let delay = self.delay_after(attempt);
                debug!(key = lock.key(), attempt, ?delay, "Lock contended, retrying");
                sleep(delay).await;
            }
        }

        Err(LockError::LockAcquisitionFailed {
            key: lock.key().to_string(),
            attempts,
        })
    }

    /// Run `f` while holding `lock`.
    ///
    /// `f` is only called once the lock is acquired. The lock is released
    /// afterwards no matter what `f` returned, and before a panic in `f` is
    /// resumed. A failed release is logged and left to the TTL; it does not
    /// replace the result of `f`.
    pub async fn with<L, R>(
        &self,
        lock: &L,
        ttl: Duration,
        f: impl FnOnce() -> R,
    ) -> Result<R, LockError>
    where
        L: Lock,
    {
        self.acquire(lock, ttl).await?;

        let result = panic::catch_unwind(AssertUnwindSafe(f));

        match lock.release().await {
            Ok(Release::Removed) => {}
            Ok(Release::Superseded) => {
                warn!(key = lock.key(), ?ttl, "Lock expired while held");
            }
            Err(error) => {
                warn!(key = lock.key(), %error, "Failed to release lock");
            }
        }

        match result {
            Ok(result) => Ok(result),
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}
