//! The single-mutator lock and the read pins the pruner respects.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// Held for the whole of a commit or rollback. Released when dropped, on
/// every exit path.
pub struct LockToken {
    _guard: OwnedMutexGuard<()>,
}

#[derive(Clone, Default)]
pub struct MutationLock {
    inner: Arc<AsyncMutex<()>>,
}

impl MutationLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits up to `wait` for the token. A zero wait fails at once if the
    /// token is taken.
    pub async fn acquire(&self, wait: Duration) -> Result<LockToken> {
        let guard = if wait.is_zero() {
            self.inner.clone().try_lock_owned().map_err(|_| Error::Busy)?
        } else {
            tokio::time::timeout(wait, self.inner.clone().lock_owned())
                .await
                .map_err(|_| Error::Busy)?
        };
        debug!("Mutation lock acquired");
        Ok(LockToken { _guard: guard })
    }

    pub fn is_held(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

/// Reference counts of revisions currently being read.
#[derive(Clone, Default)]
pub struct ReadPins {
    counts: Arc<Mutex<HashMap<String, usize>>>,
}

impl ReadPins {
    pub fn pin(&self, revision: &str) -> ReadPin {
        let mut counts = self.counts.lock().unwrap_or_else(|p| p.into_inner());
        *counts.entry(revision.to_string()).or_insert(0) += 1;
        ReadPin {
            pins: self.clone(),
            revision: revision.to_string(),
        }
    }

    pub fn is_pinned(&self, revision: &str) -> bool {
        let counts = self.counts.lock().unwrap_or_else(|p| p.into_inner());
        counts.contains_key(revision)
    }

    fn unpin(&self, revision: &str) {
        let mut counts = self.counts.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(count) = counts.get_mut(revision) {
            *count -= 1;
            if *count == 0 {
                counts.remove(revision);
            }
        }
    }
}

pub struct ReadPin {
    pins: ReadPins,
    revision: String,
}

impl Drop for ReadPin {
    fn drop(&mut self) {
        self.pins.unpin(&self.revision);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fail_fast_when_held() {
        let lock = MutationLock::new();
        let token = lock.acquire(Duration::ZERO).await.unwrap();
        assert!(lock.is_held());

        assert!(matches!(
            lock.acquire(Duration::ZERO).await,
            Err(Error::Busy)
        ));
        assert!(matches!(
            lock.acquire(Duration::from_millis(20)).await,
            Err(Error::Busy)
        ));

        drop(token);
        assert!(!lock.is_held());
        assert!(lock.acquire(Duration::ZERO).await.is_ok());
    }

    #[tokio::test]
    async fn test_waiter_gets_token_after_release() {
        let lock = MutationLock::new();
        let token = lock.acquire(Duration::ZERO).await.unwrap();

        let waiter = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.acquire(Duration::from_secs(5)).await.is_ok() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(token);

        assert!(waiter.await.unwrap());
    }

    #[test]
    fn test_pins_are_counted() {
        let pins = ReadPins::default();
        let a = pins.pin("rev");
        let b = pins.pin("rev");
        assert!(pins.is_pinned("rev"));

        drop(a);
        assert!(pins.is_pinned("rev"));
        drop(b);
        assert!(!pins.is_pinned("rev"));
    }
}
