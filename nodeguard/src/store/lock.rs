//! Per-attempt locks with expiry.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::errors::Result;

/// A set-if-absent key store with time-to-live.
///
/// The only distributed lock in the system: it makes a retry job
/// delivered more than once execute at most once per attempt number.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Sets `key` if absent, expiring after `ttl`. Returns true if this call set it.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Removes `key`. Safe if absent or already expired.
    async fn release(&self, key: &str) -> Result<()>;
}

/// Process-local lock store.
#[derive(Debug, Default)]
pub struct InMemoryLockStore {
    entries: Mutex<HashMap<String, Instant>>,
}

impl InMemoryLockStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if `key` is held and not expired.
    #[must_use]
    pub fn is_held(&self, key: &str) -> bool {
        self.entries
            .lock()
            .get(key)
            .is_some_and(|expires_at| *expires_at > Instant::now())
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(expires_at) if *expires_at > now => Ok(false),
            _ => {
                entries.insert(key.to_string(), now + ttl);
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_acquire_fails() {
        let store = InMemoryLockStore::new();
        assert!(store.try_acquire("r-n-0", Duration::from_secs(5)).await.unwrap());
        assert!(!store.try_acquire("r-n-0", Duration::from_secs(5)).await.unwrap());
        assert!(store.try_acquire("r-n-1", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_frees_key() {
        let store = InMemoryLockStore::new();
        store.try_acquire("k", Duration::from_secs(5)).await.unwrap();
        store.release("k").await.unwrap();
        assert!(!store.is_held("k"));
        assert!(store.try_acquire("k", Duration::from_secs(5)).await.unwrap());
        store.release("absent").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_lock_expires_after_ttl() {
        let store = InMemoryLockStore::new();
        store.try_acquire("k", Duration::from_secs(5)).await.unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(store.is_held("k"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!store.is_held("k"));
        assert!(store.try_acquire("k", Duration::from_secs(5)).await.unwrap());
    }
}
