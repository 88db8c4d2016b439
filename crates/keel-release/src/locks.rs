//! Per-release serialisation

use keel_core::ReleaseKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per release key.
///
/// Mutating operations hold the guard across read, check, increment and
/// write. Keys nobody holds are pruned on the next acquisition.
#[derive(Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<ReleaseKey, Arc<AsyncMutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &ReleaseKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = match self.locks.lock() {
                Ok(locks) => locks,
                Err(poisoned) => poisoned.into_inner(),
            };
            locks.retain(|k, l| k == key || Arc::strong_count(l) > 1);
            locks.entry(key.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of keys currently tracked
    pub fn tracked(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyLocks::new());
        let key = ReleaseKey::new("default", "app1");

        let guard = locks.lock(&key).await;
        let contender = {
            let locks = locks.clone();
            let key = key.clone();
            tokio::spawn(async move {
                let _g = locks.lock(&key).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyLocks::new();
        let _a = locks.lock(&ReleaseKey::new("default", "a")).await;
        let b = tokio::time::timeout(
            Duration::from_millis(100),
            locks.lock(&ReleaseKey::new("default", "b")),
        )
        .await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_idle_keys_are_pruned() {
        let locks = KeyLocks::new();
        drop(locks.lock(&ReleaseKey::new("default", "a")).await);
        drop(locks.lock(&ReleaseKey::new("default", "b")).await);
        assert_eq!(locks.tracked(), 1);
    }
}
