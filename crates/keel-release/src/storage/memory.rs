//! In-memory storage driver
//!
//! Keeps every history in process memory. Used by tests and by embedders
//! that do not need persistence.

use async_trait::async_trait;
use keel_core::ReleaseKey;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{History, ReleaseStore};
use crate::error::{ReleaseError, Result};
use crate::release::Release;

/// In-memory release store
#[derive(Clone, Default)]
pub struct MemoryStore {
    histories: Arc<RwLock<BTreeMap<ReleaseKey, History>>>,
    /// Track operation counts for assertions
    operations: Arc<RwLock<OperationCounts>>,
}

/// Counts of operations performed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub gets: usize,
    pub puts: usize,
    pub lists: usize,
    pub deletes: usize,
}

impl OperationCounts {
    /// Number of calls that may have changed the store
    pub fn mutations(&self) -> usize {
        self.puts + self.deletes
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operation_counts(&self) -> OperationCounts {
        self.operations
            .read()
            .map(|ops| ops.clone())
            .unwrap_or_default()
    }

    pub fn reset_counts(&self) {
        if let Ok(mut ops) = self.operations.write() {
            *ops = OperationCounts::default();
        }
    }

    /// Number of stored keys
    pub fn release_count(&self) -> usize {
        self.histories.read().map(|h| h.len()).unwrap_or(0)
    }

    fn count(&self, f: impl FnOnce(&mut OperationCounts)) {
        if let Ok(mut ops) = self.operations.write() {
            f(&mut ops);
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<ReleaseKey, History>>> {
        self.histories
            .read()
            .map_err(|_| ReleaseError::storage("memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<ReleaseKey, History>>> {
        self.histories
            .write()
            .map_err(|_| ReleaseError::storage("memory store lock poisoned"))
    }
}

#[async_trait]
impl ReleaseStore for MemoryStore {
    async fn get(&self, key: &ReleaseKey) -> Result<Release> {
        self.count(|ops| ops.gets += 1);

        self.read()?
            .get(key)
            .and_then(History::head)
            .ok_or_else(|| ReleaseError::NotFound { key: key.clone() })
    }

    async fn put(&self, release: &Release) -> Result<()> {
        self.count(|ops| ops.puts += 1);

        let key = release.key();
        let mut histories = self.write()?;
        match histories.get_mut(&key) {
            Some(history) => history.apply(release),
            None => {
                histories.insert(key, History::create(release)?);
                Ok(())
            }
        }
    }

    async fn list_revisions(&self, key: &ReleaseKey) -> Result<Vec<Release>> {
        self.count(|ops| ops.lists += 1);

        self.read()?
            .get(key)
            .map(History::releases)
            .ok_or_else(|| ReleaseError::NotFound { key: key.clone() })
    }

    async fn delete(&self, key: &ReleaseKey) -> Result<Vec<Release>> {
        self.count(|ops| ops.deletes += 1);

        self.write()?
            .remove(key)
            .map(|history| history.releases())
            .ok_or_else(|| ReleaseError::NotFound { key: key.clone() })
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<Release>> {
        self.count(|ops| ops.lists += 1);

        Ok(self
            .read()?
            .values()
            .filter(|h| namespace.is_none_or(|ns| h.key.namespace == ns))
            .filter_map(History::head)
            .collect())
    }
}
