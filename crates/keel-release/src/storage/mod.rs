//! Release storage
//!
//! Each key owns an append-only history: immutable [`Revision`]s indexed by
//! number, plus the status of the head. Drivers:
//! - **Memory**: in-process, with operation counters for assertions
//! - **File**: one file per key, JSON compressed with zstd

mod file;
mod memory;

pub use file::FileStore;
pub use memory::{MemoryStore, OperationCounts};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keel_core::{ReleaseKey, ReleaseStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{ReleaseError, Result};
use crate::release::{Release, Revision};

/// Persistence for release histories.
///
/// `put` is a compare-and-set on the revision number:
/// - revision 1 requires an absent key
/// - `current + 1` appends a revision
/// - `current` replaces the status only; the content must be unchanged
///
/// Anything else is a [`ReleaseError::Storage`] conflict.
#[async_trait]
pub trait ReleaseStore: Send + Sync {
    /// Head of the history
    async fn get(&self, key: &ReleaseKey) -> Result<Release>;

    async fn put(&self, release: &Release) -> Result<()>;

    /// Every revision, ascending; non-head entries are `Superseded`
    async fn list_revisions(&self, key: &ReleaseKey) -> Result<Vec<Release>>;

    /// Remove the whole history and return it
    async fn delete(&self, key: &ReleaseKey) -> Result<Vec<Release>>;

    /// Heads of all keys, optionally limited to one namespace
    async fn list(&self, namespace: Option<&str>) -> Result<Vec<Release>>;

    async fn exists(&self, key: &ReleaseKey) -> Result<bool> {
        match self.get(key).await {
            Ok(_) => Ok(true),
            Err(ReleaseError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// History of one key
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct History {
    pub key: ReleaseKey,
    pub status: ReleaseStatus,
    pub updated_at: DateTime<Utc>,
    pub revisions: Vec<Arc<Revision>>,
}

impl History {
    /// Start a history from a revision-1 release
    pub fn create(release: &Release) -> Result<Self> {
        if release.number() != 1 {
            return Err(ReleaseError::storage(format!(
                "release '{}' does not exist; cannot store revision {}",
                release.key(),
                release.number()
            )));
        }
        Ok(Self {
            key: release.key(),
            status: release.status,
            updated_at: release.updated_at,
            revisions: vec![release.revision.clone()],
        })
    }

    pub fn current(&self) -> u32 {
        self.revisions.last().map(|r| r.number).unwrap_or(0)
    }

    /// Compare-and-set `release` onto this history
    pub fn apply(&mut self, release: &Release) -> Result<()> {
        let current = self.current();
        let number = release.number();

        if number == current + 1 {
            self.revisions.push(release.revision.clone());
        } else if number == current {
            let head = self.revisions.last().map(|r| r.as_ref());
            if head != Some(release.revision.as_ref()) {
                return Err(ReleaseError::storage(format!(
                    "release '{}' revision {} is immutable",
                    self.key, number
                )));
            }
        } else {
            return Err(ReleaseError::storage(format!(
                "revision conflict for '{}': stored {}, got {}",
                self.key, current, number
            )));
        }

        self.status = release.status;
        self.updated_at = release.updated_at;
        Ok(())
    }

    pub fn head(&self) -> Option<Release> {
        self.revisions.last().map(|rev| self.view(rev, self.status))
    }

    /// All revisions, ascending
    pub fn releases(&self) -> Vec<Release> {
        let last = self.revisions.len().saturating_sub(1);
        self.revisions
            .iter()
            .enumerate()
            .map(|(i, rev)| {
                let status = if i == last {
                    self.status
                } else {
                    ReleaseStatus::Superseded
                };
                self.view(rev, status)
            })
            .collect()
    }

    fn view(&self, revision: &Arc<Revision>, status: ReleaseStatus) -> Release {
        Release {
            namespace: self.key.namespace.clone(),
            name: self.key.name.clone(),
            status,
            updated_at: if status == ReleaseStatus::Superseded {
                revision.created_at
            } else {
                self.updated_at
            },
            revision: revision.clone(),
            live: Vec::new(),
        }
    }
}

/// On-disk form of a [`History`]
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StoredHistory {
    pub namespace: String,
    pub name: String,
    pub status: ReleaseStatus,
    pub updated_at: DateTime<Utc>,
    pub revisions: Vec<Revision>,
}

impl From<&History> for StoredHistory {
    fn from(history: &History) -> Self {
        Self {
            namespace: history.key.namespace.clone(),
            name: history.key.name.clone(),
            status: history.status,
            updated_at: history.updated_at,
            revisions: history.revisions.iter().map(|r| r.as_ref().clone()).collect(),
        }
    }
}

impl From<StoredHistory> for History {
    fn from(stored: StoredHistory) -> Self {
        Self {
            key: ReleaseKey::new(stored.namespace, stored.name),
            status: stored.status,
            updated_at: stored.updated_at,
            revisions: stored.revisions.into_iter().map(Arc::new).collect(),
        }
    }
}

/// Compression method for stored histories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "method")]
pub enum CompressionMethod {
    None,
    Zstd { level: i32 },
}

impl Default for CompressionMethod {
    fn default() -> Self {
        Self::Zstd { level: 3 }
    }
}

pub fn compress(data: &[u8], method: CompressionMethod) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Zstd { level } => zstd::encode_all(std::io::Cursor::new(data), level)
            .map_err(|e| ReleaseError::storage(format!("compression error: {}", e))),
    }
}

pub fn decompress(data: &[u8], method: CompressionMethod) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => Ok(data.to_vec()),
        CompressionMethod::Zstd { .. } => zstd::decode_all(std::io::Cursor::new(data))
            .map_err(|e| ReleaseError::storage(format!("decompression error: {}", e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::fixtures;

    #[test]
    fn test_cas_rules() {
        let mut history = History::create(&fixtures::release(1, ReleaseStatus::Deployed)).unwrap();

        // same revision, same content: status only
        let head = history.head().unwrap();
        history.apply(&head.with_status(ReleaseStatus::Stopped)).unwrap();
        assert_eq!(history.status, ReleaseStatus::Stopped);
        assert_eq!(history.current(), 1);

        // same revision, different content
        let mut changed = head.revision.as_ref().clone();
        changed.manifest.push_str("# edited\n");
        let tampered = Release::new(&head.key(), ReleaseStatus::Deployed, Arc::new(changed));
        assert!(history.apply(&tampered).is_err());

        // skip ahead
        assert!(history.apply(&fixtures::release(3, ReleaseStatus::Deployed)).is_err());

        history.apply(&fixtures::release(2, ReleaseStatus::Deployed)).unwrap();
        assert_eq!(history.current(), 2);
    }

    #[test]
    fn test_create_requires_first_revision() {
        assert!(History::create(&fixtures::release(2, ReleaseStatus::Deployed)).is_err());
    }

    #[test]
    fn test_releases_mark_superseded() {
        let mut history = History::create(&fixtures::release(1, ReleaseStatus::Deployed)).unwrap();
        history.apply(&fixtures::release(2, ReleaseStatus::Failed)).unwrap();

        let statuses: Vec<_> = history.releases().iter().map(|r| (r.number(), r.status)).collect();
        assert_eq!(
            statuses,
            vec![(1, ReleaseStatus::Superseded), (2, ReleaseStatus::Failed)]
        );
    }

    #[test]
    fn test_compression_roundtrip() {
        let data = b"{\"manifest\": \"kind: ConfigMap\"}".repeat(20);
        let packed = compress(&data, CompressionMethod::default()).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(decompress(&packed, CompressionMethod::default()).unwrap(), data);
    }
}
