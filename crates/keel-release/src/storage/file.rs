//! File-based storage driver
//!
//! One file per key at `<base>/<namespace>/<name>.json[.zst]`, holding the
//! whole history. Files are replaced atomically (temp file + rename), so a
//! reader sees either the old history or the new one.

use async_trait::async_trait;
use keel_core::ReleaseKey;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{CompressionMethod, History, ReleaseStore, StoredHistory, compress, decompress};
use crate::error::{ReleaseError, Result};
use crate::release::Release;

/// File-based release store
pub struct FileStore {
    base_dir: PathBuf,
    compression: CompressionMethod,
    /// Serialises read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(base_dir: PathBuf, compression: CompressionMethod) -> Result<Self> {
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            compression,
            write_lock: Mutex::new(()),
        })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn extension(&self) -> &'static str {
        match self.compression {
            CompressionMethod::None => "json",
            CompressionMethod::Zstd { .. } => "json.zst",
        }
    }

    /// Both key parts must be labels so the path stays under `base_dir`
    fn history_path(&self, key: &ReleaseKey) -> Result<PathBuf> {
        ReleaseError::check_key(key)?;
        Ok(self
            .base_dir
            .join(&key.namespace)
            .join(format!("{}.{}", key.name, self.extension())))
    }

    fn read_history(&self, path: &Path) -> Result<History> {
        let data = std::fs::read(path)?;
        let json = decompress(&data, self.compression)?;
        let stored: StoredHistory = serde_json::from_slice(&json)?;
        Ok(stored.into())
    }

    fn load(&self, key: &ReleaseKey) -> Result<Option<History>> {
        let path = self.history_path(key)?;
        if !path.exists() {
            return Ok(None);
        }
        self.read_history(&path).map(Some)
    }

    fn write_history(&self, history: &History) -> Result<()> {
        let path = self.history_path(&history.key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_vec(&StoredHistory::from(history))?;
        let data = compress(&json, self.compression)?;

        let tmp = path.with_extension("partial");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| ReleaseError::storage("file store lock poisoned"))
    }

    fn all_histories(&self, namespace: Option<&str>) -> Result<Vec<History>> {
        let namespaces: Vec<PathBuf> = match namespace {
            Some(ns) => {
                ReleaseError::check_namespace(ns)?;
                let path = self.base_dir.join(ns);
                if path.is_dir() { vec![path] } else { vec![] }
            }
            None => std::fs::read_dir(&self.base_dir)?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect(),
        };

        let suffix = format!(".{}", self.extension());
        let mut histories = Vec::new();
        for ns_path in namespaces {
            for entry in std::fs::read_dir(&ns_path)?.filter_map(|e| e.ok()) {
                let path = entry.path();
                let is_history = path
                    .file_name()
                    .and_then(|f| f.to_str())
                    .is_some_and(|f| f.ends_with(&suffix));
                if !is_history {
                    continue;
                }
                match self.read_history(&path) {
                    Ok(history) => histories.push(history),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), "skipping unreadable release file: {}", e)
                    }
                }
            }
        }

        histories.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(histories)
    }
}

#[async_trait]
impl ReleaseStore for FileStore {
    async fn get(&self, key: &ReleaseKey) -> Result<Release> {
        self.load(key)?
            .and_then(|h| h.head())
            .ok_or_else(|| ReleaseError::NotFound { key: key.clone() })
    }

    async fn put(&self, release: &Release) -> Result<()> {
        let _guard = self.lock()?;
        let key = release.key();

        let history = match self.load(&key)? {
            Some(mut history) => {
                history.apply(release)?;
                history
            }
            None => History::create(release)?,
        };

        self.write_history(&history)
    }

    async fn list_revisions(&self, key: &ReleaseKey) -> Result<Vec<Release>> {
        self.load(key)?
            .map(|h| h.releases())
            .ok_or_else(|| ReleaseError::NotFound { key: key.clone() })
    }

    async fn delete(&self, key: &ReleaseKey) -> Result<Vec<Release>> {
        let _guard = self.lock()?;
        let history = self
            .load(key)?
            .ok_or_else(|| ReleaseError::NotFound { key: key.clone() })?;

        std::fs::remove_file(self.history_path(key)?)?;

        // Clean up empty namespace directory
        let ns_dir = self.base_dir.join(&key.namespace);
        if ns_dir.exists() && std::fs::read_dir(&ns_dir)?.next().is_none() {
            let _ = std::fs::remove_dir(&ns_dir);
        }

        Ok(history.releases())
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<Release>> {
        Ok(self
            .all_histories(namespace)?
            .iter()
            .filter_map(History::head)
            .collect())
    }
}
