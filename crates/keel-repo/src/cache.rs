//! Checksummed archive cache
//!
//! Downloaded archives are written under `<root>/archives/` and indexed in a
//! SQLite database with their SHA-256 digest. Every hit is re-hashed; an
//! entry whose file is missing or whose content no longer matches is evicted
//! and reported as a miss, so a corrupted cache never produces content.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{RepoError, Result};

/// SQLite-indexed cache of package archives
pub struct ArchiveCache {
    root: PathBuf,
    conn: Mutex<Connection>,
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: u64,
}

impl ArchiveCache {
    /// Open or create a cache rooted at `root`
    pub fn open_at(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root.join("archives"))?;
        let db_path = root.join("cache.db");

        let conn = match Connection::open(&db_path) {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!("Cache index corrupted, recreating: {}", e);
                if db_path.exists() {
                    std::fs::remove_file(&db_path)?;
                }
                Connection::open(&db_path)?
            }
        };

        let cache = Self {
            root: root.to_path_buf(),
            conn: Mutex::new(conn),
        };
        cache.init()?;
        Ok(cache)
    }

    /// Default cache location (`<cache dir>/keel`)
    pub fn default_root() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir().ok_or_else(|| RepoError::CacheError {
            message: "Could not determine cache directory".to_string(),
        })?;
        Ok(cache_dir.join("keel"))
    }

    fn init(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS archives (
                source TEXT NOT NULL,
                name TEXT NOT NULL,
                version TEXT NOT NULL,
                digest TEXT NOT NULL,
                file TEXT NOT NULL,
                size INTEGER NOT NULL,
                stored_at INTEGER NOT NULL,
                PRIMARY KEY (source, name, version)
            );
            "#,
        )?;

        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| RepoError::CacheError {
            message: "cache connection poisoned".to_string(),
        })
    }

    /// Cached archive bytes, verified against the recorded digest
    pub fn get(&self, source: &str, name: &str, version: &str) -> Result<Option<Vec<u8>>> {
        let row: Option<(String, String)> = self
            .lock()?
            .query_row(
                "SELECT digest, file FROM archives WHERE source = ?1 AND name = ?2 AND version = ?3",
                params![source, name, version],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((digest, file)) = row else {
            return Ok(None);
        };

        let path = self.root.join("archives").join(&file);
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(%name, %version, "cached archive unreadable, evicting: {}", e);
                self.evict(source, name, version)?;
                return Ok(None);
            }
        };

        if sha256_hex(&data) != digest {
            tracing::warn!(%name, %version, "cached archive digest mismatch, evicting");
            self.evict(source, name, version)?;
            return Ok(None);
        }

        tracing::debug!(%name, %version, "archive cache hit");
        Ok(Some(data))
    }

    /// Store an archive, replacing any previous entry for the same key
    pub fn put(&self, source: &str, name: &str, version: &str, data: &[u8]) -> Result<()> {
        let digest = sha256_hex(data);
        let file = format!("{}-{}-{}.tgz", name, version, &digest[..16]);
        let path = self.root.join("archives").join(&file);

        // readers must never observe a partial archive
        let tmp = path.with_extension("tgz.partial");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &path)?;

        self.lock()?.execute(
            "INSERT OR REPLACE INTO archives (source, name, version, digest, file, size, stored_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                source,
                name,
                version,
                digest,
                file,
                data.len() as i64,
                Utc::now().timestamp()
            ],
        )?;

        Ok(())
    }

    /// Drop an entry and its file
    pub fn evict(&self, source: &str, name: &str, version: &str) -> Result<()> {
        let conn = self.lock()?;
        let file: Option<String> = conn
            .query_row(
                "SELECT file FROM archives WHERE source = ?1 AND name = ?2 AND version = ?3",
                params![source, name, version],
                |row| row.get(0),
            )
            .optional()?;

        conn.execute(
            "DELETE FROM archives WHERE source = ?1 AND name = ?2 AND version = ?3",
            params![source, name, version],
        )?;

        if let Some(file) = file {
            let path = self.root.join("archives").join(file);
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }

        Ok(())
    }

    /// Path an entry's archive is stored at, if cached
    #[cfg(test)]
    pub(crate) fn archive_path(&self, source: &str, name: &str, version: &str) -> Result<Option<PathBuf>> {
        let file: Option<String> = self
            .lock()?
            .query_row(
                "SELECT file FROM archives WHERE source = ?1 AND name = ?2 AND version = ?3",
                params![source, name, version],
                |row| row.get(0),
            )
            .optional()?;
        Ok(file.map(|f| self.root.join("archives").join(f)))
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let (entries, total_bytes): (i64, i64) = self.lock()?.query_row(
            "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM archives",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(CacheStats {
            entries: entries as usize,
            total_bytes: total_bytes as u64,
        })
    }
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "https://charts.example.com";

    #[test]
    fn test_put_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArchiveCache::open_at(dir.path()).unwrap();

        assert!(cache.get(SOURCE, "app1", "1.0.0").unwrap().is_none());

        cache.put(SOURCE, "app1", "1.0.0", b"archive-bytes").unwrap();
        let hit = cache.get(SOURCE, "app1", "1.0.0").unwrap();
        assert_eq!(hit.as_deref(), Some(&b"archive-bytes"[..]));

        let stats = cache.stats().unwrap();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.total_bytes, 13);
    }

    #[test]
    fn test_corrupted_entry_is_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArchiveCache::open_at(dir.path()).unwrap();
        cache.put(SOURCE, "app1", "1.0.0", b"good").unwrap();

        let path = cache.archive_path(SOURCE, "app1", "1.0.0").unwrap().unwrap();
        std::fs::write(&path, b"tampered").unwrap();

        assert!(cache.get(SOURCE, "app1", "1.0.0").unwrap().is_none());
        assert_eq!(cache.stats().unwrap().entries, 0);
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_file_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArchiveCache::open_at(dir.path()).unwrap();
        cache.put(SOURCE, "app1", "1.0.0", b"good").unwrap();

        let path = cache.archive_path(SOURCE, "app1", "1.0.0").unwrap().unwrap();
        std::fs::remove_file(path).unwrap();

        assert!(cache.get(SOURCE, "app1", "1.0.0").unwrap().is_none());
        assert_eq!(cache.stats().unwrap().entries, 0);
    }

    #[test]
    fn test_sources_are_separate() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ArchiveCache::open_at(dir.path()).unwrap();
        cache.put(SOURCE, "app1", "1.0.0", b"one").unwrap();

        assert!(cache.get("https://other.example.com", "app1", "1.0.0").unwrap().is_none());
    }

    #[test]
    fn test_reopen_keeps_entries() {
        let dir = tempfile::tempdir().unwrap();
        ArchiveCache::open_at(dir.path())
            .unwrap()
            .put(SOURCE, "app1", "2.0.0", b"two")
            .unwrap();

        let reopened = ArchiveCache::open_at(dir.path()).unwrap();
        assert!(reopened.get(SOURCE, "app1", "2.0.0").unwrap().is_some());
    }
}
