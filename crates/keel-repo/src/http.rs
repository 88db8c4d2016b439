//! HTTP repository source
//!
//! Supports Helm-style HTTP repositories with an `index.yaml`.

use async_trait::async_trait;
use keel_core::Package;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{ArchiveCache, sha256_hex};
use crate::error::{RepoError, Result};
use crate::index::{PackEntry, RepositoryIndex, VersionConstraint};
use crate::source::{PackageSource, ensure_named, unpack_package};

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Package source backed by an HTTP repository
pub struct HttpSource {
    client: reqwest::Client,
    cache: Option<Arc<ArchiveCache>>,
}

impl HttpSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("keel/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            cache: None,
        })
    }

    /// Keep downloaded archives in `cache`
    pub fn with_cache(mut self, cache: Arc<ArchiveCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Fetch and parse `<location>/index.yaml`
    pub async fn fetch_index(&self, location: &str) -> Result<RepositoryIndex> {
        let index_url = format!("{}/index.yaml", location.trim_end_matches('/'));
        let response = self.client.get(&index_url).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(RepoError::IndexNotFound { url: index_url });
        }
        let response = response.error_for_status()?;
        RepositoryIndex::from_bytes(&response.bytes().await?)
    }

    /// Download the archive for `entry`, verifying the index digest when present
    pub async fn download(&self, location: &str, entry: &PackEntry) -> Result<Vec<u8>> {
        let url = entry.download_url().ok_or_else(|| RepoError::PackNotFound {
            name: entry.name.clone(),
            repo: location.to_string(),
        })?;
        let full_url = resolve_url(location, url)?;

        tracing::debug!(url = %full_url, "downloading archive");
        let response = self.client.get(full_url).send().await?.error_for_status()?;
        let data = response.bytes().await?.to_vec();

        if let Some(expected) = &entry.digest {
            let actual = sha256_hex(&data);
            if !digest_matches(expected, &actual) {
                return Err(RepoError::IntegrityCheckFailed {
                    name: entry.name.clone(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        Ok(data)
    }
}

#[async_trait]
impl PackageSource for HttpSource {
    async fn fetch(&self, location: &str, name: &str, constraint: &str) -> Result<Package> {
        let constraint = VersionConstraint::parse(constraint)?;
        let index = self.fetch_index(location).await?;
        let entry = index
            .find_best_match(name, &constraint)
            .map_err(|e| match e {
                RepoError::PackNotFound { name, .. } => RepoError::PackNotFound {
                    name,
                    repo: location.to_string(),
                },
                other => other,
            })?;

        tracing::debug!(pack = %name, version = %entry.version, %location, "resolved pack");

        let cached = match &self.cache {
            Some(cache) => cache.get(location, name, &entry.version)?,
            None => None,
        };

        let data = match cached {
            Some(data) => data,
            None => {
                let data = self.download(location, entry).await?;
                if let Some(cache) = &self.cache {
                    if let Err(e) = cache.put(location, name, &entry.version, &data) {
                        tracing::warn!(pack = %name, "failed to cache archive: {}", e);
                    }
                }
                data
            }
        };

        let package = unpack_package(data).await?;
        ensure_named(&package, name, location)?;
        Ok(package)
    }
}

/// Resolve an index URL that may be relative to the repository
fn resolve_url(location: &str, url: &str) -> Result<url::Url> {
    let invalid = |reason: String| RepoError::InvalidLocation {
        location: location.to_string(),
        reason,
    };

    if let Ok(absolute) = url::Url::parse(url) {
        return Ok(absolute);
    }

    let base = url::Url::parse(&format!("{}/", location.trim_end_matches('/')))
        .map_err(|e| invalid(e.to_string()))?;
    base.join(url).map_err(|e| invalid(e.to_string()))
}

/// Check if two digests match (supports `sha256:` / `sha256-` prefixes)
fn digest_matches(expected: &str, actual: &str) -> bool {
    let normalize = |d: &str| {
        d.trim()
            .to_lowercase()
            .replace("sha256:", "")
            .replace("sha256-", "")
    };
    normalize(expected) == normalize(actual)
}
