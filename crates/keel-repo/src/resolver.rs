//! Scheme-dispatching resolver

use async_trait::async_trait;
use keel_core::Package;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::ArchiveCache;
use crate::error::{RepoError, Result};
use crate::file::FileSource;
use crate::http::{DEFAULT_TIMEOUT, HttpSource};
use crate::source::PackageSource;

/// Routes a fetch to the source matching the location scheme.
///
/// `http://` and `https://` go to an index repository, `file://` and plain
/// paths to the local filesystem.
pub struct Resolver {
    http: HttpSource,
    file: FileSource,
}

impl Resolver {
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: HttpSource::new(timeout)?,
            file: FileSource::new(),
        })
    }

    /// Cache HTTP downloads in `cache`
    pub fn with_cache(mut self, cache: Arc<ArchiveCache>) -> Self {
        self.http = self.http.with_cache(cache);
        self
    }

    fn route(&self, location: &str) -> Result<&dyn PackageSource> {
        match location.split_once("://").map(|(scheme, _)| scheme) {
            Some("http") | Some("https") => Ok(&self.http),
            Some("file") | None => Ok(&self.file),
            Some(other) => Err(RepoError::InvalidLocation {
                location: location.to_string(),
                reason: format!("unsupported scheme '{}'", other),
            }),
        }
    }
}

#[async_trait]
impl PackageSource for Resolver {
    async fn fetch(&self, location: &str, name: &str, constraint: &str) -> Result<Package> {
        tracing::debug!(%location, pack = %name, %constraint, "resolving package");
        self.route(location)?.fetch(location, name, constraint).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let resolver = Resolver::new().unwrap();
        let err = resolver
            .fetch("oci://registry.example.com/packs", "app1", "")
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::InvalidLocation { .. }));
    }

    #[tokio::test]
    async fn test_plain_path_goes_to_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Pack.yaml"),
            "apiVersion: keel/v1\nmetadata:\n  name: app1\n  version: 1.0.0\n",
        )
        .unwrap();

        let resolver = Resolver::new().unwrap();
        let package = resolver
            .fetch(dir.path().to_str().unwrap(), "app1", "")
            .await
            .unwrap();
        assert_eq!(package.name(), "app1");
    }

    #[tokio::test]
    async fn test_unreachable_http() {
        // nothing listens on port 9 locally
        let resolver = Resolver::with_timeout(Duration::from_secs(2)).unwrap();
        let err = resolver
            .fetch("http://127.0.0.1:9", "app1", "")
            .await
            .unwrap_err();
        assert!(err.is_unreachable());
    }
}
