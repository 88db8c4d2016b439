//! The package source capability and archive unpacking

use async_trait::async_trait;
use keel_core::Package;
use keel_core::archive::{extract_bytes, locate_pack_root};
use std::path::PathBuf;

use crate::error::{RepoError, Result};

/// Something that can produce a [`Package`] from a location, a name and a
/// version constraint.
///
/// Implementations never touch the cluster or the release store.
#[async_trait]
pub trait PackageSource: Send + Sync {
    async fn fetch(&self, location: &str, name: &str, constraint: &str) -> Result<Package>;
}

/// Unpack a `.tgz` archive into a scratch directory and load the pack in it.
///
/// The scratch directory is removed when this returns, on success and on
/// every error path.
pub async fn unpack_package(data: Vec<u8>) -> Result<Package> {
    unpack_package_in(data, None).await
}

/// Like [`unpack_package`], with the scratch directory created under `parent`
pub async fn unpack_package_in(data: Vec<u8>, parent: Option<PathBuf>) -> Result<Package> {
    tokio::task::spawn_blocking(move || -> Result<Package> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("keel-unpack-");
        let scratch = match &parent {
            Some(parent) => builder.tempdir_in(parent)?,
            None => builder.tempdir()?,
        };
        extract_bytes(&data, scratch.path())?;
        let root = locate_pack_root(scratch.path())?;
        Ok(Package::load(root)?)
    })
    .await
    .map_err(|e| RepoError::Io(std::io::Error::other(e)))?
}

/// Check an unpacked package against what was asked for
pub(crate) fn ensure_named(package: &Package, name: &str, origin: &str) -> Result<()> {
    if package.name() == name {
        return Ok(());
    }
    Err(RepoError::PackNotFound {
        name: name.to_string(),
        repo: format!("{} (archive contains '{}')", origin, package.name()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn archive_bytes() -> Vec<u8> {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("templates")).unwrap();
        std::fs::write(
            src.path().join("Pack.yaml"),
            "apiVersion: keel/v1\nmetadata:\n  name: app1\n  version: 1.0.0\n",
        )
        .unwrap();
        std::fs::write(src.path().join("templates/cm.yaml"), "kind: ConfigMap\n").unwrap();

        let out = tempfile::tempdir().unwrap();
        let path = keel_core::archive::create_archive(src.path(), "app1", &out.path().join("a.tgz"))
            .unwrap();
        std::fs::read(path).unwrap()
    }

    fn entries(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn test_unpack_package() {
        let scratch = tempfile::tempdir().unwrap();
        let package = unpack_package_in(archive_bytes(), Some(scratch.path().to_path_buf()))
            .await
            .unwrap();

        assert_eq!(package.name(), "app1");
        assert!(package.templates.contains_key("app1/templates/cm.yaml"));
        assert!(ensure_named(&package, "app1", "test").is_ok());
        assert!(ensure_named(&package, "other", "test").is_err());
        assert_eq!(entries(scratch.path()), 0);
    }

    #[tokio::test]
    async fn test_scratch_removed_on_error() {
        let scratch = tempfile::tempdir().unwrap();
        let err = unpack_package_in(b"not an archive".to_vec(), Some(scratch.path().to_path_buf()))
            .await
            .unwrap_err();

        assert!(matches!(err, RepoError::InvalidPackage(_)));
        assert_eq!(entries(scratch.path()), 0);
    }
}
