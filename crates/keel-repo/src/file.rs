//! Local repository source
//!
//! A local repository is a directory holding pack directories (`<name>/`
//! with a `Pack.yaml`) and/or archives (`<name>-<version>.tgz`). A location
//! pointing directly at a pack directory is accepted too.

use async_trait::async_trait;
use keel_core::{Pack, Package};
use semver::Version;
use std::path::{Path, PathBuf};

use crate::error::{RepoError, Result};
use crate::index::{VersionConstraint, best_match};
use crate::source::{PackageSource, ensure_named, unpack_package};

/// Package source reading from the local filesystem
#[derive(Debug, Clone, Default)]
pub struct FileSource;

#[derive(Debug, Clone)]
enum Candidate {
    Directory(PathBuf),
    Archive(PathBuf),
}

impl FileSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PackageSource for FileSource {
    async fn fetch(&self, location: &str, name: &str, constraint: &str) -> Result<Package> {
        let constraint = VersionConstraint::parse(constraint)?;
        let root = local_path(location)?;

        let scan_root = root.clone();
        let scan_name = name.to_string();
        let candidates = tokio::task::spawn_blocking(move || scan(&scan_root, &scan_name))
            .await
            .map_err(|e| RepoError::Io(std::io::Error::other(e)))??;

        if candidates.is_empty() {
            return Err(RepoError::PackNotFound {
                name: name.to_string(),
                repo: location.to_string(),
            });
        }

        let chosen = best_match(
            candidates.iter().map(|(v, c)| (v.clone(), c)),
            name,
            &constraint,
        )?
        .clone();

        tracing::debug!(pack = %name, %location, candidate = ?chosen, "resolved local pack");

        let package = match chosen {
            Candidate::Directory(dir) => tokio::task::spawn_blocking(move || Package::load(dir))
                .await
                .map_err(|e| RepoError::Io(std::io::Error::other(e)))??,
            Candidate::Archive(path) => unpack_package(tokio::fs::read(&path).await?).await?,
        };

        ensure_named(&package, name, location)?;
        Ok(package)
    }
}

/// Turn a `file://` URL or plain path into a directory path
fn local_path(location: &str) -> Result<PathBuf> {
    let path = match location.strip_prefix("file://") {
        Some(rest) => PathBuf::from(rest),
        None => PathBuf::from(location),
    };

    if !path.is_dir() {
        return Err(RepoError::InvalidLocation {
            location: location.to_string(),
            reason: "not a directory".to_string(),
        });
    }
    Ok(path)
}

fn scan(root: &Path, name: &str) -> Result<Vec<(Version, Candidate)>> {
    let mut found = Vec::new();

    if let Some(version) = pack_version(root, name) {
        found.push((version, Candidate::Directory(root.to_path_buf())));
    }

    let nested = root.join(name);
    if let Some(version) = pack_version(&nested, name) {
        found.push((version, Candidate::Directory(nested)));
    }

    let prefix = format!("{}-", name);
    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        let Some(file_name) = path.file_name().and_then(|f| f.to_str()) else {
            continue;
        };
        let Some(version) = file_name
            .strip_suffix(".tgz")
            .and_then(|stem| stem.strip_prefix(&prefix))
            .and_then(|v| Version::parse(v).ok())
        else {
            continue;
        };
        if path.is_file() {
            found.push((version, Candidate::Archive(path)));
        }
    }

    Ok(found)
}

/// Version of the pack in `dir` if it is a pack called `name`
fn pack_version(dir: &Path, name: &str) -> Option<Version> {
    let content = std::fs::read_to_string(dir.join("Pack.yaml")).ok()?;
    match Pack::parse(&content) {
        Ok(pack) if pack.metadata.name == name => Some(pack.metadata.version),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), "skipping invalid Pack.yaml: {}", e);
            None
        }
    }
}
