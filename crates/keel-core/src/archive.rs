//! `.tgz` package archives
//!
//! Archives hold a pack either at the archive root or nested one directory
//! deep (`<name>/Pack.yaml`), which is what Helm-style repositories publish.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use tar::{Archive, Builder};

use crate::error::{CoreError, Result};

/// Create a tar.gz archive from a pack directory, nesting it under `prefix`
pub fn create_archive(pack_dir: &Path, prefix: &str, output: &Path) -> Result<PathBuf> {
    let file = File::create(output)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = Builder::new(encoder);

    builder.append_dir_all(prefix, pack_dir)?;

    let encoder = builder.into_inner()?;
    encoder.finish()?;

    Ok(output.to_path_buf())
}

/// Extract an archive to a destination directory.
///
/// Entries with absolute paths or `..` components are rejected.
pub fn extract_archive(archive_path: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive_path)?;
    extract_reader(GzDecoder::new(file), dest)
}

/// Extract an in-memory archive to a destination directory
pub fn extract_bytes(bytes: &[u8], dest: &Path) -> Result<()> {
    extract_reader(GzDecoder::new(bytes), dest)
}

fn extract_reader<R: std::io::Read>(reader: R, dest: &Path) -> Result<()> {
    let mut archive = Archive::new(reader);
    std::fs::create_dir_all(dest)?;

    let entries = archive.entries().map_err(archive_error)?;
    for entry in entries {
        let mut entry = entry.map_err(archive_error)?;
        let path = entry.path().map_err(archive_error)?.into_owned();

        if path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            return Err(CoreError::Archive {
                message: format!("refusing to extract unsafe path: {}", path.display()),
            });
        }

        entry.unpack_in(dest).map_err(archive_error)?;
    }

    Ok(())
}

/// Find the directory holding `Pack.yaml` inside an extracted archive
pub fn locate_pack_root(dir: &Path) -> Result<PathBuf> {
    if dir.join("Pack.yaml").exists() {
        return Ok(dir.to_path_buf());
    }

    let mut candidates = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() && path.join("Pack.yaml").exists() {
            candidates.push(path);
        }
    }

    match candidates.len() {
        1 => Ok(candidates.remove(0)),
        0 => Err(CoreError::InvalidPackage {
            message: "archive does not contain a Pack.yaml".to_string(),
        }),
        n => Err(CoreError::InvalidPackage {
            message: format!("archive contains {} packs, expected one", n),
        }),
    }
}

fn archive_error(e: std::io::Error) -> CoreError {
    CoreError::Archive {
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::Package;

    fn create_test_pack(dir: &Path) {
        std::fs::create_dir_all(dir.join("templates")).unwrap();
        std::fs::write(
            dir.join("Pack.yaml"),
            "apiVersion: keel/v1\nmetadata:\n  name: demo\n  version: 1.2.0\n",
        )
        .unwrap();
        std::fs::write(dir.join("values.yaml"), "replica: 1\n").unwrap();
        std::fs::write(dir.join("templates/cm.yaml"), "kind: ConfigMap\n").unwrap();
    }

    #[test]
    fn test_create_and_extract_archive() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        create_test_pack(src.path());

        let archive = create_archive(src.path(), "demo", &out.path().join("demo-1.2.0.tgz")).unwrap();

        let dest = tempfile::tempdir().unwrap();
        extract_archive(&archive, dest.path()).unwrap();

        let root = locate_pack_root(dest.path()).unwrap();
        assert_eq!(root, dest.path().join("demo"));

        let package = Package::load(&root).unwrap();
        assert_eq!(package.name(), "demo");
        assert!(package.templates.contains_key("demo/templates/cm.yaml"));
    }

    #[test]
    fn test_locate_root_without_pack() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("unrelated")).unwrap();
        assert!(locate_pack_root(dir.path()).is_err());
    }

    #[test]
    fn test_extract_garbage() {
        let dest = tempfile::tempdir().unwrap();
        assert!(extract_bytes(b"definitely not gzip", dest.path()).is_err());
    }
}
