//! Repository index types and version selection
//!
//! Helm-compatible `index.yaml` format.

use chrono::{DateTime, Utc};
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{RepoError, Result};

/// Repository index (Helm-compatible)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryIndex {
    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "Utc::now")]
    pub generated: DateTime<Utc>,

    /// Packs indexed by name
    #[serde(default)]
    pub entries: BTreeMap<String, Vec<PackEntry>>,
}

fn default_api_version() -> String {
    "v1".to_string()
}

impl Default for RepositoryIndex {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            generated: Utc::now(),
            entries: BTreeMap::new(),
        }
    }
}

impl RepositoryIndex {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| RepoError::IndexParseError {
            message: e.to_string(),
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let yaml = std::str::from_utf8(bytes).map_err(|e| RepoError::IndexParseError {
            message: format!("Invalid UTF-8: {}", e),
        })?;
        Self::from_yaml(yaml)
    }

    pub fn add_entry(&mut self, entry: PackEntry) {
        self.entries
            .entry(entry.name.clone())
            .or_default()
            .push(entry);
    }

    /// Highest version of `name` satisfying `constraint`
    pub fn find_best_match(&self, name: &str, constraint: &VersionConstraint) -> Result<&PackEntry> {
        let entries = self
            .entries
            .get(name)
            .ok_or_else(|| RepoError::PackNotFound {
                name: name.to_string(),
                repo: "index".to_string(),
            })?;

        best_match(
            entries.iter().filter_map(|e| e.parsed_version().map(|v| (v, e))),
            name,
            constraint,
        )
    }
}

/// Pick the highest version accepted by `constraint` among `(version, item)` pairs
pub fn best_match<'a, T, I>(candidates: I, name: &str, constraint: &VersionConstraint) -> Result<&'a T>
where
    I: IntoIterator<Item = (Version, &'a T)>,
{
    let mut available = Vec::new();
    let mut best: Option<(Version, &'a T)> = None;

    for (version, item) in candidates {
        available.push(version.to_string());
        if !constraint.matches(&version) {
            continue;
        }
        if best.as_ref().is_none_or(|(current, _)| version > *current) {
            best = Some((version, item));
        }
    }

    best.map(|(_, item)| item)
        .ok_or_else(|| RepoError::UnsatisfiableConstraint {
            name: name.to_string(),
            constraint: constraint.to_string(),
            available: if available.is_empty() {
                "none".to_string()
            } else {
                available.join(", ")
            },
        })
}

/// Pack entry in the index
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackEntry {
    pub name: String,

    /// Pack version (semver)
    pub version: String,

    #[serde(default)]
    pub app_version: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// URLs to download the pack archive, absolute or relative to the repository
    #[serde(default)]
    pub urls: Vec<String>,

    /// SHA256 digest of the archive
    #[serde(default)]
    pub digest: Option<String>,

    #[serde(default)]
    pub created: Option<DateTime<Utc>>,

    #[serde(default)]
    pub deprecated: bool,
}

impl PackEntry {
    /// Get the primary download URL
    pub fn download_url(&self) -> Option<&str> {
        self.urls.first().map(|s| s.as_str())
    }

    pub fn parsed_version(&self) -> Option<Version> {
        Version::parse(self.version.trim_start_matches('v')).ok()
    }
}

/// A caller's version constraint.
///
/// Empty, `*` and `latest` accept any version. A bare version (`1.0.0`)
/// is an exact pin, as Helm treats `--version 1.0.0`. Anything else is a
/// SemVer requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionConstraint {
    Any,
    Exact(Version),
    Req(VersionReq),
}

impl VersionConstraint {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() || raw == "*" || raw.eq_ignore_ascii_case("latest") {
            return Ok(Self::Any);
        }

        if let Ok(version) = Version::parse(raw.trim_start_matches('v')) {
            return Ok(Self::Exact(version));
        }

        VersionReq::parse(raw)
            .map(Self::Req)
            .map_err(|e| RepoError::InvalidConstraint {
                constraint: raw.to_string(),
                message: e.to_string(),
            })
    }

    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(pinned) => pinned == version,
            Self::Req(req) => req.matches(version),
        }
    }
}

impl std::fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Any => write!(f, "*"),
            Self::Exact(version) => write!(f, "={}", version),
            Self::Req(req) => write!(f, "{}", req),
        }
    }
}
