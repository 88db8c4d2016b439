//! Package definition and loading

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{CoreError, Result};
use crate::values::Values;

/// API version accepted in `Pack.yaml`
pub const API_VERSION: &str = "keel/v1";

/// Template file extensions picked up from `templates/`
const TEMPLATE_EXTENSIONS: &[&str] = &["yaml", "yml", "j2", "jinja2", "txt", "json", "tpl"];

/// Contents of a `Pack.yaml`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pack {
    /// API version (keel/v1)
    pub api_version: String,

    /// Pack metadata
    pub metadata: PackMetadata,

    /// Engine requirement
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Pack metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PackMetadata {
    /// Pack name (required)
    pub name: String,

    /// Pack version (required, SemVer)
    #[serde(with = "version_serde")]
    pub version: Version,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
}

/// Which template engine a pack wants and which engine versions it tolerates
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Explicit engine name; the default engine is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Minimum compatible engine version, or a full SemVer requirement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires: Option<String>,

    /// Fail on undefined variables
    #[serde(default = "default_true")]
    pub strict: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: None,
            requires: None,
            strict: true,
        }
    }
}

impl EngineConfig {
    /// Parse `requires` into a version requirement.
    ///
    /// A bare version (`0.3.0`) means "this version or newer"; anything else
    /// is parsed as a SemVer requirement (`^0.3`, `>=0.2, <1`).
    pub fn requirement(&self) -> Result<Option<VersionReq>> {
        let raw = match self.requires.as_deref().map(str::trim) {
            None | Some("") => return Ok(None),
            Some(raw) => raw,
        };

        if Version::parse(raw).is_ok() {
            return Ok(Some(VersionReq::parse(&format!(">={raw}"))?));
        }

        VersionReq::parse(raw).map(Some).map_err(|e| CoreError::InvalidPackage {
            message: format!("invalid engine requirement '{}': {}", raw, e),
        })
    }
}

fn default_true() -> bool {
    true
}

/// A fetched package: metadata, default values and raw template sources.
///
/// Templates are keyed by `<pack>/templates/<relative path>`, which is also
/// the document name reported after rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    pub pack: Pack,
    pub default_values: Values,
    pub templates: BTreeMap<String, String>,
}

impl Package {
    /// Build a package from already-loaded parts
    pub fn new(pack: Pack, default_values: Values, templates: BTreeMap<String, String>) -> Self {
        Self {
            pack,
            default_values,
            templates,
        }
    }

    pub fn name(&self) -> &str {
        &self.pack.metadata.name
    }

    pub fn version(&self) -> &Version {
        &self.pack.metadata.version
    }

    pub fn metadata(&self) -> &PackMetadata {
        &self.pack.metadata
    }

    /// Load a package from an unpacked directory
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let root = path.as_ref();

        if !root.is_dir() {
            return Err(CoreError::PackageNotFound {
                path: root.display().to_string(),
            });
        }

        let pack_file = root.join("Pack.yaml");
        if !pack_file.exists() {
            return Err(CoreError::InvalidPackage {
                message: format!("Pack.yaml not found in {}", root.display()),
            });
        }

        let pack = Pack::parse(&std::fs::read_to_string(&pack_file)?)?;

        let values_path = root.join("values.yaml");
        let default_values = if values_path.exists() {
            Values::from_file(&values_path)?
        } else {
            Values::new()
        };

        let templates = load_templates(root, &pack.metadata.name)?;

        tracing::debug!(
            pack = %pack.metadata.name,
            version = %pack.metadata.version,
            templates = templates.len(),
            "loaded package"
        );

        Ok(Self::new(pack, default_values, templates))
    }
}

impl Pack {
    /// Parse and validate `Pack.yaml` content
    pub fn parse(content: &str) -> Result<Self> {
        let pack: Pack = serde_yaml::from_str(content)?;

        if pack.api_version != API_VERSION {
            return Err(CoreError::InvalidPackage {
                message: format!(
                    "Unsupported API version: {}. Expected: {}",
                    pack.api_version, API_VERSION
                ),
            });
        }

        if pack.metadata.name.trim().is_empty() {
            return Err(CoreError::InvalidPackage {
                message: "metadata.name must not be empty".to_string(),
            });
        }

        Ok(pack)
    }
}

fn load_templates(root: &Path, pack_name: &str) -> Result<BTreeMap<String, String>> {
    let templates_dir = root.join("templates");
    let mut templates = BTreeMap::new();

    if !templates_dir.exists() {
        return Ok(templates);
    }

    for entry in walkdir::WalkDir::new(&templates_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| CoreError::InvalidPackage {
            message: format!("cannot read templates: {}", e),
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let wanted = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .is_some_and(|ext| TEMPLATE_EXTENSIONS.contains(&ext.as_str()));
        if !wanted {
            continue;
        }

        let rel = path
            .strip_prefix(&templates_dir)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        templates.insert(
            format!("{}/templates/{}", pack_name, rel),
            std::fs::read_to_string(path)?,
        );
    }

    Ok(templates)
}

mod version_serde {
    use semver::Version;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(version: &Version, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&version.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Version, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Version::parse(&s).map_err(serde::de::Error::custom)
    }
}
