//! Render context

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::pack::PackMetadata;
use crate::release::ReleaseInfo;
use crate::values::Values;

/// Per-render inputs besides the package and its values.
///
/// Built fresh for every render call and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderContext {
    pub release: ReleaseInfo,
    pub capabilities: Capabilities,
}

impl RenderContext {
    pub fn new(release: ReleaseInfo, capabilities: Capabilities) -> Self {
        Self {
            release,
            capabilities,
        }
    }
}

/// Everything a template can see: `values`, `release`, `pack`, `capabilities`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateContext {
    /// User values (merged)
    pub values: JsonValue,

    pub release: ReleaseInfo,

    pub pack: PackInfo,

    pub capabilities: Capabilities,
}

/// Pack information for templates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackInfo {
    pub name: String,
    pub version: String,
    pub app_version: Option<String>,
}

impl From<&PackMetadata> for PackInfo {
    fn from(meta: &PackMetadata) -> Self {
        Self {
            name: meta.name.clone(),
            version: meta.version.to_string(),
            app_version: meta.app_version.clone(),
        }
    }
}

/// Cluster capabilities
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    /// Kubernetes version
    pub kube_version: KubeVersion,

    /// Available API versions (`v1`, `apps/v1`, ...)
    pub api_versions: Vec<String>,
}

impl Capabilities {
    pub fn new(kube_version: KubeVersion, api_versions: Vec<String>) -> Self {
        Self {
            kube_version,
            api_versions,
        }
    }

    /// Whether the cluster serves `api_version`.
    ///
    /// An empty capability set means "unknown" and accepts everything.
    pub fn supports(&self, api_version: &str) -> bool {
        self.api_versions.is_empty() || self.api_versions.iter().any(|v| v == api_version)
    }
}

/// Kubernetes version info
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeVersion {
    pub version: String,
    pub major: String,
    pub minor: String,
}

impl Default for KubeVersion {
    fn default() -> Self {
        Self::new("1.31.0")
    }
}

impl KubeVersion {
    pub fn new(version: &str) -> Self {
        let version = version.trim_start_matches('v');
        let mut parts = version.split('.');
        let major = parts.next().filter(|s| !s.is_empty()).unwrap_or("1");
        let minor = parts.next().unwrap_or("0").trim_end_matches('+');

        Self {
            version: format!("v{}", version),
            major: major.to_string(),
            minor: minor.to_string(),
        }
    }
}

impl TemplateContext {
    pub fn new(values: Values, pack: &PackMetadata, render: &RenderContext) -> Self {
        Self {
            values: values.into_inner(),
            release: render.release.clone(),
            pack: PackInfo::from(pack),
            capabilities: render.capabilities.clone(),
        }
    }

    /// Convert to minijinja-compatible context
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}
