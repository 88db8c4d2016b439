//! Release identity and status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Unique key of a release: (namespace, name)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReleaseKey {
    pub namespace: String,
    pub name: String,
}

impl ReleaseKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Check both parts are DNS-1123 labels, so they are safe as cluster
    /// names and as path components
    pub fn validate(&self) -> Result<()> {
        validate_namespace(&self.namespace)?;
        check_label("release name", &self.name, MAX_NAME_LEN)
    }
}

pub fn validate_namespace(namespace: &str) -> Result<()> {
    check_label("namespace", namespace, MAX_NAMESPACE_LEN)
}

/// Release names leave room for suffixes on generated object names
pub const MAX_NAME_LEN: usize = 53;
pub const MAX_NAMESPACE_LEN: usize = 63;

fn check_label(what: &str, value: &str, max: usize) -> Result<()> {
    let invalid = |reason: &str| CoreError::InvalidName {
        message: format!("{} '{}' {}", what, value, reason),
    };

    if value.is_empty() {
        return Err(invalid("is empty"));
    }
    if value.len() > max {
        return Err(invalid(&format!("is longer than {} characters", max)));
    }
    if !value
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        return Err(invalid("may only contain lowercase letters, digits and '-'"));
    }
    if value.starts_with('-') || value.ends_with('-') {
        return Err(invalid("must start and end with a letter or digit"));
    }
    Ok(())
}

impl std::fmt::Display for ReleaseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Release status
///
/// `Superseded` only appears on non-head entries of a history listing, and
/// `Deleted` only on the snapshot handed back by a delete.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseStatus {
    #[default]
    Deployed,
    Stopped,
    Failed,
    Superseded,
    Deleted,
}

impl std::fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Deployed => "deployed",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Superseded => "superseded",
            Self::Deleted => "deleted",
        };
        write!(f, "{}", s)
    }
}

/// Release information for templates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseInfo {
    pub name: String,

    pub namespace: String,

    pub revision: u32,

    pub is_install: bool,

    pub is_upgrade: bool,

    /// Render timestamp
    pub time: DateTime<Utc>,

    /// Always "Keel"
    pub service: String,
}

impl ReleaseInfo {
    /// Release info for a first install (revision 1)
    pub fn for_install(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            revision: 1,
            is_install: true,
            is_upgrade: false,
            time: Utc::now(),
            service: "Keel".to_string(),
        }
    }

    /// Release info for an upgrade to `revision`
    pub fn for_upgrade(name: &str, namespace: &str, revision: u32) -> Self {
        Self {
            revision,
            is_install: false,
            is_upgrade: true,
            ..Self::for_install(name, namespace)
        }
    }

    pub fn key(&self) -> ReleaseKey {
        ReleaseKey::new(&self.namespace, &self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display() {
        assert_eq!(ReleaseKey::new("prod", "app1").to_string(), "prod/app1");
    }

    #[test]
    fn test_key_validation() {
        assert!(ReleaseKey::new("default", "app1").validate().is_ok());
        assert!(ReleaseKey::new("kube-system", "a").validate().is_ok());
        assert!(ReleaseKey::new("default", "x".repeat(53)).validate().is_ok());

        for (namespace, name) in [
            ("default", "../../escaped"),
            ("../etc", "app1"),
            ("default", "a/b"),
            ("default", ""),
            ("", "app1"),
            ("default", "App1"),
            ("default", "-app"),
            ("default", "app-"),
            ("default", "app.1"),
        ] {
            let err = ReleaseKey::new(namespace, name).validate().unwrap_err();
            assert!(matches!(err, CoreError::InvalidName { .. }), "{namespace}/{name}");
        }

        let err = ReleaseKey::new("default", "x".repeat(54)).validate().unwrap_err();
        assert!(err.to_string().contains("53"));
        assert!(ReleaseKey::new("n".repeat(64), "app1").validate().is_err());
    }

    #[test]
    fn test_upgrade_info() {
        let info = ReleaseInfo::for_upgrade("app1", "prod", 4);
        assert_eq!(info.revision, 4);
        assert!(info.is_upgrade);
        assert!(!info.is_install);
        assert_eq!(info.key(), ReleaseKey::new("prod", "app1"));
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&ReleaseStatus::Stopped).unwrap();
        assert_eq!(json, "\"stopped\"");
        assert_eq!(ReleaseStatus::Failed.to_string(), "failed");
    }
}
