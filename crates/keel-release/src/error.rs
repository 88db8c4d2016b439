//! Error types for keel-release

use keel_core::ReleaseKey;
use keel_engine::EngineError;
use keel_repo::RepoError;
use std::time::Duration;
use thiserror::Error;

use crate::release::Release;

/// Result type for release operations
pub type Result<T> = std::result::Result<T, ReleaseError>;

/// Errors returned by the lifecycle controller and its collaborators
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReleaseError {
    /// No such pack, or no version matching the constraint
    #[error("package not found: {message}")]
    PackageNotFound { message: String },

    /// The package source could not be reached
    #[error("package source unreachable: {message}")]
    SourceUnreachable { message: String },

    /// Archive or Pack.yaml malformed, or digest mismatch
    #[error("invalid package: {message}")]
    InvalidPackage { message: String },

    /// Template rendering failed
    #[error("render failed for release '{key}' revision {revision}: {source}")]
    Render {
        key: ReleaseKey,
        revision: u32,
        #[source]
        source: EngineError,
    },

    /// The package requires an engine version this build does not provide
    #[error("engine '{engine}' {actual} does not satisfy required {required}")]
    EngineIncompatible {
        engine: String,
        required: String,
        actual: String,
    },

    /// A rendered document could not be classified
    #[error("cannot classify document '{document}': {message}")]
    Classification { document: String, message: String },

    /// Namespace or release name is not a DNS-1123 label
    #[error("{message}")]
    InvalidName { message: String },

    #[error("release '{key}' already exists")]
    AlreadyExists { key: ReleaseKey },

    #[error("release '{key}' not found")]
    NotFound { key: ReleaseKey },

    #[error("release '{key}' has no revision {revision}")]
    RevisionNotFound { key: ReleaseKey, revision: u32 },

    /// The cluster was partly changed; `release` is what was committed, or
    /// what the store refused when `store_error` is set
    #[error(
        "release '{}' revision {} was only partially applied: {source}",
        .release.key(),
        .release.number()
    )]
    PartialApply {
        release: Box<Release>,
        #[source]
        source: Box<ReleaseError>,
        store_error: Option<Box<ReleaseError>>,
    },

    /// The reconciler rejected a request
    #[error("reconcile failed: {message}")]
    Reconcile { message: String },

    /// Store failure or revision conflict
    #[error("storage error: {message}")]
    Storage { message: String },

    #[error("{operation} of release '{key}' was cancelled")]
    Cancelled { key: ReleaseKey, operation: String },

    #[error("{operation} of release '{key}' timed out after {after:?}")]
    Timeout {
        key: ReleaseKey,
        operation: String,
        after: Duration,
    },
}

impl ReleaseError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Reject keys that are unsafe as object names or store paths
    pub fn check_key(key: &ReleaseKey) -> Result<()> {
        key.validate().map_err(Self::invalid_name)
    }

    pub fn check_namespace(namespace: &str) -> Result<()> {
        keel_core::validate_namespace(namespace).map_err(Self::invalid_name)
    }

    fn invalid_name(err: keel_core::CoreError) -> Self {
        Self::InvalidName {
            message: err.to_string(),
        }
    }

    pub fn reconcile(message: impl std::fmt::Display) -> Self {
        Self::Reconcile {
            message: message.to_string(),
        }
    }

    /// Build a render error, splitting out the engine version gate
    pub fn from_engine(err: EngineError, key: &ReleaseKey, revision: u32) -> Self {
        match err {
            EngineError::Incompatible {
                engine,
                required,
                actual,
            } => Self::EngineIncompatible {
                engine,
                required,
                actual,
            },
            source => Self::Render {
                key: key.clone(),
                revision,
                source,
            },
        }
    }

    /// The release committed before the failure, if any
    pub fn committed_release(&self) -> Option<&Release> {
        match self {
            Self::PartialApply {
                release,
                store_error: None,
                ..
            } => Some(release),
            _ => None,
        }
    }

    /// The snapshot of a partial apply, whether or not it was stored
    pub fn partial_release(&self) -> Option<&Release> {
        match self {
            Self::PartialApply { release, .. } => Some(release),
            _ => None,
        }
    }

    /// Why the snapshot of a partial apply could not be stored
    pub fn store_error(&self) -> Option<&ReleaseError> {
        match self {
            Self::PartialApply { store_error, .. } => store_error.as_deref(),
            _ => None,
        }
    }
}

impl From<RepoError> for ReleaseError {
    fn from(e: RepoError) -> Self {
        let message = e.to_string();
        if e.is_not_found() {
            return Self::PackageNotFound { message };
        }
        match e {
            RepoError::InvalidPackage(_)
            | RepoError::IntegrityCheckFailed { .. }
            | RepoError::IndexParseError { .. } => Self::InvalidPackage { message },
            RepoError::InvalidConstraint { .. } => Self::PackageNotFound { message },
            _ => Self::SourceUnreachable { message },
        }
    }
}

impl From<kube::Error> for ReleaseError {
    fn from(e: kube::Error) -> Self {
        Self::reconcile(e)
    }
}

impl From<serde_json::Error> for ReleaseError {
    fn from(e: serde_json::Error) -> Self {
        Self::storage(format!("serialization error: {}", e))
    }
}

impl From<std::io::Error> for ReleaseError {
    fn from(e: std::io::Error) -> Self {
        Self::storage(format!("IO error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_error_mapping() {
        let missing: ReleaseError = RepoError::PackNotFound {
            name: "app1".into(),
            repo: "file:///srv".into(),
        }
        .into();
        assert!(matches!(missing, ReleaseError::PackageNotFound { .. }));

        let down: ReleaseError = RepoError::HttpError {
            status: 502,
            message: "bad gateway".into(),
        }
        .into();
        assert!(matches!(down, ReleaseError::SourceUnreachable { .. }));

        let tampered: ReleaseError = RepoError::IntegrityCheckFailed {
            name: "app1".into(),
            expected: "a".into(),
            actual: "b".into(),
        }
        .into();
        assert!(matches!(tampered, ReleaseError::InvalidPackage { .. }));
    }

    #[test]
    fn test_engine_gate_is_split_out() {
        let key = ReleaseKey::new("default", "app1");
        let err = ReleaseError::from_engine(
            EngineError::Incompatible {
                engine: "jinja".into(),
                required: ">=9.0.0".into(),
                actual: "0.1.0".into(),
            },
            &key,
            1,
        );
        assert!(matches!(err, ReleaseError::EngineIncompatible { .. }));
    }

    #[test]
    fn test_messages_carry_key() {
        let err = ReleaseError::RevisionNotFound {
            key: ReleaseKey::new("prod", "web"),
            revision: 7,
        };
        assert_eq!(err.to_string(), "release 'prod/web' has no revision 7");

        let err = ReleaseError::Timeout {
            key: ReleaseKey::new("prod", "web"),
            operation: "install".into(),
            after: Duration::from_secs(3),
        };
        assert_eq!(err.to_string(), "install of release 'prod/web' timed out after 3s");
    }
}
