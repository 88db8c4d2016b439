//! Error types for package resolution

use thiserror::Error;

/// Package resolution errors
#[derive(Debug, Error)]
pub enum RepoError {
    // ============ Location Errors ============
    #[error("Invalid source location: {location} - {reason}")]
    InvalidLocation { location: String, reason: String },

    // ============ Network Errors ============
    #[error("HTTP error: {status} - {message}")]
    HttpError { status: u16, message: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Request timed out: {message}")]
    Timeout { message: String },

    // ============ Index Errors ============
    #[error("Index not found at {url}")]
    IndexNotFound { url: String },

    #[error("Index parse error: {message}")]
    IndexParseError { message: String },

    // ============ Pack Errors ============
    #[error("Pack not found: {name} in {repo}")]
    PackNotFound { name: String, repo: String },

    #[error("Invalid version constraint '{constraint}': {message}")]
    InvalidConstraint { constraint: String, message: String },

    #[error("Version constraint unsatisfiable: {name} requires {constraint}, available: {available}")]
    UnsatisfiableConstraint {
        name: String,
        constraint: String,
        available: String,
    },

    #[error("Integrity check failed for {name}: expected {expected}, got {actual}")]
    IntegrityCheckFailed {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid package: {0}")]
    InvalidPackage(#[from] keel_core::CoreError),

    // ============ Cache Errors ============
    #[error("Cache error: {message}")]
    CacheError { message: String },

    // ============ IO Errors ============
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RepoError {
    /// The source answered, but has no such pack or version
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::PackNotFound { .. } | Self::UnsatisfiableConstraint { .. }
        )
    }

    /// The source could not be reached or did not answer usefully
    pub fn is_unreachable(&self) -> bool {
        match self {
            Self::NetworkError { .. } | Self::Timeout { .. } | Self::IndexNotFound { .. } => true,
            Self::HttpError { status, .. } => *status >= 500 || *status == 404,
            _ => false,
        }
    }
}

/// Result type for repository operations
pub type Result<T> = std::result::Result<T, RepoError>;

impl From<reqwest::Error> for RepoError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RepoError::Timeout {
                message: e.to_string(),
            }
        } else if e.is_connect() {
            RepoError::NetworkError {
                message: format!("Connection failed: {}", e),
            }
        } else if let Some(status) = e.status() {
            RepoError::HttpError {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            RepoError::NetworkError {
                message: e.to_string(),
            }
        }
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(e: rusqlite::Error) -> Self {
        RepoError::CacheError {
            message: e.to_string(),
        }
    }
}
