//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Package not found: {path}")]
    PackageNotFound { path: String },

    #[error("Invalid package: {message}")]
    InvalidPackage { message: String },

    #[error("Invalid values: {message}")]
    InvalidValues { message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid version: {0}")]
    InvalidVersion(#[from] semver::Error),

    #[error("Invalid name: {message}")]
    InvalidName { message: String },

    #[error("Archive error: {message}")]
    Archive { message: String },
}

pub type Result<T> = std::result::Result<T, CoreError>;
