//! CLI error types with exit code handling
//!
//! Library errors are funnelled into [`CliError`], which picks the exit code
//! and carries help text for the miette report.

use keel_engine::EngineError;
use keel_release::ReleaseError;
use keel_repo::RepoError;
use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum CliError {
    /// Values or flags could not be parsed
    #[error("Validation failed: {message}")]
    #[diagnostic(code(keel::cli::validation))]
    Validation {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Template rendering failed, with the template source attached
    #[error(transparent)]
    #[diagnostic(transparent)]
    Render(keel_engine::TemplateError),

    /// Rendering or classification failed without a source location
    #[error("Template error: {message}")]
    #[diagnostic(code(keel::cli::template))]
    Template {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Pack resolution or loading error
    #[error("Pack error: {message}")]
    #[diagnostic(code(keel::cli::pack))]
    Pack {
        message: String,
        #[help]
        help: Option<String>,
    },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(keel::cli::config))]
    Config { message: String },

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(keel::cli::io))]
    Io { message: String },

    #[error("{message}")]
    #[diagnostic(code(keel::cli::not_found), help("list releases with `keel list`"))]
    NotFound { message: String },

    #[error("{message}")]
    #[diagnostic(code(keel::cli::conflict), help("use `keel upgrade` to change an existing release"))]
    Conflict { message: String },

    /// The cluster was changed and a revision committed, but the operation failed
    #[error("{message}")]
    #[diagnostic(
        code(keel::cli::partial_apply),
        help("the failed revision is recorded; fix the cause and upgrade or roll back")
    )]
    PartialApply { message: String },

    #[error("Cluster error: {message}")]
    #[diagnostic(code(keel::cli::cluster))]
    Cluster { message: String },

    #[error("{message}")]
    #[diagnostic(code(keel::cli::timeout), help("raise the deadline with --timeout"))]
    Timeout { message: String },

    #[error("{message}")]
    #[diagnostic(code(keel::cli::cancelled))]
    Cancelled { message: String },

    /// Wrapped error for passthrough (stores the formatted message)
    #[error("{message}")]
    #[diagnostic(code(keel::cli::error))]
    Other { message: String },

    /// Internal error (runtime, unexpected failure)
    #[error("Internal error: {message}")]
    #[diagnostic(code(keel::cli::internal))]
    Internal { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Validation { .. } | CliError::Config { .. } => exit_codes::VALIDATION_ERROR,
            CliError::Render(_) | CliError::Template { .. } => exit_codes::TEMPLATE_ERROR,
            CliError::Pack { .. } => exit_codes::PACK_ERROR,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::NotFound { .. } => exit_codes::NOT_FOUND,
            CliError::Conflict { .. } => exit_codes::CONFLICT,
            CliError::PartialApply { .. } => exit_codes::PARTIAL_APPLY,
            CliError::Cluster { .. } => exit_codes::CLUSTER_ERROR,
            CliError::Timeout { .. } => exit_codes::TIMEOUT,
            CliError::Cancelled { .. } => exit_codes::CANCELLED,
            CliError::Other { .. } | CliError::Internal { .. } => exit_codes::ERROR,
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            help: None,
        }
    }

    /// Create a validation error with help text
    pub fn validation_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            help: Some(help.into()),
        }
    }

    fn pack(message: impl Into<String>, help: Option<&str>) -> Self {
        Self::Pack {
            message: message.into(),
            help: help.map(String::from),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

impl From<keel_core::CoreError> for CliError {
    fn from(err: keel_core::CoreError) -> Self {
        CliError::validation(err.to_string())
    }
}

impl From<RepoError> for CliError {
    fn from(err: RepoError) -> Self {
        ReleaseError::from(err).into()
    }
}

impl From<EngineError> for CliError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Template(template) => CliError::Render(template),
            other => CliError::Template {
                message: other.to_string(),
                help: None,
            },
        }
    }
}

impl From<ReleaseError> for CliError {
    fn from(err: ReleaseError) -> Self {
        let message = err.to_string();
        match err {
            ReleaseError::PackageNotFound { .. } => {
                CliError::pack(message, Some("check the pack name, version and --repo"))
            }
            ReleaseError::SourceUnreachable { .. } => {
                CliError::pack(message, Some("the repository could not be reached"))
            }
            ReleaseError::InvalidPackage { .. } => CliError::pack(message, None),
            ReleaseError::EngineIncompatible { .. } => {
                CliError::pack(message, Some("upgrade keel or pin an older pack version"))
            }
            ReleaseError::Render { source, .. } => match source {
                EngineError::Template(template) => CliError::Render(template),
                _ => CliError::Template {
                    message,
                    help: None,
                },
            },
            ReleaseError::Classification { .. } => CliError::Template {
                message,
                help: Some("every document needs a string `kind` and a `metadata` mapping".into()),
            },
            ReleaseError::InvalidName { .. } => CliError::Validation {
                message,
                help: Some("names are lowercase letters, digits and '-', like `web-1`".into()),
            },
            ReleaseError::AlreadyExists { .. } => CliError::Conflict { message },
            ReleaseError::NotFound { .. } | ReleaseError::RevisionNotFound { .. } => {
                CliError::NotFound { message }
            }
            ReleaseError::PartialApply { .. } => CliError::PartialApply { message },
            ReleaseError::Reconcile { .. } => CliError::Cluster { message },
            ReleaseError::Timeout { .. } => CliError::Timeout { message },
            ReleaseError::Cancelled { .. } => CliError::Cancelled { message },
            ReleaseError::Storage { .. } => CliError::Io { message },
            _ => CliError::Other { message },
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
