//! Engine error types

use miette::{Diagnostic, NamedSource, SourceSpan};
use thiserror::Error;

use crate::suggestions::{suggest_unknown_filter, suggest_unknown_function};

/// Main engine error type
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Template error in {}: {}", .0.template, .0.message)]
    Template(#[from] TemplateError),

    #[error("Pack requires engine '{engine}' {required}, but {actual} is running")]
    Incompatible {
        engine: String,
        required: String,
        actual: String,
    },

    #[error(transparent)]
    Core(#[from] keel_core::CoreError),
}

/// Error kind for categorizing template errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateErrorKind {
    UndefinedVariable,
    UnknownFilter,
    UnknownFunction,
    SyntaxError,
    TypeError,
    InvalidOperation,
    Other,
}

impl TemplateErrorKind {
    pub fn to_code_string(&self) -> &'static str {
        match self {
            Self::UndefinedVariable => "undefined_variable",
            Self::UnknownFilter => "unknown_filter",
            Self::UnknownFunction => "unknown_function",
            Self::SyntaxError => "syntax",
            Self::TypeError => "type",
            Self::InvalidOperation => "invalid_operation",
            Self::Other => "render",
        }
    }
}

/// Template-specific error with source information
#[derive(Error, Debug, Diagnostic, Clone)]
#[error("{message}")]
#[diagnostic(code(keel::template::render))]
pub struct TemplateError {
    pub message: String,

    pub kind: TemplateErrorKind,

    /// Name of the failing template
    pub template: String,

    /// Line in the template, when MiniJinja reports one
    pub line: Option<usize>,

    #[source_code]
    pub src: NamedSource<String>,

    #[label("error occurred here")]
    pub span: Option<SourceSpan>,

    #[help]
    pub suggestion: Option<String>,
}

impl TemplateError {
    /// Wrap a MiniJinja error raised while loading or rendering `template_name`
    pub fn from_minijinja(err: minijinja::Error, template_name: &str, template_source: &str) -> Self {
        let kind = categorize(&err);
        let line = err.line();
        let span = line.and_then(|line_num| calculate_span(template_source, line_num));

        let detail = err
            .detail()
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        let suggestion = match kind {
            TemplateErrorKind::UnknownFilter => suggest_unknown_filter(&detail),
            TemplateErrorKind::UnknownFunction => suggest_unknown_function(&detail),
            TemplateErrorKind::UndefinedVariable => Some(
                "Check the spelling, or guard the lookup with `| default(...)`".to_string(),
            ),
            _ => None,
        };

        let message = err
            .to_string()
            .replace("undefined value", "undefined variable");

        Self {
            message,
            kind,
            template: template_name.to_string(),
            line,
            src: NamedSource::new(template_name, template_source.to_string()),
            span,
            suggestion,
        }
    }

    pub fn kind(&self) -> TemplateErrorKind {
        self.kind
    }
}

fn categorize(err: &minijinja::Error) -> TemplateErrorKind {
    match err.kind() {
        minijinja::ErrorKind::UndefinedError => TemplateErrorKind::UndefinedVariable,
        minijinja::ErrorKind::UnknownFilter => TemplateErrorKind::UnknownFilter,
        minijinja::ErrorKind::UnknownFunction => TemplateErrorKind::UnknownFunction,
        minijinja::ErrorKind::SyntaxError => TemplateErrorKind::SyntaxError,
        minijinja::ErrorKind::InvalidOperation => TemplateErrorKind::InvalidOperation,
        minijinja::ErrorKind::NonPrimitive | minijinja::ErrorKind::NonKey => {
            TemplateErrorKind::TypeError
        }
        _ => TemplateErrorKind::Other,
    }
}

/// Calculate the source span for a given line number
fn calculate_span(source: &str, line_num: usize) -> Option<SourceSpan> {
    let mut offset = 0;

    for (idx, line) in source.lines().enumerate() {
        if idx + 1 == line_num {
            return Some(SourceSpan::new(offset.into(), line.len()));
        }
        offset += line.len() + 1;
    }

    None
}

pub type Result<T> = std::result::Result<T, EngineError>;
