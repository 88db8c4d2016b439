//! Keel Engine - manifest rendering
//!
//! Turns a [`keel_core::Package`] plus a value overlay into named documents:
//! - `EngineYard`: registry of named template engines
//! - `JinjaEngine`: MiniJinja engine with Kubernetes-specific filters
//! - `Renderer`: engine selection, version gate, values merge, notes split

pub mod engine;
pub mod error;
pub mod filters;
pub mod functions;
pub mod suggestions;
pub mod yard;

pub use engine::{ENGINE_VERSION, JinjaEngine, RenderResult, TemplateEngine};
pub use error::{EngineError, TemplateError, TemplateErrorKind};
pub use suggestions::{AVAILABLE_FILTERS, AVAILABLE_FUNCTIONS};
pub use yard::{DEFAULT_ENGINE, EngineYard, Renderer};
