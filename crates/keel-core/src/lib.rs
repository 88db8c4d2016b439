//! Keel Core - shared types for the release lifecycle manager
//!
//! This crate provides the foundational types used throughout Keel:
//! - `Package`: a fetched pack (metadata, default values, raw templates)
//! - `Values` / `ValueOverlay`: configuration values with deep merge support
//! - `RenderContext`: per-render release info and cluster capabilities
//! - `ReleaseKey` / `ReleaseStatus`: release identity and lifecycle state

pub mod archive;
pub mod context;
pub mod error;
pub mod pack;
pub mod release;
pub mod values;

pub use context::{Capabilities, KubeVersion, PackInfo, RenderContext, TemplateContext};
pub use error::{CoreError, Result};
pub use pack::{EngineConfig, Pack, PackMetadata, Package};
pub use release::{ReleaseInfo, ReleaseKey, ReleaseStatus, validate_namespace};
pub use values::{ValueOverlay, Values, parse_set_values};
