//! Keel package resolution
//!
//! Turns `(location, name, version constraint)` into a loaded
//! [`keel_core::Package`]:
//!
//! - **HTTP repositories**: Helm-style repos with an `index.yaml`
//! - **Local repositories**: directories of packs or `<name>-<version>.tgz` archives
//! - **Archive cache**: SQLite-indexed, re-verified by SHA-256 on every hit
//!
//! ## Example
//!
//! ```rust,no_run
//! use keel_repo::{PackageSource, Resolver};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let resolver = Resolver::new()?;
//! let package = resolver.fetch("https://packs.example.com", "app1", "^1.0").await?;
//! println!("{} {}", package.name(), package.version());
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod error;
pub mod file;
pub mod http;
pub mod index;
pub mod resolver;
pub mod source;

pub use cache::{ArchiveCache, CacheStats};
pub use error::{RepoError, Result};
pub use file::FileSource;
pub use http::HttpSource;
pub use index::{PackEntry, RepositoryIndex, VersionConstraint};
pub use resolver::Resolver;
pub use source::{PackageSource, unpack_package};
