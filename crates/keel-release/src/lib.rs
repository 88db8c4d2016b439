//! Keel release lifecycle
//!
//! Everything between a resolved package and a cluster:
//! - **Controller**: install, upgrade, rollback, delete, start and stop under
//!   per-key locks, with deadlines and cancellation
//! - **Classification**: hooks split from resources, resources put in install order
//! - **Storage**: append-only revision histories in memory or on disk
//! - **Reconcilers**: Server-Side Apply against a cluster, or offline

pub mod annotations;
pub mod cluster;
pub mod controller;
pub mod error;
pub mod hooks;
pub mod locks;
pub mod order;
pub mod reconciler;
pub mod release;
pub mod storage;

pub use cluster::{KubeCapabilities, KubeReconciler};
pub use controller::{OperationOptions, PackageRef, ReleaseManager, ReleaseRequest};
pub use error::{ReleaseError, Result};
pub use hooks::{Hook, HookDeletePolicy, HookEvent};
pub use locks::KeyLocks;
pub use order::{Classified, INSTALL_ORDER, Resource, classify};
pub use reconciler::{
    AppliedSet, CapabilitySource, MockReconciler, OfflineReconciler, ReconcileCall, Reconciler,
    ResourceRef, StaticCapabilities,
};
pub use release::{Release, Revision};
pub use storage::{CompressionMethod, FileStore, MemoryStore, OperationCounts, ReleaseStore};
