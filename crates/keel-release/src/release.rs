//! Release records
//!
//! A [`Revision`] is the immutable content produced by one install, upgrade
//! or rollback. A [`Release`] is the view of a key at one revision: the
//! shared revision content plus the status the key had.

use chrono::{DateTime, Utc};
use keel_core::{PackMetadata, ReleaseKey, ReleaseStatus, ValueOverlay};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::hooks::{Hook, HookEvent, hooks_for};
use crate::order::Resource;
use crate::reconciler::ResourceRef;

/// Immutable content of one revision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    /// Revision number, starting at 1
    pub number: u32,

    /// Pack identity at deploy time
    pub pack: PackMetadata,

    /// Caller's overlay, kept verbatim
    pub overlay: ValueOverlay,

    /// Resources in install order, hooks excluded
    pub manifest: String,

    #[serde(default)]
    pub hooks: Vec<Hook>,

    #[serde(default)]
    pub resources: Vec<Resource>,

    /// Rendered `NOTES.txt`
    #[serde(default)]
    pub notes: Option<String>,

    /// "Install complete", "Rollback to 2", ...
    #[serde(default)]
    pub description: String,

    pub created_at: DateTime<Utc>,
}

impl Revision {
    /// Same content under a new number, as produced by a rollback
    pub fn copied_as(&self, number: u32, description: impl Into<String>) -> Self {
        Self {
            number,
            description: description.into(),
            created_at: Utc::now(),
            ..self.clone()
        }
    }
}

/// A release snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct Release {
    pub namespace: String,
    pub name: String,
    pub status: ReleaseStatus,
    pub updated_at: DateTime<Utc>,
    pub revision: Arc<Revision>,

    /// Resources observed in the cluster; display only, never stored
    pub live: Vec<ResourceRef>,
}

impl Release {
    pub fn new(key: &ReleaseKey, status: ReleaseStatus, revision: Arc<Revision>) -> Self {
        Self {
            namespace: key.namespace.clone(),
            name: key.name.clone(),
            status,
            updated_at: Utc::now(),
            revision,
            live: Vec::new(),
        }
    }

    pub fn key(&self) -> ReleaseKey {
        ReleaseKey::new(&self.namespace, &self.name)
    }

    /// Revision number
    pub fn number(&self) -> u32 {
        self.revision.number
    }

    pub fn manifest(&self) -> &str {
        &self.revision.manifest
    }

    pub fn hooks(&self) -> &[Hook] {
        &self.revision.hooks
    }

    pub fn resources(&self) -> &[Resource] {
        &self.revision.resources
    }

    pub fn notes(&self) -> Option<&str> {
        self.revision.notes.as_deref()
    }

    pub fn hooks_for(&self, event: HookEvent) -> Vec<&Hook> {
        hooks_for(&self.revision.hooks, event)
    }

    /// Copy with a different status
    pub fn with_status(&self, status: ReleaseStatus) -> Self {
        Self {
            status,
            updated_at: Utc::now(),
            live: Vec::new(),
            ..self.clone()
        }
    }
}
