//! Lifecycle hooks
//!
//! Hook metadata comes from `keel.io/*` / `helm.sh/*` annotations and is
//! parsed into closed enums: a tag outside the known set is an error, never
//! silently ignored.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::annotations::{get_annotation, helm, keel, split_list};

/// Lifecycle event a hook is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookEvent {
    PreInstall,
    PostInstall,
    PreDelete,
    PostDelete,
    PreUpgrade,
    PostUpgrade,
    PreRollback,
    PostRollback,
    TestSuccess,
    TestFailure,
}

impl HookEvent {
    pub const ALL: [HookEvent; 10] = [
        HookEvent::PreInstall,
        HookEvent::PostInstall,
        HookEvent::PreDelete,
        HookEvent::PostDelete,
        HookEvent::PreUpgrade,
        HookEvent::PostUpgrade,
        HookEvent::PreRollback,
        HookEvent::PostRollback,
        HookEvent::TestSuccess,
        HookEvent::TestFailure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::PreInstall => "pre-install",
            HookEvent::PostInstall => "post-install",
            HookEvent::PreDelete => "pre-delete",
            HookEvent::PostDelete => "post-delete",
            HookEvent::PreUpgrade => "pre-upgrade",
            HookEvent::PostUpgrade => "post-upgrade",
            HookEvent::PreRollback => "pre-rollback",
            HookEvent::PostRollback => "post-rollback",
            HookEvent::TestSuccess => "test-success",
            HookEvent::TestFailure => "test-failure",
        }
    }
}

impl std::fmt::Display for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HookEvent {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        HookEvent::ALL
            .into_iter()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| format!("unknown hook event '{}'", s))
    }
}

/// When a hook resource should be removed (Helm `hook-delete-policy`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookDeletePolicy {
    HookSucceeded,
    HookFailed,
    BeforeHookCreation,
}

impl FromStr for HookDeletePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "hook-succeeded" => Ok(Self::HookSucceeded),
            "hook-failed" => Ok(Self::HookFailed),
            "before-hook-creation" => Ok(Self::BeforeHookCreation),
            other => Err(format!("unknown hook delete policy '{}'", other)),
        }
    }
}

/// A classified hook document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hook {
    /// `metadata.name` of the hook resource
    pub name: String,

    /// Document the hook was rendered from
    pub source: String,

    pub kind: String,

    pub events: Vec<HookEvent>,

    /// Lower runs first
    #[serde(default)]
    pub weight: i32,

    /// Release that owns the hook
    pub release: String,

    #[serde(default)]
    pub delete_policies: Vec<HookDeletePolicy>,

    /// Manifest text of the hook resource
    pub manifest: String,
}

impl Hook {
    pub fn runs_on(&self, event: HookEvent) -> bool {
        self.events.contains(&event)
    }
}

/// Hook events declared in `annotations`, `None` for a plain resource
pub fn parse_events(annotations: &BTreeMap<String, String>) -> Result<Option<Vec<HookEvent>>, String> {
    let Some(raw) = get_annotation(annotations, keel::HOOK, helm::HOOK) else {
        return Ok(None);
    };

    let events = split_list(raw)
        .into_iter()
        .map(HookEvent::from_str)
        .collect::<Result<Vec<_>, _>>()?;

    Ok((!events.is_empty()).then_some(events))
}

pub fn parse_delete_policies(
    annotations: &BTreeMap<String, String>,
) -> Result<Vec<HookDeletePolicy>, String> {
    get_annotation(annotations, keel::HOOK_DELETE_POLICY, helm::HOOK_DELETE_POLICY)
        .map(|raw| {
            split_list(raw)
                .into_iter()
                .map(HookDeletePolicy::from_str)
                .collect()
        })
        .unwrap_or_else(|| Ok(Vec::new()))
}

/// Hooks for `event`, in their existing order
pub fn hooks_for(hooks: &[Hook], event: HookEvent) -> Vec<&Hook> {
    hooks.iter().filter(|h| h.runs_on(event)).collect()
}
