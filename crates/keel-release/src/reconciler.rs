//! Cluster capabilities consumed by the controller
//!
//! The controller never talks to a cluster directly; it is handed a
//! [`Reconciler`] and a [`CapabilitySource`]. Manifests cross this boundary
//! as multi-document YAML text.

use async_trait::async_trait;
use keel_core::Capabilities;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::{ReleaseError, Result};
use crate::order::split_documents;

/// Kinds that stop and start scale
pub(crate) const SCALABLE_KINDS: &[&str] = &["Deployment", "StatefulSet", "ReplicaSet"];

/// Identity of a cluster object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceRef {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            api_version: String::new(),
            kind: kind.into(),
            namespace: None,
            name: name.into(),
        }
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{} ({})", self.kind, self.name, ns),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// Objects touched by one apply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedSet {
    pub applied: Vec<ResourceRef>,
}

/// Applies and inspects manifests in a cluster
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Apply every document of `manifest`
    async fn apply(&self, namespace: &str, manifest: &str) -> Result<AppliedSet>;

    /// Objects of `manifest` that currently exist
    async fn query(&self, namespace: &str, manifest: &str) -> Result<Vec<ResourceRef>>;

    /// Bring stopped workloads of `manifest` back
    async fn activate(&self, namespace: &str, manifest: &str) -> Result<()>;

    /// Stop the workloads of `manifest` without deleting anything
    async fn deactivate(&self, namespace: &str, manifest: &str) -> Result<()>;
}

/// Supplies the capability set used for rendering and classification
#[async_trait]
pub trait CapabilitySource: Send + Sync {
    async fn capabilities(&self) -> Result<Capabilities>;
}

/// Fixed capabilities, for tests and offline use
#[derive(Debug, Clone, Default)]
pub struct StaticCapabilities(pub Capabilities);

#[async_trait]
impl CapabilitySource for StaticCapabilities {
    async fn capabilities(&self) -> Result<Capabilities> {
        Ok(self.0.clone())
    }
}

/// Object identities of every document in `manifest`.
///
/// Documents without `kind` or `metadata.name` are skipped; namespaced
/// defaults are not applied since the scope of a kind is not known here.
pub fn parse_refs(manifest: &str) -> Vec<ResourceRef> {
    split_documents(manifest)
        .iter()
        .filter_map(|doc| serde_yaml::from_str::<serde_yaml::Value>(doc).ok())
        .filter_map(|value| {
            let kind = value.get("kind")?.as_str()?.to_string();
            let metadata = value.get("metadata")?;
            let name = metadata.get("name")?.as_str()?.to_string();
            Some(ResourceRef {
                api_version: value
                    .get("apiVersion")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                kind,
                namespace: metadata
                    .get("namespace")
                    .and_then(|n| n.as_str())
                    .map(String::from),
                name,
            })
        })
        .collect()
}

/// Reconciler with no cluster behind it: every apply succeeds and the
/// manifest is reported back as the live set.
#[derive(Debug, Clone, Default)]
pub struct OfflineReconciler;

#[async_trait]
impl Reconciler for OfflineReconciler {
    async fn apply(&self, _namespace: &str, manifest: &str) -> Result<AppliedSet> {
        Ok(AppliedSet {
            applied: parse_refs(manifest),
        })
    }

    async fn query(&self, _namespace: &str, manifest: &str) -> Result<Vec<ResourceRef>> {
        Ok(parse_refs(manifest))
    }

    async fn activate(&self, _namespace: &str, _manifest: &str) -> Result<()> {
        Ok(())
    }

    async fn deactivate(&self, _namespace: &str, _manifest: &str) -> Result<()> {
        Ok(())
    }
}

/// A recorded reconciler call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileCall {
    Apply(Vec<ResourceRef>),
    Query,
    Activate,
    Deactivate,
}

/// Replica state of a workload held by [`MockReconciler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Workload {
    replicas: i64,
    /// Count recorded by the last stop
    previous: Option<i64>,
}

/// Recording reconciler for tests, with failure injection.
///
/// Scalable objects keep a replica count the way a cluster would: apply
/// sets it from the manifest and leaves a recorded stop count alone.
#[derive(Debug, Default)]
pub struct MockReconciler {
    calls: Mutex<Vec<ReconcileCall>>,
    fail_kind: Mutex<Option<String>>,
    fail_query: Mutex<bool>,
    workloads: Mutex<BTreeMap<String, Workload>>,
}

impl MockReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any apply containing an object of `kind`
    pub fn fail_on_kind(&self, kind: impl Into<String>) {
        if let Ok(mut slot) = self.fail_kind.lock() {
            *slot = Some(kind.into());
        }
    }

    pub fn fail_queries(&self, fail: bool) {
        if let Ok(mut slot) = self.fail_query.lock() {
            *slot = fail;
        }
    }

    pub fn calls(&self) -> Vec<ReconcileCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Objects applied, in order, across all apply calls
    pub fn applied(&self) -> Vec<ResourceRef> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ReconcileCall::Apply(refs) => Some(refs),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Live replica count of a scalable object
    pub fn replicas(&self, name: &str) -> Option<i64> {
        self.workloads
            .lock()
            .ok()
            .and_then(|w| w.get(name).map(|w| w.replicas))
    }

    fn record(&self, call: ReconcileCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn scale(&self, manifest: &str, change: impl Fn(&mut Workload)) {
        let Ok(mut workloads) = self.workloads.lock() else {
            return;
        };
        for (name, _) in scalable_docs(manifest) {
            if let Some(workload) = workloads.get_mut(&name) {
                change(workload);
            }
        }
    }
}

/// Names and `spec.replicas` (default 1) of the scalable documents
fn scalable_docs(manifest: &str) -> Vec<(String, i64)> {
    split_documents(manifest)
        .iter()
        .filter_map(|doc| serde_yaml::from_str::<serde_yaml::Value>(doc).ok())
        .filter(|value| {
            value
                .get("kind")
                .and_then(|k| k.as_str())
                .is_some_and(|k| SCALABLE_KINDS.contains(&k))
        })
        .filter_map(|value| {
            let name = value.get("metadata")?.get("name")?.as_str()?.to_string();
            let replicas = value
                .get("spec")
                .and_then(|s| s.get("replicas"))
                .and_then(|r| r.as_i64())
                .unwrap_or(1);
            Some((name, replicas))
        })
        .collect()
}

#[async_trait]
impl Reconciler for MockReconciler {
    async fn apply(&self, _namespace: &str, manifest: &str) -> Result<AppliedSet> {
        let refs = parse_refs(manifest);
        let failing = self.fail_kind.lock().ok().and_then(|k| k.clone());

        if let Some(kind) = failing {
            if let Some(pos) = refs.iter().position(|r| r.kind == kind) {
                self.record(ReconcileCall::Apply(refs[..pos].to_vec()));
                return Err(ReleaseError::reconcile(format!(
                    "admission denied for {}",
                    refs[pos]
                )));
            }
        }

        if let Ok(mut workloads) = self.workloads.lock() {
            for (name, replicas) in scalable_docs(manifest) {
                workloads
                    .entry(name)
                    .and_modify(|w| w.replicas = replicas)
                    .or_insert(Workload {
                        replicas,
                        previous: None,
                    });
            }
        }

        self.record(ReconcileCall::Apply(refs.clone()));
        Ok(AppliedSet { applied: refs })
    }

    async fn query(&self, _namespace: &str, manifest: &str) -> Result<Vec<ResourceRef>> {
        self.record(ReconcileCall::Query);
        if self.fail_query.lock().map(|f| *f).unwrap_or(false) {
            return Err(ReleaseError::reconcile("cluster unavailable"));
        }
        Ok(parse_refs(manifest))
    }

    async fn activate(&self, _namespace: &str, manifest: &str) -> Result<()> {
        self.record(ReconcileCall::Activate);
        self.scale(manifest, |w| {
            if let Some(previous) = w.previous.take() {
                if w.replicas == 0 {
                    w.replicas = previous;
                }
            }
        });
        Ok(())
    }

    async fn deactivate(&self, _namespace: &str, manifest: &str) -> Result<()> {
        self.record(ReconcileCall::Deactivate);
        self.scale(manifest, |w| {
            if w.replicas != 0 {
                w.previous = Some(w.replicas);
                w.replicas = 0;
            }
        });
        Ok(())
    }
}
