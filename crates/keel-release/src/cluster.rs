//! Kubernetes-backed reconciler and capability discovery
//!
//! Applies manifests with Server-Side Apply through dynamic objects, so no
//! compile-time knowledge of resource types is needed. Stop and start scale
//! workloads to zero and back, keeping the previous replica count in an
//! annotation on the object itself.

use async_trait::async_trait;
use keel_core::{Capabilities, KubeVersion};
use kube::{
    Client,
    api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PropagationPolicy},
    core::{GroupVersionKind, TypeMeta},
    discovery::{ApiCapabilities, ApiResource, Discovery, Scope},
};
use serde_json::{Value as JsonValue, json};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::annotations::{helm, keel};
use crate::error::{ReleaseError, Result};
use crate::order::split_documents;
use crate::reconciler::{AppliedSet, CapabilitySource, Reconciler, ResourceRef, SCALABLE_KINDS};

/// Field manager name for Server-Side Apply
const FIELD_MANAGER: &str = "keel";

/// Kinds scaled by stop/start
/// A manifest document resolved against discovery
struct ParsedResource {
    obj: DynamicObject,
    gvk: GroupVersionKind,
    api_resource: ApiResource,
    capabilities: ApiCapabilities,
}

impl ParsedResource {
    fn name(&self) -> Result<&str> {
        self.obj.metadata.name.as_deref().ok_or_else(|| {
            ReleaseError::reconcile(format!("{} is missing metadata.name", self.gvk.kind))
        })
    }

    fn to_ref(&self) -> ResourceRef {
        ResourceRef {
            api_version: self.api_resource.api_version.clone(),
            kind: self.gvk.kind.clone(),
            namespace: self.obj.metadata.namespace.clone(),
            name: self.obj.metadata.name.clone().unwrap_or_default(),
        }
    }

    fn has_keep_policy(&self) -> bool {
        self.obj.metadata.annotations.as_ref().is_some_and(|a| {
            [keel::RESOURCE_POLICY, helm::RESOURCE_POLICY]
                .iter()
                .any(|key| a.get(*key).map(String::as_str) == Some("keep"))
        })
    }
}

/// Reconciler talking to a live cluster
pub struct KubeReconciler {
    client: Client,
    discovery: RwLock<Discovery>,
}

impl KubeReconciler {
    pub async fn new(client: Client) -> Result<Self> {
        let discovery = Discovery::new(client.clone()).run().await?;
        Ok(Self {
            client,
            discovery: RwLock::new(discovery),
        })
    }

    /// Connect with the ambient kubeconfig or in-cluster config
    pub async fn try_default() -> Result<Self> {
        Self::new(Client::try_default().await?).await
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Delete every object of `manifest`, newest kinds first.
    ///
    /// Objects marked `resource-policy: keep` and objects already gone are
    /// skipped. Returns what was actually deleted.
    pub async fn delete_manifest(
        &self,
        namespace: &str,
        manifest: &str,
    ) -> Result<Vec<ResourceRef>> {
        let resources = self.parse_manifest(manifest, namespace).await?;
        let params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            ..Default::default()
        };

        let mut deleted = Vec::new();
        for resource in resources.iter().rev() {
            if resource.has_keep_policy() {
                tracing::info!(resource = %resource.to_ref(), "kept by resource policy");
                continue;
            }

            let name = resource.name()?;
            match self.api_for(resource).delete(name, &params).await {
                Ok(_) => deleted.push(resource.to_ref()),
                Err(kube::Error::Api(resp)) if resp.code == 404 => {
                    tracing::debug!(resource = %resource.to_ref(), "already deleted");
                }
                Err(e) => {
                    return Err(ReleaseError::reconcile(format!(
                        "failed to delete {}: {}",
                        resource.to_ref(),
                        e
                    )));
                }
            }
        }
        Ok(deleted)
    }

    async fn parse_manifest(
        &self,
        manifest: &str,
        default_namespace: &str,
    ) -> Result<Vec<ParsedResource>> {
        let mut resources = Vec::new();
        for (index, doc) in split_documents(manifest).iter().enumerate() {
            let resource = self
                .parse_document(doc, default_namespace)
                .await
                .map_err(|e| {
                    ReleaseError::reconcile(format!("document {}: {}", index, e))
                })?;
            resources.push(resource);
        }
        Ok(resources)
    }

    async fn parse_document(&self, doc: &str, default_namespace: &str) -> Result<ParsedResource> {
        let mut obj: DynamicObject = serde_yaml::from_str(doc)
            .map_err(|e| ReleaseError::reconcile(format!("YAML parse error: {}", e)))?;

        let type_meta = obj
            .types
            .as_ref()
            .ok_or_else(|| ReleaseError::reconcile("resource missing apiVersion or kind"))?;
        let gvk = gvk_from_type_meta(type_meta);

        let (api_resource, capabilities) = self.resolve(&gvk).await?.ok_or_else(|| {
            ReleaseError::reconcile(format!(
                "unknown resource type {}/{}",
                type_meta.api_version, type_meta.kind
            ))
        })?;

        if capabilities.scope == Scope::Namespaced && obj.metadata.namespace.is_none() {
            obj.metadata.namespace = Some(default_namespace.to_string());
        }

        Ok(ParsedResource {
            obj,
            gvk,
            api_resource,
            capabilities,
        })
    }

    /// Resolve a kind, refreshing discovery once when it is unknown
    async fn resolve(&self, gvk: &GroupVersionKind) -> Result<Option<(ApiResource, ApiCapabilities)>> {
        if let Some(found) = self.discovery.read().await.resolve_gvk(gvk) {
            return Ok(Some(found));
        }

        // CRDs applied earlier in the same operation show up only after a refresh
        tracing::debug!(kind = %gvk.kind, group = %gvk.group, "refreshing discovery");
        let refreshed = Discovery::new(self.client.clone()).run().await?;
        let found = refreshed.resolve_gvk(gvk);
        *self.discovery.write().await = refreshed;
        Ok(found)
    }

    fn api_for(&self, resource: &ParsedResource) -> Api<DynamicObject> {
        match (&resource.capabilities.scope, &resource.obj.metadata.namespace) {
            (Scope::Namespaced, Some(ns)) => {
                Api::namespaced_with(self.client.clone(), ns, &resource.api_resource)
            }
            (Scope::Namespaced, None) => {
                Api::default_namespaced_with(self.client.clone(), &resource.api_resource)
            }
            (Scope::Cluster, _) => Api::all_with(self.client.clone(), &resource.api_resource),
        }
    }

    async fn scalable(&self, namespace: &str, manifest: &str) -> Result<Vec<ParsedResource>> {
        Ok(self
            .parse_manifest(manifest, namespace)
            .await?
            .into_iter()
            .filter(|r| SCALABLE_KINDS.contains(&r.gvk.kind.as_str()))
            .collect())
    }
}

#[async_trait]
impl Reconciler for KubeReconciler {
    async fn apply(&self, namespace: &str, manifest: &str) -> Result<AppliedSet> {
        let mut params = PatchParams::apply(FIELD_MANAGER);
        params.force = true;

        let mut applied = AppliedSet::default();
        // resolved one at a time so CRDs land before the objects that use them
        for (index, doc) in split_documents(manifest).iter().enumerate() {
            let resource = self.parse_document(doc, namespace).await.map_err(|e| {
                ReleaseError::reconcile(format!("document {}: {}", index, e))
            })?;
            let name = resource.name()?;

            self.api_for(&resource)
                .patch(name, &params, &Patch::Apply(&resource.obj))
                .await
                .map_err(|e| {
                    ReleaseError::reconcile(format!("failed to apply {}: {}", resource.to_ref(), e))
                })?;

            tracing::debug!(resource = %resource.to_ref(), "applied");
            applied.applied.push(resource.to_ref());
        }
        Ok(applied)
    }

    async fn query(&self, namespace: &str, manifest: &str) -> Result<Vec<ResourceRef>> {
        let mut live = Vec::new();
        for resource in self.parse_manifest(manifest, namespace).await? {
            let name = resource.name()?;
            if self.api_for(&resource).get_opt(name).await?.is_some() {
                live.push(resource.to_ref());
            }
        }
        Ok(live)
    }

    async fn activate(&self, namespace: &str, manifest: &str) -> Result<()> {
        for resource in self.scalable(namespace, manifest).await? {
            let api = self.api_for(&resource);
            let name = resource.name()?;
            let Some(current) = api.get_opt(name).await? else {
                continue;
            };

            if let Some(patch) = start_patch(&current.data, current.metadata.annotations.as_ref())? {
                api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
                    .await?;
                tracing::info!(resource = %resource.to_ref(), "restored replicas");
            }
        }
        Ok(())
    }

    async fn deactivate(&self, namespace: &str, manifest: &str) -> Result<()> {
        for resource in self.scalable(namespace, manifest).await? {
            let api = self.api_for(&resource);
            let name = resource.name()?;
            let Some(current) = api.get_opt(name).await? else {
                continue;
            };

            let Some(patch) = stop_patch(&current.data) else {
                continue;
            };
            api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
            tracing::info!(resource = %resource.to_ref(), "scaled to zero");
        }
        Ok(())
    }
}

/// Capabilities discovered from the API server
pub struct KubeCapabilities {
    client: Client,
}

impl KubeCapabilities {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CapabilitySource for KubeCapabilities {
    async fn capabilities(&self) -> Result<Capabilities> {
        let info = self.client.apiserver_version().await?;
        let discovery = Discovery::new(self.client.clone()).run().await?;

        let mut api_versions: Vec<String> = discovery
            .groups()
            .flat_map(|group| {
                let name = group.name().to_string();
                group.versions().map(move |version| {
                    if name.is_empty() {
                        version.to_string()
                    } else {
                        format!("{}/{}", name, version)
                    }
                })
            })
            .collect();
        api_versions.sort();
        api_versions.dedup();

        Ok(Capabilities::new(KubeVersion::new(&info.git_version), api_versions))
    }
}

/// `apps/v1` -> (`apps`, `v1`), `v1` -> (``, `v1`)
fn gvk_from_type_meta(tm: &TypeMeta) -> GroupVersionKind {
    let (group, version) = match tm.api_version.rsplit_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), tm.api_version.clone()),
    };

    GroupVersionKind {
        group,
        version,
        kind: tm.kind.clone(),
    }
}

/// `spec.replicas`, defaulting to 1 as the API server does
fn replicas_of(data: &JsonValue) -> i64 {
    data.pointer("/spec/replicas")
        .and_then(JsonValue::as_i64)
        .unwrap_or(1)
}

/// Merge patch setting the annotation; `null` removes it
fn annotation_patch(annotation: JsonValue) -> JsonValue {
    let mut annotations = serde_json::Map::new();
    annotations.insert(keel::PREVIOUS_REPLICAS.to_string(), annotation);
    json!({ "metadata": { "annotations": annotations } })
}

fn replicas_patch(annotation: JsonValue, replicas: i64) -> JsonValue {
    let mut patch = annotation_patch(annotation);
    patch["spec"] = json!({ "replicas": replicas });
    patch
}

/// Scale to zero, recording the live count; `None` when already at zero.
///
/// An upgrade or rollback of a stopped release re-applies `spec.replicas`
/// but leaves the annotation behind, so the live count wins over it.
fn stop_patch(data: &JsonValue) -> Option<JsonValue> {
    match replicas_of(data) {
        0 => None,
        replicas => Some(replicas_patch(JsonValue::String(replicas.to_string()), 0)),
    }
}

/// Restore the recorded count, or only drop a stale annotation when the
/// object is already running
fn start_patch(
    data: &JsonValue,
    annotations: Option<&BTreeMap<String, String>>,
) -> Result<Option<JsonValue>> {
    let Some(raw) = annotations.and_then(|a| a.get(keel::PREVIOUS_REPLICAS)) else {
        return Ok(None);
    };

    if replicas_of(data) != 0 {
        return Ok(Some(annotation_patch(JsonValue::Null)));
    }

    let replicas: i64 = raw.trim().parse().map_err(|_| {
        ReleaseError::reconcile(format!(
            "invalid {} annotation '{}'",
            keel::PREVIOUS_REPLICAS,
            raw
        ))
    })?;

    Ok(Some(replicas_patch(JsonValue::Null, replicas)))
}
