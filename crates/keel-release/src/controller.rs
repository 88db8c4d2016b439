//! Release lifecycle controller
//!
//! Drives one release key through `Absent -> Deployed <-> Stopped -> Deleted`.
//! Every mutating operation runs under the per-key lock, is checked against
//! the store, and commits through the store's compare-and-set.

use chrono::Utc;
use keel_core::{RenderContext, ReleaseInfo, ReleaseKey, ReleaseStatus, ValueOverlay};
use keel_engine::Renderer;
use keel_repo::PackageSource;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{ReleaseError, Result};
use crate::hooks::{HookEvent, hooks_for};
use crate::locks::KeyLocks;
use crate::order::{classify, hooks_manifest, manifest_text};
use crate::reconciler::{CapabilitySource, Reconciler};
use crate::release::{Release, Revision};
use crate::storage::ReleaseStore;

/// Where to fetch a package from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRef {
    /// `https://...`, `file://...` or a local path
    pub location: String,
    pub name: String,
    /// Version constraint; empty means latest
    pub version: String,
}

impl PackageRef {
    pub fn new(
        location: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            location: location.into(),
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Install / upgrade request
#[derive(Debug, Clone)]
pub struct ReleaseRequest {
    pub key: ReleaseKey,
    pub package: PackageRef,
    pub overlay: ValueOverlay,
}

impl ReleaseRequest {
    pub fn new(key: ReleaseKey, package: PackageRef, overlay: ValueOverlay) -> Self {
        Self {
            key,
            package,
            overlay,
        }
    }
}

/// Deadline and cancellation for one controller call
#[derive(Debug, Clone, Default)]
pub struct OperationOptions {
    pub timeout: Option<Duration>,
    pub cancel: CancellationToken,
}

impl OperationOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Cancellation and deadline bound to one operation on one key
struct Scope<'a> {
    key: &'a ReleaseKey,
    operation: &'static str,
    deadline: Option<(Instant, Duration)>,
    cancel: &'a CancellationToken,
}

impl<'a> Scope<'a> {
    fn new(key: &'a ReleaseKey, operation: &'static str, options: &'a OperationOptions) -> Self {
        Self {
            key,
            operation,
            deadline: options.timeout.map(|t| (Instant::now() + t, t)),
            cancel: &options.cancel,
        }
    }

    /// Run `work`, aborting on cancellation or once the deadline passes
    async fn run<T>(&self, work: impl Future<Output = Result<T>>) -> Result<T> {
        let cancellable = async {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(ReleaseError::Cancelled {
                    key: self.key.clone(),
                    operation: self.operation.to_string(),
                }),
                result = work => result,
            }
        };

        match self.deadline {
            Some((deadline, after)) => tokio::time::timeout_at(deadline, cancellable)
                .await
                .unwrap_or_else(|_| {
                    Err(ReleaseError::Timeout {
                        key: self.key.clone(),
                        operation: self.operation.to_string(),
                        after,
                    })
                }),
            None => cancellable.await,
        }
    }
}

/// The release lifecycle controller
pub struct ReleaseManager {
    source: Arc<dyn PackageSource>,
    renderer: Renderer,
    store: Arc<dyn ReleaseStore>,
    reconciler: Arc<dyn Reconciler>,
    capabilities: Arc<dyn CapabilitySource>,
    locks: KeyLocks,
}

impl ReleaseManager {
    pub fn new(
        source: Arc<dyn PackageSource>,
        store: Arc<dyn ReleaseStore>,
        reconciler: Arc<dyn Reconciler>,
        capabilities: Arc<dyn CapabilitySource>,
    ) -> Self {
        Self {
            source,
            renderer: Renderer::default(),
            store,
            reconciler,
            capabilities,
            locks: KeyLocks::new(),
        }
    }

    // ============ Pipeline ============

    /// Resolve, render and classify `request` into revision `info.revision`
    async fn prepare(
        &self,
        request: &ReleaseRequest,
        info: ReleaseInfo,
        description: impl Into<String>,
    ) -> Result<Revision> {
        let capabilities = self.capabilities.capabilities().await?;

        let package = self
            .source
            .fetch(
                &request.package.location,
                &request.package.name,
                &request.package.version,
            )
            .await?;

        let number = info.revision;
        let context = RenderContext::new(info, capabilities);
        let rendered = self
            .renderer
            .render(&package, &request.overlay, &context)
            .map_err(|e| ReleaseError::from_engine(e, &request.key, number))?;

        let classified = classify(&rendered.manifests, &request.key.name, &context.capabilities)?;

        tracing::debug!(
            release = %request.key,
            revision = number,
            pack = %package.name(),
            version = %package.version(),
            "prepared revision"
        );

        Ok(Revision {
            number,
            pack: package.metadata().clone(),
            overlay: request.overlay.clone(),
            manifest: manifest_text(&classified.resources),
            hooks: classified.hooks,
            resources: classified.resources,
            notes: rendered.notes,
            description: description.into(),
            created_at: Utc::now(),
        })
    }

    /// Pre hooks, resources, post hooks, in that order
    async fn apply_phases(
        &self,
        namespace: &str,
        revision: &Revision,
        pre: HookEvent,
        post: HookEvent,
    ) -> Result<()> {
        let pre_hooks = hooks_for(&revision.hooks, pre);
        if !pre_hooks.is_empty() {
            tracing::debug!(%namespace, event = %pre, count = pre_hooks.len(), "applying hooks");
            self.reconciler
                .apply(namespace, &hooks_manifest(&pre_hooks))
                .await?;
        }

        if !revision.resources.is_empty() {
            self.reconciler.apply(namespace, &revision.manifest).await?;
        }

        let post_hooks = hooks_for(&revision.hooks, post);
        if !post_hooks.is_empty() {
            tracing::debug!(%namespace, event = %post, count = post_hooks.len(), "applying hooks");
            self.reconciler
                .apply(namespace, &hooks_manifest(&post_hooks))
                .await?;
        }

        Ok(())
    }

    /// Apply `revision`, persist the outcome and attach the live set.
    ///
    /// A failed apply is stored as `Failed` and reported as
    /// [`ReleaseError::PartialApply`]; so is a live query that fails after
    /// a successful commit.
    async fn commit(
        &self,
        key: &ReleaseKey,
        revision: Revision,
        pre: HookEvent,
        post: HookEvent,
    ) -> Result<Release> {
        let revision = Arc::new(revision);
        let applied = self
            .apply_phases(&key.namespace, &revision, pre, post)
            .await;

        let status = if applied.is_ok() {
            ReleaseStatus::Deployed
        } else {
            ReleaseStatus::Failed
        };
        let mut release = Release::new(key, status, revision);
        let stored = self.store.put(&release).await;

        if let Err(source) = applied {
            tracing::warn!(release = %key, revision = release.number(), "apply failed: {}", source);
            let store_error = stored.err().map(|e| {
                tracing::error!(release = %key, revision = release.number(), "failed revision not recorded: {}", e);
                Box::new(e)
            });
            return Err(ReleaseError::PartialApply {
                release: Box::new(release),
                source: Box::new(source),
                store_error,
            });
        }
        stored?;

        tracing::info!(
            release = %key,
            revision = release.number(),
            "{}",
            release.revision.description
        );

        match self.reconciler.query(&key.namespace, release.manifest()).await {
            Ok(live) => {
                release.live = live;
                Ok(release)
            }
            Err(source) => Err(ReleaseError::PartialApply {
                release: Box::new(release),
                source: Box::new(source),
                store_error: None,
            }),
        }
    }

    async fn ensure_absent(&self, key: &ReleaseKey) -> Result<()> {
        if self.store.exists(key).await? {
            return Err(ReleaseError::AlreadyExists { key: key.clone() });
        }
        Ok(())
    }

    // ============ Operations ============

    /// Render revision 1 and return it with its hooks; nothing is stored
    pub async fn pre_install(
        &self,
        request: &ReleaseRequest,
        options: &OperationOptions,
    ) -> Result<Release> {
        ReleaseError::check_key(&request.key)?;
        let scope = Scope::new(&request.key, "pre-install", options);
        scope
            .run(async {
                self.ensure_absent(&request.key).await?;
                let info = ReleaseInfo::for_install(&request.key.name, &request.key.namespace);
                let revision = self.prepare(request, info, "Install planned").await?;
                Ok(Release::new(
                    &request.key,
                    ReleaseStatus::Deployed,
                    Arc::new(revision),
                ))
            })
            .await
    }

    pub async fn install(
        &self,
        request: &ReleaseRequest,
        options: &OperationOptions,
    ) -> Result<Release> {
        let key = &request.key;
        ReleaseError::check_key(key)?;
        let scope = Scope::new(key, "install", options);

        let _guard = scope.run(async { Ok(self.locks.lock(key).await) }).await?;
        let revision = scope
            .run(async {
                self.ensure_absent(key).await?;
                let info = ReleaseInfo::for_install(&key.name, &key.namespace);
                self.prepare(request, info, "Install complete").await
            })
            .await?;

        self.commit(key, revision, HookEvent::PreInstall, HookEvent::PostInstall)
            .await
    }

    /// Render the next revision and return it with its hooks; nothing is stored
    pub async fn pre_upgrade(
        &self,
        request: &ReleaseRequest,
        options: &OperationOptions,
    ) -> Result<Release> {
        let key = &request.key;
        ReleaseError::check_key(key)?;
        let scope = Scope::new(key, "pre-upgrade", options);
        scope
            .run(async {
                let current = self.store.get(key).await?;
                let info = ReleaseInfo::for_upgrade(&key.name, &key.namespace, current.number() + 1);
                let revision = self.prepare(request, info, "Upgrade planned").await?;
                Ok(Release::new(key, ReleaseStatus::Deployed, Arc::new(revision)))
            })
            .await
    }

    pub async fn upgrade(
        &self,
        request: &ReleaseRequest,
        options: &OperationOptions,
    ) -> Result<Release> {
        let key = &request.key;
        ReleaseError::check_key(key)?;
        let scope = Scope::new(key, "upgrade", options);

        let _guard = scope.run(async { Ok(self.locks.lock(key).await) }).await?;
        let revision = scope
            .run(async {
                let current = self.store.get(key).await?;
                let info = ReleaseInfo::for_upgrade(&key.name, &key.namespace, current.number() + 1);
                self.prepare(request, info, "Upgrade complete").await
            })
            .await?;

        self.commit(key, revision, HookEvent::PreUpgrade, HookEvent::PostUpgrade)
            .await
    }

    /// New revision carrying the content of `target`
    pub async fn rollback(
        &self,
        key: &ReleaseKey,
        target: u32,
        options: &OperationOptions,
    ) -> Result<Release> {
        ReleaseError::check_key(key)?;
        let scope = Scope::new(key, "rollback", options);

        let _guard = scope.run(async { Ok(self.locks.lock(key).await) }).await?;
        let revision = scope
            .run(async {
                let history = self.store.list_revisions(key).await?;
                let current = history.last().map(Release::number).unwrap_or(0);
                let source = history
                    .iter()
                    .find(|r| r.number() == target)
                    .ok_or_else(|| ReleaseError::RevisionNotFound {
                        key: key.clone(),
                        revision: target,
                    })?;
                Ok(source
                    .revision
                    .copied_as(current + 1, format!("Rollback to {}", target)))
            })
            .await?;

        self.commit(key, revision, HookEvent::PreRollback, HookEvent::PostRollback)
            .await
    }

    /// Remove the record and hand back its last revision for teardown
    pub async fn delete(&self, key: &ReleaseKey, options: &OperationOptions) -> Result<Release> {
        ReleaseError::check_key(key)?;
        let scope = Scope::new(key, "delete", options);

        let _guard = scope.run(async { Ok(self.locks.lock(key).await) }).await?;
        let removed = self.store.delete(key).await?;
        let last = removed
            .last()
            .ok_or_else(|| ReleaseError::NotFound { key: key.clone() })?;

        tracing::info!(release = %key, revision = last.number(), "Release deleted");
        Ok(last.with_status(ReleaseStatus::Deleted))
    }

    pub async fn start(&self, key: &ReleaseKey, options: &OperationOptions) -> Result<Release> {
        self.transition(key, "start", ReleaseStatus::Deployed, options)
            .await
    }

    pub async fn stop(&self, key: &ReleaseKey, options: &OperationOptions) -> Result<Release> {
        self.transition(key, "stop", ReleaseStatus::Stopped, options)
            .await
    }

    async fn transition(
        &self,
        key: &ReleaseKey,
        operation: &'static str,
        status: ReleaseStatus,
        options: &OperationOptions,
    ) -> Result<Release> {
        ReleaseError::check_key(key)?;
        let scope = Scope::new(key, operation, options);

        let _guard = scope.run(async { Ok(self.locks.lock(key).await) }).await?;
        let current = self.store.get(key).await?;

        match status {
            ReleaseStatus::Stopped => {
                self.reconciler
                    .deactivate(&key.namespace, current.manifest())
                    .await?
            }
            _ => {
                self.reconciler
                    .activate(&key.namespace, current.manifest())
                    .await?
            }
        }

        let updated = current.with_status(status);
        self.store.put(&updated).await?;
        tracing::info!(release = %key, revision = updated.number(), %status, "status changed");
        Ok(updated)
    }

    // ============ Queries ============

    /// Head revision, with the live set when the cluster answers
    pub async fn get(&self, key: &ReleaseKey) -> Result<Release> {
        ReleaseError::check_key(key)?;
        let mut release = self.store.get(key).await?;
        match self.reconciler.query(&key.namespace, release.manifest()).await {
            Ok(live) => release.live = live,
            Err(e) => tracing::warn!(release = %key, "cannot query live resources: {}", e),
        }
        Ok(release)
    }

    pub async fn history(&self, key: &ReleaseKey) -> Result<Vec<Release>> {
        ReleaseError::check_key(key)?;
        self.store.list_revisions(key).await
    }

    pub async fn list(&self, namespace: Option<&str>) -> Result<Vec<Release>> {
        if let Some(namespace) = namespace {
            ReleaseError::check_namespace(namespace)?;
        }
        self.store.list(namespace).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::{MockReconciler, ReconcileCall, StaticCapabilities};
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use keel_core::{EngineConfig, Pack, PackMetadata, Package, Values};
    use keel_repo::{RepoError, VersionConstraint};
    use semver::Version;
    use std::collections::BTreeMap;

    const CONFIGMAP: &str = r#"apiVersion: v1
kind: ConfigMap
metadata:
  name: {{ release.name }}-config
data:
  replica: "{{ values.replica }}"
  revision: "{{ release.revision }}"
"#;

    const DEPLOYMENT: &str = r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: {{ release.name }}
spec:
  replicas: {{ values.replica }}
  template:
    spec:
      containers:
        - name: app
          image: "app:{{ pack.version }}"
"#;

    const HOOKS: &str = r#"apiVersion: batch/v1
kind: Job
metadata:
  name: {{ release.name }}-migrate
  annotations:
    keel.io/hook: pre-install,pre-upgrade
---
apiVersion: batch/v1
kind: Job
metadata:
  name: {{ release.name }}-cleanup
  annotations:
    helm.sh/hook: pre-delete
"#;

    fn package(version: &str, engine: EngineConfig) -> Package {
        let pack = Pack {
            api_version: "keel/v1".into(),
            metadata: PackMetadata {
                name: "app1".into(),
                version: Version::parse(version).unwrap(),
                description: None,
                app_version: None,
            },
            engine,
        };
        let templates: BTreeMap<String, String> = [
            ("app1/templates/configmap.yaml", CONFIGMAP),
            ("app1/templates/deployment.yaml", DEPLOYMENT),
            ("app1/templates/hooks.yaml", HOOKS),
            (
                "app1/templates/NOTES.txt",
                "{{ release.name }} revision {{ release.revision }} is up",
            ),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Package::new(pack, Values::from_yaml("replica: 2\n").unwrap(), templates)
    }

    struct FakeSource {
        packages: Vec<Package>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl PackageSource for FakeSource {
        async fn fetch(
            &self,
            _location: &str,
            name: &str,
            constraint: &str,
        ) -> keel_repo::Result<Package> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let constraint = VersionConstraint::parse(constraint)?;
            self.packages
                .iter()
                .filter(|p| p.name() == name && constraint.matches(p.version()))
                .max_by(|a, b| a.version().cmp(b.version()))
                .cloned()
                .ok_or_else(|| RepoError::PackNotFound {
                    name: name.to_string(),
                    repo: "fake".to_string(),
                })
        }
    }

    struct Harness {
        manager: Arc<ReleaseManager>,
        store: MemoryStore,
        reconciler: Arc<MockReconciler>,
    }

    fn harness_with(source: FakeSource) -> Harness {
        let store = MemoryStore::new();
        let reconciler = Arc::new(MockReconciler::new());
        let manager = ReleaseManager::new(
            Arc::new(source),
            Arc::new(store.clone()),
            reconciler.clone(),
            Arc::new(StaticCapabilities::default()),
        );
        Harness {
            manager: Arc::new(manager),
            store,
            reconciler,
        }
    }

    fn harness() -> Harness {
        harness_with(FakeSource {
            packages: vec![
                package("1.0.0", EngineConfig::default()),
                package("2.0.0", EngineConfig::default()),
            ],
            delay: None,
        })
    }

    fn key() -> ReleaseKey {
        ReleaseKey::new("default", "app1")
    }

    fn request(version: &str, overlay: &str) -> ReleaseRequest {
        ReleaseRequest::new(
            key(),
            PackageRef::new("file:///packs", "app1", version),
            ValueOverlay::new(overlay),
        )
    }

    fn opts() -> OperationOptions {
        OperationOptions::default()
    }

    #[tokio::test]
    async fn test_install_creates_revision_one() {
        let h = harness();
        let release = h
            .manager
            .install(&request("1.0.0", "replica: 1\n"), &opts())
            .await
            .unwrap();

        assert_eq!(release.number(), 1);
        assert_eq!(release.status, ReleaseStatus::Deployed);
        assert_eq!(release.notes(), Some("app1 revision 1 is up"));
        assert_eq!(release.live.len(), 2);

        // stored manifest equals the rendered, classified output
        let pkg = package("1.0.0", EngineConfig::default());
        let ctx = RenderContext::new(
            ReleaseInfo::for_install("app1", "default"),
            Default::default(),
        );
        let rendered = Renderer::default()
            .render(&pkg, &ValueOverlay::new("replica: 1\n"), &ctx)
            .unwrap();
        let classified = classify(&rendered.manifests, "app1", &Default::default()).unwrap();

        let stored = h.manager.get(&key()).await.unwrap();
        assert_eq!(stored.manifest(), manifest_text(&classified.resources));
        assert!(stored.manifest().contains("replica: \"1\""));
        assert!(!stored.manifest().contains("is up"));
        assert!(!stored.manifest().contains("migrate"));
        assert_eq!(stored.revision.overlay.as_str(), "replica: 1\n");
    }

    #[tokio::test]
    async fn test_install_applies_hooks_then_resources() {
        let h = harness();
        h.manager
            .install(&request("1.0.0", ""), &opts())
            .await
            .unwrap();

        let applied: Vec<String> = h
            .reconciler
            .applied()
            .iter()
            .map(|r| format!("{}/{}", r.kind, r.name))
            .collect();
        assert_eq!(
            applied,
            vec!["Job/app1-migrate", "ConfigMap/app1-config", "Deployment/app1"]
        );
    }

    #[tokio::test]
    async fn test_install_existing_fails_without_mutation() {
        let h = harness();
        h.manager
            .install(&request("1.0.0", ""), &opts())
            .await
            .unwrap();
        let before = h.store.operation_counts();

        let err = h
            .manager
            .install(&request("2.0.0", ""), &opts())
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::AlreadyExists { .. }));
        assert_eq!(h.store.operation_counts().mutations(), before.mutations());
        assert_eq!(h.manager.get(&key()).await.unwrap().number(), 1);
    }

    #[tokio::test]
    async fn test_pre_operations_do_not_mutate() {
        let h = harness();

        let planned = h
            .manager
            .pre_install(&request("1.0.0", ""), &opts())
            .await
            .unwrap();
        assert_eq!(planned.number(), 1);
        let names: Vec<_> = planned.hooks().iter().map(|hk| hk.name.as_str()).collect();
        assert_eq!(names, vec!["app1-migrate", "app1-cleanup"]);
        assert_eq!(h.store.operation_counts().mutations(), 0);
        assert!(h.reconciler.calls().is_empty());

        let err = h
            .manager
            .pre_upgrade(&request("2.0.0", ""), &opts())
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::NotFound { .. }));

        h.manager
            .install(&request("1.0.0", ""), &opts())
            .await
            .unwrap();
        let before = h.store.operation_counts().mutations();

        let planned = h
            .manager
            .pre_upgrade(&request("2.0.0", ""), &opts())
            .await
            .unwrap();
        assert_eq!(planned.number(), 2);
        assert_eq!(planned.hooks_for(HookEvent::PreUpgrade).len(), 1);
        assert_eq!(h.store.operation_counts().mutations(), before);

        let err = h
            .manager
            .pre_install(&request("1.0.0", ""), &opts())
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_upgrade_then_rollback() {
        let h = harness();
        let r1 = h
            .manager
            .install(&request("1.0.0", "replica: 1\n"), &opts())
            .await
            .unwrap();
        let r2 = h
            .manager
            .upgrade(&request("2.0.0", "replica: 3\n"), &opts())
            .await
            .unwrap();
        assert_eq!(r2.number(), r1.number() + 1);
        assert!(r2.manifest().contains("app:2.0.0"));
        assert!(r2.manifest().contains("revision: \"2\""));

        let r3 = h.manager.rollback(&key(), 1, &opts()).await.unwrap();
        assert_eq!(r3.number(), r2.number() + 1);
        assert_eq!(r3.manifest(), r1.manifest());
        assert_eq!(r3.revision.overlay, r1.revision.overlay);
        assert_eq!(r3.revision.description, "Rollback to 1");

        let statuses: Vec<_> = h
            .manager
            .history(&key())
            .await
            .unwrap()
            .iter()
            .map(|r| (r.number(), r.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                (1, ReleaseStatus::Superseded),
                (2, ReleaseStatus::Superseded),
                (3, ReleaseStatus::Deployed)
            ]
        );
    }

    #[tokio::test]
    async fn test_rollback_unknown_targets() {
        let h = harness();
        let err = h.manager.rollback(&key(), 1, &opts()).await.unwrap_err();
        assert!(matches!(err, ReleaseError::NotFound { .. }));

        h.manager
            .install(&request("1.0.0", ""), &opts())
            .await
            .unwrap();
        let err = h.manager.rollback(&key(), 9, &opts()).await.unwrap_err();
        assert!(matches!(err, ReleaseError::RevisionNotFound { revision: 9, .. }));
        assert_eq!(h.manager.get(&key()).await.unwrap().number(), 1);
    }

    #[tokio::test]
    async fn test_upgrade_absent_is_not_found() {
        let h = harness();
        let err = h
            .manager
            .upgrade(&request("2.0.0", ""), &opts())
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::NotFound { .. }));
        assert_eq!(h.store.release_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_names_are_rejected_before_any_work() {
        let h = harness();
        let escaped = ReleaseKey::new("default", "../../escaped");

        let mut req = request("1.0.0", "");
        req.key = escaped.clone();
        let err = h.manager.install(&req, &opts()).await.unwrap_err();
        assert!(matches!(err, ReleaseError::InvalidName { .. }));
        assert!(err.to_string().contains("../../escaped"));

        assert!(matches!(
            h.manager.rollback(&escaped, 1, &opts()).await,
            Err(ReleaseError::InvalidName { .. })
        ));
        assert!(matches!(
            h.manager.stop(&ReleaseKey::new("Prod", "app1"), &opts()).await,
            Err(ReleaseError::InvalidName { .. })
        ));
        assert!(matches!(
            h.manager.list(Some("../..")).await,
            Err(ReleaseError::InvalidName { .. })
        ));

        assert_eq!(h.store.operation_counts().mutations(), 0);
        assert!(h.reconciler.calls().is_empty());
    }

    #[tokio::test]
    async fn test_delete_returns_snapshot() {
        let h = harness();
        h.manager
            .install(&request("1.0.0", ""), &opts())
            .await
            .unwrap();
        h.manager
            .upgrade(&request("2.0.0", ""), &opts())
            .await
            .unwrap();

        let deleted = h.manager.delete(&key(), &opts()).await.unwrap();
        assert_eq!(deleted.status, ReleaseStatus::Deleted);
        assert_eq!(deleted.number(), 2);
        assert!(!deleted.manifest().is_empty());
        assert_eq!(deleted.hooks_for(HookEvent::PreDelete)[0].name, "app1-cleanup");

        assert!(matches!(
            h.manager.get(&key()).await,
            Err(ReleaseError::NotFound { .. })
        ));
        let err = h.manager.delete(&key(), &opts()).await.unwrap_err();
        assert!(matches!(err, ReleaseError::NotFound { .. }));
        assert_eq!(h.store.release_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_and_start_keep_revision() {
        let h = harness();
        h.manager
            .install(&request("1.0.0", ""), &opts())
            .await
            .unwrap();

        let stopped = h.manager.stop(&key(), &opts()).await.unwrap();
        assert_eq!(stopped.status, ReleaseStatus::Stopped);
        assert_eq!(stopped.number(), 1);

        let started = h.manager.start(&key(), &opts()).await.unwrap();
        assert_eq!(started.status, ReleaseStatus::Deployed);
        assert_eq!(started.number(), 1);

        let calls = h.reconciler.calls();
        assert!(calls.contains(&ReconcileCall::Deactivate));
        assert_eq!(calls.last(), Some(&ReconcileCall::Activate));
        assert_eq!(h.manager.history(&key()).await.unwrap().len(), 1);

        let err = h
            .manager
            .stop(&ReleaseKey::new("default", "ghost"), &opts())
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::NotFound { .. }));
    }

    fn deactivations(h: &Harness) -> usize {
        h.reconciler
            .calls()
            .iter()
            .filter(|c| **c == ReconcileCall::Deactivate)
            .count()
    }

    #[tokio::test]
    async fn test_stop_after_upgrading_a_stopped_release() {
        let h = harness();
        h.manager
            .install(&request("1.0.0", "replica: 2\n"), &opts())
            .await
            .unwrap();
        h.manager.stop(&key(), &opts()).await.unwrap();
        assert_eq!(h.reconciler.replicas("app1"), Some(0));

        let upgraded = h
            .manager
            .upgrade(&request("2.0.0", "replica: 3\n"), &opts())
            .await
            .unwrap();
        assert_eq!(upgraded.status, ReleaseStatus::Deployed);
        assert_eq!(h.reconciler.replicas("app1"), Some(3));

        let stopped = h.manager.stop(&key(), &opts()).await.unwrap();
        assert_eq!(stopped.status, ReleaseStatus::Stopped);
        assert_eq!(stopped.number(), 2);
        assert_eq!(deactivations(&h), 2);
        assert_eq!(h.reconciler.replicas("app1"), Some(0));

        h.manager.start(&key(), &opts()).await.unwrap();
        assert_eq!(h.reconciler.replicas("app1"), Some(3));
    }

    #[tokio::test]
    async fn test_stop_after_rolling_back_a_stopped_release() {
        let h = harness();
        h.manager
            .install(&request("1.0.0", "replica: 2\n"), &opts())
            .await
            .unwrap();
        h.manager
            .upgrade(&request("2.0.0", "replica: 4\n"), &opts())
            .await
            .unwrap();
        h.manager.stop(&key(), &opts()).await.unwrap();

        let rolled_back = h.manager.rollback(&key(), 1, &opts()).await.unwrap();
        assert_eq!(rolled_back.number(), 3);
        assert_eq!(rolled_back.status, ReleaseStatus::Deployed);
        assert_eq!(h.reconciler.replicas("app1"), Some(2));

        let stopped = h.manager.stop(&key(), &opts()).await.unwrap();
        assert_eq!(stopped.status, ReleaseStatus::Stopped);
        assert_eq!(deactivations(&h), 2);
        assert_eq!(h.reconciler.replicas("app1"), Some(0));

        // the count from before the rollback must not come back
        let started = h.manager.start(&key(), &opts()).await.unwrap();
        assert_eq!(started.status, ReleaseStatus::Deployed);
        assert_eq!(h.reconciler.replicas("app1"), Some(2));
        assert_eq!(h.reconciler.calls().last(), Some(&ReconcileCall::Activate));
    }

    #[tokio::test]
    async fn test_partial_apply_is_stored_as_failed() {
        let h = harness();
        h.reconciler.fail_on_kind("Deployment");

        let err = h
            .manager
            .install(&request("1.0.0", ""), &opts())
            .await
            .unwrap_err();
        let committed = err.committed_release().unwrap();
        assert_eq!(committed.status, ReleaseStatus::Failed);
        assert_eq!(committed.number(), 1);
        assert_eq!(
            h.store.get(&key()).await.unwrap().status,
            ReleaseStatus::Failed
        );

        // a failed release can be upgraded
        h.reconciler.fail_on_kind("Nothing");
        let r2 = h
            .manager
            .upgrade(&request("2.0.0", ""), &opts())
            .await
            .unwrap();
        assert_eq!(r2.number(), 2);
        assert_eq!(r2.status, ReleaseStatus::Deployed);
    }

    /// Reads pass through, every write is refused
    struct ReadOnlyStore(MemoryStore);

    #[async_trait]
    impl ReleaseStore for ReadOnlyStore {
        async fn get(&self, key: &ReleaseKey) -> Result<Release> {
            self.0.get(key).await
        }

        async fn put(&self, _release: &Release) -> Result<()> {
            Err(ReleaseError::storage("disk full"))
        }

        async fn list_revisions(&self, key: &ReleaseKey) -> Result<Vec<Release>> {
            self.0.list_revisions(key).await
        }

        async fn delete(&self, key: &ReleaseKey) -> Result<Vec<Release>> {
            self.0.delete(key).await
        }

        async fn list(&self, namespace: Option<&str>) -> Result<Vec<Release>> {
            self.0.list(namespace).await
        }
    }

    #[tokio::test]
    async fn test_partial_apply_survives_store_failure() {
        let reconciler = Arc::new(MockReconciler::new());
        reconciler.fail_on_kind("Deployment");
        let manager = ReleaseManager::new(
            Arc::new(FakeSource {
                packages: vec![package("1.0.0", EngineConfig::default())],
                delay: None,
            }),
            Arc::new(ReadOnlyStore(MemoryStore::new())),
            reconciler.clone(),
            Arc::new(StaticCapabilities::default()),
        );

        let err = manager
            .install(&request("1.0.0", ""), &opts())
            .await
            .unwrap_err();

        assert!(matches!(err, ReleaseError::PartialApply { .. }), "got {err}");
        assert!(err.committed_release().is_none());
        let attempted = err.partial_release().unwrap();
        assert_eq!(attempted.number(), 1);
        assert_eq!(attempted.status, ReleaseStatus::Failed);
        assert!(err.store_error().unwrap().to_string().contains("disk full"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[tokio::test]
    async fn test_store_failure_after_clean_apply() {
        let manager = ReleaseManager::new(
            Arc::new(FakeSource {
                packages: vec![package("1.0.0", EngineConfig::default())],
                delay: None,
            }),
            Arc::new(ReadOnlyStore(MemoryStore::new())),
            Arc::new(MockReconciler::new()),
            Arc::new(StaticCapabilities::default()),
        );

        let err = manager
            .install(&request("1.0.0", ""), &opts())
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::Storage { .. }), "got {err}");
    }

    #[tokio::test]
    async fn test_query_failure_after_commit() {
        let h = harness();
        h.reconciler.fail_queries(true);

        let err = h
            .manager
            .install(&request("1.0.0", ""), &opts())
            .await
            .unwrap_err();
        let committed = err.committed_release().unwrap();
        assert_eq!(committed.status, ReleaseStatus::Deployed);
        assert_eq!(
            h.store.get(&key()).await.unwrap().status,
            ReleaseStatus::Deployed
        );
    }

    #[tokio::test]
    async fn test_concurrent_installs_one_wins() {
        let h = harness();
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let manager = h.manager.clone();
                tokio::spawn(async move {
                    manager
                        .install(&request("1.0.0", ""), &OperationOptions::default())
                        .await
                })
            })
            .collect();

        let mut ok = 0;
        let mut exists = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => ok += 1,
                Err(ReleaseError::AlreadyExists { .. }) => exists += 1,
                Err(other) => panic!("unexpected: {other}"),
            }
        }
        assert_eq!((ok, exists), (1, 7));
        assert_eq!(h.manager.history(&key()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let h = harness();
        let options = OperationOptions::default();
        options.cancel.cancel();

        let err = h
            .manager
            .install(&request("1.0.0", ""), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::Cancelled { .. }));
        assert_eq!(h.store.release_count(), 0);
    }

    #[tokio::test]
    async fn test_slow_resolution_times_out() {
        let h = harness_with(FakeSource {
            packages: vec![package("1.0.0", EngineConfig::default())],
            delay: Some(Duration::from_secs(5)),
        });
        let options = OperationOptions::default().with_timeout(Duration::from_millis(20));

        let err = h
            .manager
            .install(&request("1.0.0", ""), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::Timeout { .. }));
        assert_eq!(h.store.release_count(), 0);
        assert!(h.reconciler.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_package_and_incompatible_engine() {
        let h = harness();
        let err = h
            .manager
            .install(&request("9.9.9", ""), &opts())
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::PackageNotFound { .. }));

        let h = harness_with(FakeSource {
            packages: vec![package(
                "1.0.0",
                EngineConfig {
                    requires: Some(">=99.0.0".into()),
                    ..Default::default()
                },
            )],
            delay: None,
        });
        let err = h
            .manager
            .install(&request("", ""), &opts())
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::EngineIncompatible { .. }));
        assert_eq!(h.store.release_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_overlay_is_render_error() {
        let h = harness();
        let err = h
            .manager
            .install(&request("1.0.0", "replica: null\nextra: [1"), &opts())
            .await
            .unwrap_err();
        assert!(matches!(err, ReleaseError::Render { revision: 1, .. }));
    }
}
