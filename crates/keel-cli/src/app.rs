//! Wiring of the release manager from configuration

use keel_core::ReleaseKey;
use keel_release::{
    CapabilitySource, FileStore, HookEvent, KubeCapabilities, KubeReconciler, OfflineReconciler,
    OperationOptions, Reconciler, Release, ReleaseManager, ResourceRef, StaticCapabilities,
    order::hooks_manifest, reconciler::parse_refs,
};
use keel_repo::{ArchiveCache, Resolver};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::KeelConfig;
use crate::error::Result;

/// Everything a lifecycle command needs
pub struct App {
    pub config: KeelConfig,
    manager: ReleaseManager,
    reconciler: Arc<dyn Reconciler>,
    cluster: Option<Arc<KubeReconciler>>,
    cancel: CancellationToken,
}

/// Resolver with the on-disk archive cache attached
pub fn resolver(config: &KeelConfig) -> Result<Resolver> {
    let cache = ArchiveCache::open_at(&config.cache_dir()?)?;
    Ok(Resolver::new()?.with_cache(Arc::new(cache)))
}

/// Token cancelled on the first Ctrl-C
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling");
            trigger.cancel();
        }
    });
    token
}

impl App {
    /// Build the manager; a cluster is contacted only when `cluster` is set
    /// and the configuration is not offline
    pub async fn connect(config: KeelConfig, cluster: bool) -> Result<Self> {
        let store = FileStore::new(config.storage_dir()?, config.compression)?;
        let source = resolver(&config)?;

        let (reconciler, capabilities, kube): (
            Arc<dyn Reconciler>,
            Arc<dyn CapabilitySource>,
            Option<Arc<KubeReconciler>>,
        ) = if cluster && !config.offline {
            let kube = Arc::new(KubeReconciler::try_default().await?);
            let capabilities = KubeCapabilities::new(kube.client().clone());
            (kube.clone(), Arc::new(capabilities), Some(kube))
        } else {
            let capabilities = StaticCapabilities(config.capabilities.to_capabilities());
            (Arc::new(OfflineReconciler), Arc::new(capabilities), None)
        };

        tracing::debug!(
            storage = %store.base_dir().display(),
            offline = kube.is_none(),
            "release manager ready"
        );

        let manager = ReleaseManager::new(
            Arc::new(source),
            Arc::new(store),
            reconciler.clone(),
            capabilities,
        );

        Ok(Self {
            config,
            manager,
            reconciler,
            cluster: kube,
            cancel: interrupt_token(),
        })
    }

    pub fn manager(&self) -> &ReleaseManager {
        &self.manager
    }

    pub fn key(&self, name: &str) -> ReleaseKey {
        ReleaseKey::new(&self.config.namespace, name)
    }

    pub fn options(&self) -> OperationOptions {
        let options = OperationOptions::default().with_cancel(self.cancel.clone());
        match self.config.timeout {
            Some(timeout) => options.with_timeout(timeout),
            None => options,
        }
    }

    /// Remove the objects of a deleted release, running its delete hooks.
    ///
    /// Offline, nothing is touched and the manifest objects are reported.
    pub async fn teardown(&self, release: &Release, keep_resources: bool) -> Result<Vec<ResourceRef>> {
        let Some(cluster) = &self.cluster else {
            return Ok(parse_refs(release.manifest()));
        };
        let namespace = &release.namespace;

        let pre = release.hooks_for(HookEvent::PreDelete);
        if !pre.is_empty() {
            self.reconciler.apply(namespace, &hooks_manifest(&pre)).await?;
        }

        let deleted = if keep_resources {
            Vec::new()
        } else {
            cluster.delete_manifest(namespace, release.manifest()).await?
        };

        let post = release.hooks_for(HookEvent::PostDelete);
        if !post.is_empty() {
            self.reconciler.apply(namespace, &hooks_manifest(&post)).await?;
        }

        Ok(deleted)
    }
}
