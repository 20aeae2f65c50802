//! Snapshotter for `snapshot.storage.k8s.io/v1alpha1`

use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::Client;
use tracing::{debug, info, warn};

#[cfg(test)]
use mockall::automock;

use super::{content_name_for, select_class, ApiGeneration, Snapshot, Snapshotter, Source};
use crate::crd::alpha::{
    CsiVolumeSnapshotSource, VolumeSnapshot, VolumeSnapshotClass, VolumeSnapshotContent,
};
use crate::crd::{CONTENT_KIND, PVC_KIND, SNAPSHOT_KIND};
use crate::kube_utils;
use crate::poll::{self, PollConfig, WaitContext};
use crate::Error;

/// Object store for the v1alpha1 snapshot schema
///
/// This trait allows mocking the cluster in tests while using the real
/// client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AlphaStore: Send + Sync {
    /// List every VolumeSnapshotClass
    async fn list_classes(&self) -> Result<Vec<VolumeSnapshotClass>, Error>;

    /// Get a VolumeSnapshotClass by name
    async fn get_class(&self, name: &str) -> Result<VolumeSnapshotClass, Error>;

    /// Get a PersistentVolumeClaim
    async fn get_claim(&self, name: &str, namespace: &str)
        -> Result<PersistentVolumeClaim, Error>;

    /// Submit a VolumeSnapshot
    async fn create_snapshot(&self, snapshot: &VolumeSnapshot) -> Result<VolumeSnapshot, Error>;

    /// Get a VolumeSnapshot
    async fn get_snapshot(&self, name: &str, namespace: &str) -> Result<VolumeSnapshot, Error>;

    /// Delete a VolumeSnapshot
    async fn delete_snapshot(&self, name: &str, namespace: &str) -> Result<(), Error>;

    /// Submit a VolumeSnapshotContent
    async fn create_content(
        &self,
        content: &VolumeSnapshotContent,
    ) -> Result<VolumeSnapshotContent, Error>;

    /// Get a VolumeSnapshotContent
    async fn get_content(&self, name: &str) -> Result<VolumeSnapshotContent, Error>;
}

/// [`AlphaStore`] backed by the Kubernetes API
pub struct KubeAlphaStore {
    client: Client,
}

impl KubeAlphaStore {
    /// Wrap the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AlphaStore for KubeAlphaStore {
    async fn list_classes(&self) -> Result<Vec<VolumeSnapshotClass>, Error> {
        kube_utils::list_cluster(&self.client).await
    }

    async fn get_class(&self, name: &str) -> Result<VolumeSnapshotClass, Error> {
        kube_utils::get_cluster(&self.client, name).await
    }

    async fn get_claim(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<PersistentVolumeClaim, Error> {
        kube_utils::get_namespaced(&self.client, name, namespace).await
    }

    async fn create_snapshot(&self, snapshot: &VolumeSnapshot) -> Result<VolumeSnapshot, Error> {
        let namespace = snapshot.metadata.namespace.as_deref().unwrap_or("default");
        kube_utils::create_namespaced(&self.client, namespace, snapshot).await
    }

    async fn get_snapshot(&self, name: &str, namespace: &str) -> Result<VolumeSnapshot, Error> {
        kube_utils::get_namespaced(&self.client, name, namespace).await
    }

    async fn delete_snapshot(&self, name: &str, namespace: &str) -> Result<(), Error> {
        kube_utils::delete_namespaced::<VolumeSnapshot>(&self.client, name, namespace).await
    }

    async fn create_content(
        &self,
        content: &VolumeSnapshotContent,
    ) -> Result<VolumeSnapshotContent, Error> {
        kube_utils::create_cluster(&self.client, content).await
    }

    async fn get_content(&self, name: &str) -> Result<VolumeSnapshotContent, Error> {
        kube_utils::get_cluster(&self.client, name).await
    }
}

/// [`Snapshotter`] for clusters serving v1alpha1
pub struct AlphaSnapshotter<S = KubeAlphaStore> {
    store: S,
    poll: PollConfig,
}

impl AlphaSnapshotter<KubeAlphaStore> {
    /// Snapshotter talking to the cluster behind `client`
    pub fn from_client(client: Client, poll: PollConfig) -> Self {
        Self::new(KubeAlphaStore::new(client), poll)
    }
}

impl<S: AlphaStore> AlphaSnapshotter<S> {
    /// Snapshotter over an arbitrary store
    pub fn new(store: S, poll: PollConfig) -> Self {
        Self { store, poll }
    }

    async fn ready_snapshot_content(
        &self,
        ctx: &WaitContext,
        name: &str,
        namespace: &str,
    ) -> Result<(VolumeSnapshot, VolumeSnapshotContent), Error> {
        let snap = ctx
            .run("get_source", self.store.get_snapshot(name, namespace))
            .await?;
        if !snap.is_ready_to_use() {
            return Err(Error::precondition(
                SNAPSHOT_KIND,
                name,
                namespace,
                "snapshot is not ready to use",
            ));
        }
        let content_name = snap.bound_content_name().ok_or_else(|| {
            Error::precondition(
                SNAPSHOT_KIND,
                name,
                namespace,
                "snapshot is not bound to a VolumeSnapshotContent",
            )
        })?;
        let content = ctx
            .run("get_source", self.store.get_content(content_name))
            .await?;
        Ok((snap, content))
    }
}

#[async_trait]
impl<S: AlphaStore> Snapshotter for AlphaSnapshotter<S> {
    fn generation(&self) -> ApiGeneration {
        ApiGeneration::Alpha
    }

    async fn get_volume_snapshot_class(
        &self,
        ctx: &WaitContext,
        annotation_key: &str,
    ) -> Result<String, Error> {
        let classes = ctx
            .run("get_volume_snapshot_class", self.store.list_classes())
            .await
            .map_err(|e| e.context("failed to get VolumeSnapshotClasses in the cluster"))?;
        select_class(classes.iter().map(|c| &c.metadata), annotation_key)
    }

    async fn create(
        &self,
        ctx: &WaitContext,
        name: &str,
        namespace: &str,
        volume_claim: &str,
        class: Option<&str>,
        wait_for_ready: bool,
    ) -> Result<(), Error> {
        match ctx
            .run("create", self.store.get_claim(volume_claim, namespace))
            .await
        {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                return Err(Error::precondition(
                    PVC_KIND,
                    volume_claim,
                    namespace,
                    "failed to find PVC to snapshot",
                ))
            }
            Err(e) => {
                return Err(e.context(format!("failed to query PVC {}/{}", namespace, volume_claim)))
            }
        }

        let snap = VolumeSnapshot::for_claim(name, namespace, volume_claim, class);
        ctx.run("create", self.store.create_snapshot(&snap)).await?;
        info!(snapshot = %name, namespace = %namespace, claim = %volume_claim, "created VolumeSnapshot");

        if !wait_for_ready {
            return Ok(());
        }
        self.wait_on_ready_to_use(ctx, name, namespace).await?;
        ctx.run("create", self.store.get_snapshot(name, namespace))
            .await?;
        Ok(())
    }

    async fn get(&self, ctx: &WaitContext, name: &str, namespace: &str) -> Result<Snapshot, Error> {
        ctx.run("get", self.store.get_snapshot(name, namespace))
            .await
            .map(Snapshot::Alpha)
    }

    async fn delete(&self, ctx: &WaitContext, name: &str, namespace: &str) -> Result<(), Error> {
        match ctx
            .run("delete", self.store.delete_snapshot(name, namespace))
            .await
        {
            Ok(()) => {
                info!(snapshot = %name, namespace = %namespace, "deleted VolumeSnapshot");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(snapshot = %name, namespace = %namespace, "VolumeSnapshot already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn get_source(
        &self,
        ctx: &WaitContext,
        name: &str,
        namespace: &str,
    ) -> Result<Source, Error> {
        let (snap, content) = self
            .ready_snapshot_content(ctx, name, namespace)
            .await
            .map_err(|e| {
                e.context(format!(
                    "failed to get source of VolumeSnapshot {}/{}",
                    namespace, name
                ))
            })?;
        let content_name = content.metadata.name.as_deref().unwrap_or_default();
        let csi = content.spec.csi.as_ref().ok_or_else(|| {
            Error::precondition_cluster(
                CONTENT_KIND,
                content_name,
                "content has no CSI snapshot source",
            )
        })?;
        Ok(Source {
            handle: csi.snapshot_handle.clone(),
            driver: csi.driver.clone(),
            restore_size: csi.restore_size,
            volume_snapshot_class_name: content
                .spec
                .snapshot_class_name
                .clone()
                .or_else(|| snap.spec.volume_snapshot_class_name.clone()),
        })
    }

    async fn create_from_source(
        &self,
        ctx: &WaitContext,
        source: &Source,
        name: &str,
        namespace: &str,
        wait_for_ready: bool,
    ) -> Result<(), Error> {
        let class_name = source
            .volume_snapshot_class_name
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                Error::precondition(
                    SNAPSHOT_KIND,
                    name,
                    namespace,
                    "source does not name a VolumeSnapshotClass",
                )
            })?;
        let class = ctx
            .run("create_from_source", self.store.get_class(class_name))
            .await
            .map_err(|e| {
                e.context(format!(
                    "failed to get VolumeSnapshotClass {} for VolumeSnapshot {}/{}",
                    class_name, namespace, name
                ))
            })?;

        let content_name = content_name_for(name);
        let content = VolumeSnapshotContent::pre_provisioned(
            &content_name,
            CsiVolumeSnapshotSource {
                driver: source.driver.clone(),
                snapshot_handle: source.handle.clone(),
                creation_time: None,
                restore_size: source.restore_size,
            },
            name,
            namespace,
            Some(class_name),
            class.deletion_policy,
        );
        ctx.run("create_from_source", self.store.create_content(&content))
            .await
            .map_err(|e| e.context(format!("failed to create content {}", content_name)))?;
        debug!(content = %content_name, snapshot = %name, namespace = %namespace, "created VolumeSnapshotContent");

        let snap = VolumeSnapshot::for_content(name, namespace, &content_name, Some(class_name));
        if let Err(e) = ctx
            .run("create_from_source", self.store.create_snapshot(&snap))
            .await
        {
            warn!(
                content = %content_name,
                snapshot = %name,
                namespace = %namespace,
                error = %e,
                "VolumeSnapshot not created, VolumeSnapshotContent left in place"
            );
            return Err(e.context(format!(
                "failed to create VolumeSnapshot {}/{} for VolumeSnapshotContent {}",
                namespace, name, content_name
            )));
        }
        info!(snapshot = %name, namespace = %namespace, content = %content_name, "created VolumeSnapshot from source");

        if wait_for_ready {
            self.wait_on_ready_to_use(ctx, name, namespace).await?;
        }
        Ok(())
    }

    async fn wait_on_ready_to_use(
        &self,
        ctx: &WaitContext,
        name: &str,
        namespace: &str,
    ) -> Result<(), Error> {
        let store = &self.store;
        poll::wait(ctx, &self.poll, "wait_on_ready_to_use", || async move {
            let snap = store.get_snapshot(name, namespace).await?;
            if let Some(message) = snap.error_message() {
                return Err(Error::snapshot_failed(name, namespace, message));
            }
            Ok(snap.is_ready_to_use())
        })
        .await
    }

    async fn clone_snapshot(
        &self,
        ctx: &WaitContext,
        name: &str,
        namespace: &str,
        clone_name: &str,
        clone_namespace: &str,
        wait_for_ready: bool,
    ) -> Result<(), Error> {
        let snap = ctx
            .run("clone", self.store.get_snapshot(name, namespace))
            .await
            .map_err(|e| {
                e.context(format!(
                    "failed to get original VolumeSnapshot {}/{}",
                    namespace, name
                ))
            })?;
        if !snap.is_ready_to_use() {
            return Err(Error::precondition(
                SNAPSHOT_KIND,
                clone_name,
                clone_namespace,
                format!("original snapshot {}/{} is not ready", namespace, name),
            ));
        }
        if snap.bound_content_name().is_none() {
            return Err(Error::precondition(
                SNAPSHOT_KIND,
                clone_name,
                clone_namespace,
                format!("original snapshot {}/{} does not have content", namespace, name),
            ));
        }

        match ctx
            .run("clone", self.store.get_snapshot(clone_name, clone_namespace))
            .await
        {
            Ok(_) => {
                return Err(Error::already_exists(
                    SNAPSHOT_KIND,
                    clone_name,
                    clone_namespace,
                ))
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                return Err(e.context(format!(
                    "failed to check for target VolumeSnapshot {}/{}",
                    clone_namespace, clone_name
                )))
            }
        }

        let source = self.get_source(ctx, name, namespace).await?;
        self.create_from_source(ctx, &source, clone_name, clone_namespace, wait_for_ready)
            .await
    }
}
