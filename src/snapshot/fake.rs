//! In-memory snapshot platform for tests
//!
//! Stores generation-neutral records and renders them through either schema,
//! so the same scenario can be replayed against both backends. A tiny
//! snapshot controller runs on every `get_snapshot`: it binds snapshots to
//! content and marks them ready once they have been observed enough times.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};

use super::alpha::{AlphaSnapshotter, AlphaStore};
use super::beta::{BetaSnapshotter, BetaStore};
use super::{ApiGeneration, Snapshotter};
use crate::crd::{alpha, beta, DeletionPolicy, CLASS_KIND, CONTENT_KIND, PVC_KIND, SNAPSHOT_KIND};
use crate::poll::PollConfig;
use crate::Error;

#[derive(Clone, Debug)]
struct ClassRecord {
    name: String,
    annotations: BTreeMap<String, String>,
    driver: String,
    deletion_policy: DeletionPolicy,
}

#[derive(Clone, Debug)]
struct SnapshotRecord {
    claim: Option<String>,
    class: Option<String>,
    content: Option<String>,
    bound: bool,
    ready: bool,
    error: Option<String>,
    observed: u32,
}

#[derive(Clone, Debug)]
struct ContentRecord {
    driver: String,
    handle: String,
    restore_size: Option<i64>,
    class: Option<String>,
    deletion_policy: DeletionPolicy,
    snapshot: (String, String),
}

#[derive(Debug, Default)]
struct State {
    classes: Vec<ClassRecord>,
    claims: HashSet<(String, String)>,
    snapshots: BTreeMap<(String, String), SnapshotRecord>,
    contents: BTreeMap<String, ContentRecord>,
    failures: BTreeMap<(String, String), String>,
    fail_snapshot_creates: bool,
    next_id: u32,
}

/// Simulated cluster shared by both store views
#[derive(Debug)]
pub(crate) struct FakePlatform {
    state: Mutex<State>,
    ready_after: u32,
}

impl FakePlatform {
    /// Platform whose controller makes snapshots ready on the
    /// `ready_after`-th observation
    pub(crate) fn new(ready_after: u32) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
            ready_after: ready_after.max(1),
        })
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn add_class(&self, name: &str, annotations: &[(&str, &str)]) {
        self.state().classes.push(ClassRecord {
            name: name.to_string(),
            annotations: annotations
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            driver: "hostpath.csi.k8s.io".to_string(),
            deletion_policy: DeletionPolicy::Delete,
        });
    }

    pub(crate) fn add_claim(&self, name: &str, namespace: &str) {
        self.state()
            .claims
            .insert((namespace.to_string(), name.to_string()));
    }

    /// The controller reports `message` instead of readiness for this snapshot
    pub(crate) fn fail_snapshot(&self, name: &str, namespace: &str, message: &str) {
        self.state()
            .failures
            .insert((namespace.to_string(), name.to_string()), message.to_string());
    }

    /// Reject every snapshot submission
    pub(crate) fn reject_snapshot_creates(&self) {
        self.state().fail_snapshot_creates = true;
    }

    /// Insert a claim snapshot directly, optionally already bound to `content`
    pub(crate) fn insert_snapshot(&self, name: &str, namespace: &str, content: Option<&str>) {
        let mut state = self.state();
        if let Some(content) = content {
            let record = ContentRecord {
                driver: "hostpath.csi.k8s.io".to_string(),
                handle: format!("handle-{}", content),
                restore_size: Some(1 << 30),
                class: Some("csi-class".to_string()),
                deletion_policy: DeletionPolicy::Delete,
                snapshot: (namespace.to_string(), name.to_string()),
            };
            state.contents.insert(content.to_string(), record);
        }
        state.snapshots.insert(
            (namespace.to_string(), name.to_string()),
            SnapshotRecord {
                claim: Some("pvc-1".to_string()),
                class: Some("csi-class".to_string()),
                content: content.map(str::to_string),
                bound: content.is_some(),
                ready: false,
                error: None,
                observed: 0,
            },
        );
    }

    /// Mark a snapshot ready without a bound content
    pub(crate) fn force_ready_unbound(&self, name: &str, namespace: &str) {
        if let Some(snap) = self
            .state()
            .snapshots
            .get_mut(&(namespace.to_string(), name.to_string()))
        {
            snap.ready = true;
            snap.bound = false;
            snap.content = None;
            snap.observed = 0;
            snap.claim = None;
        }
    }

    pub(crate) fn content_names(&self) -> Vec<String> {
        self.state().contents.keys().cloned().collect()
    }

    pub(crate) fn content_handle(&self, name: &str) -> Option<String> {
        self.state().contents.get(name).map(|c| c.handle.clone())
    }

    pub(crate) fn snapshot_exists(&self, name: &str, namespace: &str) -> bool {
        self.state()
            .snapshots
            .contains_key(&(namespace.to_string(), name.to_string()))
    }

    /// Backend of the requested generation over this platform
    pub(crate) fn snapshotter(
        self: &Arc<Self>,
        generation: ApiGeneration,
        poll: PollConfig,
    ) -> Arc<dyn Snapshotter> {
        match generation {
            ApiGeneration::Alpha => {
                Arc::new(AlphaSnapshotter::new(FakeAlphaStore(self.clone()), poll))
            }
            ApiGeneration::Beta => Arc::new(BetaSnapshotter::new(FakeBetaStore(self.clone()), poll)),
        }
    }

    fn submit_snapshot(
        &self,
        name: &str,
        namespace: &str,
        claim: Option<String>,
        content: Option<String>,
        class: Option<String>,
    ) -> Result<(), Error> {
        let mut state = self.state();
        if state.fail_snapshot_creates {
            return Err(Error::Kube {
                source: kube::Error::Api(kube::error::ErrorResponse {
                    status: "Failure".to_string(),
                    message: "admission webhook denied the request".to_string(),
                    reason: "Forbidden".to_string(),
                    code: 403,
                }),
            });
        }
        let key = (namespace.to_string(), name.to_string());
        if state.snapshots.contains_key(&key) {
            return Err(Error::already_exists(SNAPSHOT_KIND, name, namespace));
        }
        let bound = content.is_some();
        state.snapshots.insert(
            key,
            SnapshotRecord {
                claim,
                class,
                content,
                bound,
                ready: false,
                error: None,
                observed: 0,
            },
        );
        Ok(())
    }

    fn submit_content(&self, name: &str, record: ContentRecord) -> Result<(), Error> {
        let mut state = self.state();
        if state.contents.contains_key(name) {
            return Err(Error::already_exists_cluster(CONTENT_KIND, name));
        }
        state.contents.insert(name.to_string(), record);
        Ok(())
    }

    fn observe_snapshot(&self, name: &str, namespace: &str) -> Result<SnapshotRecord, Error> {
        let mut guard = self.state();
        let state = &mut *guard;
        let key = (namespace.to_string(), name.to_string());
        let failure = state.failures.get(&key).cloned();
        let snap = state
            .snapshots
            .get_mut(&key)
            .ok_or_else(|| Error::not_found(SNAPSHOT_KIND, name, namespace))?;

        snap.observed += 1;
        if let Some(message) = failure {
            snap.error = Some(message);
        } else if snap.claim.is_some() && snap.content.is_none() {
            state.next_id += 1;
            let content_name = format!("snapcontent-{}", state.next_id);
            let class = snap
                .class
                .as_ref()
                .and_then(|c| state.classes.iter().find(|rec| &rec.name == c));
            state.contents.insert(
                content_name.clone(),
                ContentRecord {
                    driver: class
                        .map(|c| c.driver.clone())
                        .unwrap_or_else(|| "hostpath.csi.k8s.io".to_string()),
                    handle: format!("handle-{}", state.next_id),
                    restore_size: Some(1 << 30),
                    class: snap.class.clone(),
                    deletion_policy: class.map(|c| c.deletion_policy).unwrap_or_default(),
                    snapshot: key.clone(),
                },
            );
            snap.content = Some(content_name);
            snap.bound = true;
        } else if snap.content.is_some() {
            snap.bound = true;
        }
        if snap.error.is_none() && snap.bound && snap.observed >= self.ready_after {
            snap.ready = true;
        }
        Ok(snap.clone())
    }

    fn lookup_content(&self, name: &str) -> Result<ContentRecord, Error> {
        self.state()
            .contents
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found_cluster(CONTENT_KIND, name))
    }

    fn lookup_class(&self, name: &str) -> Result<ClassRecord, Error> {
        self.state()
            .classes
            .iter()
            .find(|c| c.name == name)
            .cloned()
            .ok_or_else(|| Error::not_found_cluster(CLASS_KIND, name))
    }

    fn lookup_claim(&self, name: &str, namespace: &str) -> Result<PersistentVolumeClaim, Error> {
        if !self
            .state()
            .claims
            .contains(&(namespace.to_string(), name.to_string()))
        {
            return Err(Error::not_found(PVC_KIND, name, namespace));
        }
        Ok(PersistentVolumeClaim {
            metadata: meta(name, Some(namespace)),
            ..Default::default()
        })
    }

    fn remove_snapshot(&self, name: &str, namespace: &str) -> Result<(), Error> {
        self.state()
            .snapshots
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| Error::not_found(SNAPSHOT_KIND, name, namespace))
    }
}

fn meta(name: &str, namespace: Option<&str>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        ..Default::default()
    }
}

fn creation_time() -> Time {
    serde_json::from_value(serde_json::json!("2020-01-01T00:00:00Z"))
        .expect("static timestamp")
}

fn split_snapshot_ref(
    reference: &k8s_openapi::api::core::v1::ObjectReference,
) -> (String, String) {
    (
        reference.namespace.clone().unwrap_or_default(),
        reference.name.clone().unwrap_or_default(),
    )
}

// =============================================================================
// v1alpha1 view
// =============================================================================

pub(crate) struct FakeAlphaStore(Arc<FakePlatform>);

fn render_alpha_snapshot(name: &str, namespace: &str, rec: &SnapshotRecord) -> alpha::VolumeSnapshot {
    let mut snap = match &rec.claim {
        Some(claim) => alpha::VolumeSnapshot::for_claim(name, namespace, claim, rec.class.as_deref()),
        None => alpha::VolumeSnapshot::for_content(
            name,
            namespace,
            rec.content.as_deref().unwrap_or_default(),
            rec.class.as_deref(),
        ),
    };
    if rec.bound {
        snap.spec.snapshot_content_name = rec.content.clone();
    }
    if rec.observed > 0 || rec.ready {
        snap.status = Some(alpha::VolumeSnapshotStatus {
            creation_time: rec.ready.then(creation_time),
            restore_size: None,
            ready_to_use: rec.ready,
            error: rec.error.as_ref().map(|message| alpha::VolumeError {
                time: None,
                message: message.clone(),
            }),
        });
    }
    snap
}

#[async_trait]
impl AlphaStore for FakeAlphaStore {
    async fn list_classes(&self) -> Result<Vec<alpha::VolumeSnapshotClass>, Error> {
        Ok(self
            .0
            .state()
            .classes
            .iter()
            .map(|c| {
                let mut class =
                    alpha::VolumeSnapshotClass::new(&c.name, &c.driver, Some(c.deletion_policy));
                class.metadata.annotations = Some(c.annotations.clone());
                class
            })
            .collect())
    }

    async fn get_class(&self, name: &str) -> Result<alpha::VolumeSnapshotClass, Error> {
        let c = self.0.lookup_class(name)?;
        Ok(alpha::VolumeSnapshotClass::new(
            &c.name,
            &c.driver,
            Some(c.deletion_policy),
        ))
    }

    async fn get_claim(&self, name: &str, namespace: &str) -> Result<PersistentVolumeClaim, Error> {
        self.0.lookup_claim(name, namespace)
    }

    async fn create_snapshot(
        &self,
        snapshot: &alpha::VolumeSnapshot,
    ) -> Result<alpha::VolumeSnapshot, Error> {
        let name = snapshot.metadata.name.clone().unwrap_or_default();
        let namespace = snapshot.metadata.namespace.clone().unwrap_or_default();
        self.0.submit_snapshot(
            &name,
            &namespace,
            snapshot.spec.source.as_ref().map(|s| s.name.clone()),
            snapshot.spec.snapshot_content_name.clone(),
            snapshot.spec.volume_snapshot_class_name.clone(),
        )?;
        Ok(snapshot.clone())
    }

    async fn get_snapshot(&self, name: &str, namespace: &str) -> Result<alpha::VolumeSnapshot, Error> {
        let rec = self.0.observe_snapshot(name, namespace)?;
        Ok(render_alpha_snapshot(name, namespace, &rec))
    }

    async fn delete_snapshot(&self, name: &str, namespace: &str) -> Result<(), Error> {
        self.0.remove_snapshot(name, namespace)
    }

    async fn create_content(
        &self,
        content: &alpha::VolumeSnapshotContent,
    ) -> Result<alpha::VolumeSnapshotContent, Error> {
        let name = content.metadata.name.clone().unwrap_or_default();
        let csi = content.spec.csi.clone().unwrap_or_default();
        self.0.submit_content(
            &name,
            ContentRecord {
                driver: csi.driver,
                handle: csi.snapshot_handle,
                restore_size: csi.restore_size,
                class: content.spec.snapshot_class_name.clone(),
                deletion_policy: content.spec.deletion_policy.unwrap_or_default(),
                snapshot: content
                    .spec
                    .volume_snapshot_ref
                    .as_ref()
                    .map(split_snapshot_ref)
                    .unwrap_or_default(),
            },
        )?;
        Ok(content.clone())
    }

    async fn get_content(&self, name: &str) -> Result<alpha::VolumeSnapshotContent, Error> {
        let rec = self.0.lookup_content(name)?;
        Ok(alpha::VolumeSnapshotContent::pre_provisioned(
            name,
            alpha::CsiVolumeSnapshotSource {
                driver: rec.driver,
                snapshot_handle: rec.handle,
                creation_time: Some(1),
                restore_size: rec.restore_size,
            },
            &rec.snapshot.1,
            &rec.snapshot.0,
            rec.class.as_deref(),
            Some(rec.deletion_policy),
        ))
    }
}

// =============================================================================
// v1beta1 view
// =============================================================================

pub(crate) struct FakeBetaStore(Arc<FakePlatform>);

fn render_beta_snapshot(name: &str, namespace: &str, rec: &SnapshotRecord) -> beta::VolumeSnapshot {
    let mut snap = match &rec.claim {
        Some(claim) => beta::VolumeSnapshot::for_claim(name, namespace, claim, rec.class.as_deref()),
        None => beta::VolumeSnapshot::for_content(
            name,
            namespace,
            rec.content.as_deref().unwrap_or_default(),
            rec.class.as_deref(),
        ),
    };
    if rec.observed > 0 || rec.ready {
        snap.status = Some(beta::VolumeSnapshotStatus {
            bound_volume_snapshot_content_name: if rec.bound { rec.content.clone() } else { None },
            creation_time: rec.ready.then(creation_time),
            ready_to_use: Some(rec.ready),
            restore_size: None,
            error: rec.error.as_ref().map(|message| beta::VolumeSnapshotError {
                time: None,
                message: Some(message.clone()),
            }),
        });
    }
    snap
}

#[async_trait]
impl BetaStore for FakeBetaStore {
    async fn list_classes(&self) -> Result<Vec<beta::VolumeSnapshotClass>, Error> {
        Ok(self
            .0
            .state()
            .classes
            .iter()
            .map(|c| {
                let mut class = beta::VolumeSnapshotClass::new(&c.name, &c.driver, c.deletion_policy);
                class.metadata.annotations = Some(c.annotations.clone());
                class
            })
            .collect())
    }

    async fn get_class(&self, name: &str) -> Result<beta::VolumeSnapshotClass, Error> {
        let c = self.0.lookup_class(name)?;
        Ok(beta::VolumeSnapshotClass::new(&c.name, &c.driver, c.deletion_policy))
    }

    async fn get_claim(&self, name: &str, namespace: &str) -> Result<PersistentVolumeClaim, Error> {
        self.0.lookup_claim(name, namespace)
    }

    async fn create_snapshot(
        &self,
        snapshot: &beta::VolumeSnapshot,
    ) -> Result<beta::VolumeSnapshot, Error> {
        let name = snapshot.metadata.name.clone().unwrap_or_default();
        let namespace = snapshot.metadata.namespace.clone().unwrap_or_default();
        self.0.submit_snapshot(
            &name,
            &namespace,
            snapshot.spec.source.persistent_volume_claim_name.clone(),
            snapshot.spec.source.volume_snapshot_content_name.clone(),
            snapshot.spec.volume_snapshot_class_name.clone(),
        )?;
        Ok(snapshot.clone())
    }

    async fn get_snapshot(&self, name: &str, namespace: &str) -> Result<beta::VolumeSnapshot, Error> {
        let rec = self.0.observe_snapshot(name, namespace)?;
        Ok(render_beta_snapshot(name, namespace, &rec))
    }

    async fn delete_snapshot(&self, name: &str, namespace: &str) -> Result<(), Error> {
        self.0.remove_snapshot(name, namespace)
    }

    async fn create_content(
        &self,
        content: &beta::VolumeSnapshotContent,
    ) -> Result<beta::VolumeSnapshotContent, Error> {
        let name = content.metadata.name.clone().unwrap_or_default();
        self.0.submit_content(
            &name,
            ContentRecord {
                driver: content.spec.driver.clone(),
                handle: content.spec.source.snapshot_handle.clone().unwrap_or_default(),
                restore_size: None,
                class: content.spec.volume_snapshot_class_name.clone(),
                deletion_policy: content.spec.deletion_policy,
                snapshot: split_snapshot_ref(&content.spec.volume_snapshot_ref),
            },
        )?;
        Ok(content.clone())
    }

    async fn get_content(&self, name: &str) -> Result<beta::VolumeSnapshotContent, Error> {
        let rec = self.0.lookup_content(name)?;
        let mut content = beta::VolumeSnapshotContent::pre_provisioned(
            name,
            &rec.driver,
            &rec.handle,
            &rec.snapshot.1,
            &rec.snapshot.0,
            rec.class.as_deref(),
            rec.deletion_policy,
        );
        content.status = Some(beta::VolumeSnapshotContentStatus {
            snapshot_handle: Some(rec.handle),
            creation_time: Some(1),
            restore_size: rec.restore_size,
            ready_to_use: Some(true),
            error: None,
        });
        Ok(content)
    }
}
