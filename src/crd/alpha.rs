//! `snapshot.storage.k8s.io/v1alpha1` schema
//!
//! In this generation the snapshot binds to its content through
//! `spec.snapshotContentName`, readiness is a plain boolean, and the CSI
//! driver/handle live under `spec.csi` of the content.

use std::borrow::Cow;
use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ObjectReference, TypedLocalObjectReference};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use k8s_openapi::ClusterResourceScope;
use kube::{CustomResource, Resource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{DeletionPolicy, PVC_KIND, SNAPSHOT_GROUP, SNAPSHOT_KIND, UNSPECIFIED_ERROR};

/// Version string of this generation
pub const VERSION: &str = "v1alpha1";

/// Full apiVersion of this generation
pub const API_VERSION: &str = "snapshot.storage.k8s.io/v1alpha1";

// =============================================================================
// VolumeSnapshot
// =============================================================================

/// Requested snapshot of a volume claim
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "snapshot.storage.k8s.io",
    version = "v1alpha1",
    kind = "VolumeSnapshot",
    plural = "volumesnapshots",
    namespaced,
    status = "VolumeSnapshotStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotSpec {
    /// Claim to snapshot; absent for pre-provisioned snapshots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<TypedLocalObjectReference>,

    /// Content this snapshot is bound to (set by the controller, or up front
    /// for pre-provisioned snapshots)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_content_name: Option<String>,

    /// Requested class; the cluster default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_class_name: Option<String>,
}

/// Observed state of a v1alpha1 snapshot
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotStatus {
    /// When the storage system cut the snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<Time>,

    /// Minimum size of a volume restored from this snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_size: Option<Quantity>,

    /// Whether the snapshot can be used to restore a volume
    #[serde(default)]
    pub ready_to_use: bool,

    /// Last error reported by the snapshot controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<VolumeError>,
}

/// Error reported on a v1alpha1 snapshot
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeError {
    /// When the error was observed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<Time>,

    /// Error message
    #[serde(default)]
    pub message: String,
}

impl VolumeSnapshot {
    /// Snapshot of the claim `claim_name` in `namespace`
    pub fn for_claim(name: &str, namespace: &str, claim_name: &str, class: Option<&str>) -> Self {
        let mut snap = VolumeSnapshot::new(
            name,
            VolumeSnapshotSpec {
                source: Some(TypedLocalObjectReference {
                    api_group: None,
                    kind: PVC_KIND.to_string(),
                    name: claim_name.to_string(),
                }),
                snapshot_content_name: None,
                volume_snapshot_class_name: class.map(str::to_string),
            },
        );
        snap.metadata.namespace = Some(namespace.to_string());
        snap
    }

    /// Pre-provisioned snapshot bound to an existing content object
    pub fn for_content(
        name: &str,
        namespace: &str,
        content_name: &str,
        class: Option<&str>,
    ) -> Self {
        let mut snap = VolumeSnapshot::new(
            name,
            VolumeSnapshotSpec {
                source: None,
                snapshot_content_name: Some(content_name.to_string()),
                volume_snapshot_class_name: class.map(str::to_string),
            },
        );
        snap.metadata.namespace = Some(namespace.to_string());
        snap
    }

    /// The raw ready flag, without the creation-time check
    pub fn ready_flag(&self) -> bool {
        self.status.as_ref().map(|s| s.ready_to_use).unwrap_or(false)
    }

    /// Ready flag set and a creation time recorded
    pub fn is_ready_to_use(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| s.ready_to_use && s.creation_time.is_some())
            .unwrap_or(false)
    }

    /// Error message from the status, if any
    pub fn error_message(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.error.as_ref())
            .map(|e| {
                if e.message.is_empty() {
                    UNSPECIFIED_ERROR
                } else {
                    e.message.as_str()
                }
            })
    }

    /// Name of the bound content; empty names count as unbound
    pub fn bound_content_name(&self) -> Option<&str> {
        self.spec
            .snapshot_content_name
            .as_deref()
            .filter(|n| !n.is_empty())
    }
}

// =============================================================================
// VolumeSnapshotContent
// =============================================================================

/// Cluster-scoped binding between a snapshot and the storage system
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "snapshot.storage.k8s.io",
    version = "v1alpha1",
    kind = "VolumeSnapshotContent",
    plural = "volumesnapshotcontents",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotContentSpec {
    /// CSI snapshot details (inlined `VolumeSnapshotSource`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csi: Option<CsiVolumeSnapshotSource>,

    /// Snapshot this content belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_ref: Option<ObjectReference>,

    /// Class the content was provisioned with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_class_name: Option<String>,

    /// Volume the snapshot was taken from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_ref: Option<ObjectReference>,

    /// What happens to the storage snapshot on delete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<DeletionPolicy>,
}

/// CSI snapshot details of a v1alpha1 content
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CsiVolumeSnapshotSource {
    /// CSI driver name
    pub driver: String,

    /// Storage-system identifier of the snapshot
    pub snapshot_handle: String,

    /// Creation time in nanoseconds since the epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<i64>,

    /// Restore size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_size: Option<i64>,
}

impl VolumeSnapshotContent {
    /// Pre-provisioned content pointing at an existing storage snapshot and
    /// reserved for the snapshot `snapshot_name` in `namespace`
    pub fn pre_provisioned(
        name: &str,
        csi: CsiVolumeSnapshotSource,
        snapshot_name: &str,
        namespace: &str,
        class: Option<&str>,
        deletion_policy: Option<DeletionPolicy>,
    ) -> Self {
        VolumeSnapshotContent::new(
            name,
            VolumeSnapshotContentSpec {
                csi: Some(csi),
                volume_snapshot_ref: Some(ObjectReference {
                    kind: Some(SNAPSHOT_KIND.to_string()),
                    name: Some(snapshot_name.to_string()),
                    namespace: Some(namespace.to_string()),
                    ..Default::default()
                }),
                snapshot_class_name: class.map(str::to_string),
                persistent_volume_ref: None,
                deletion_policy,
            },
        )
    }
}

// =============================================================================
// VolumeSnapshotClass
// =============================================================================

/// Cluster-scoped snapshot class.
///
/// The class keeps its fields at the top level rather than under `spec`, so
/// it implements [`Resource`] by hand instead of deriving `CustomResource`.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotClass {
    /// Standard object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// CSI driver that handles snapshots of this class
    #[serde(default)]
    pub snapshotter: String,

    /// Driver-specific parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<BTreeMap<String, String>>,

    /// Policy applied to contents created with this class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<DeletionPolicy>,
}

impl Resource for VolumeSnapshotClass {
    type DynamicType = ();
    type Scope = ClusterResourceScope;

    fn kind(_: &()) -> Cow<'_, str> {
        Cow::Borrowed(super::CLASS_KIND)
    }

    fn group(_: &()) -> Cow<'_, str> {
        Cow::Borrowed(SNAPSHOT_GROUP)
    }

    fn version(_: &()) -> Cow<'_, str> {
        Cow::Borrowed(VERSION)
    }

    fn plural(_: &()) -> Cow<'_, str> {
        Cow::Borrowed(super::CLASS_PLURAL)
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl VolumeSnapshotClass {
    /// Class with the given driver and deletion policy
    pub fn new(name: &str, snapshotter: &str, deletion_policy: Option<DeletionPolicy>) -> Self {
        Self {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            snapshotter: snapshotter.to_string(),
            parameters: None,
            deletion_policy,
        }
    }
}
