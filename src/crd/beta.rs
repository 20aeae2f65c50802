//! `snapshot.storage.k8s.io/v1beta1` schema
//!
//! Beta moved the binding into status (`status.boundVolumeSnapshotContentName`),
//! made readiness optional and split the content's CSI details between
//! `spec.source` (pre-provisioned) and `status` (dynamically provisioned).

use std::borrow::Cow;
use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ObjectReference;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use k8s_openapi::ClusterResourceScope;
use kube::{CustomResource, Resource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{DeletionPolicy, SNAPSHOT_GROUP, SNAPSHOT_KIND, UNSPECIFIED_ERROR};

/// Version string of this generation
pub const VERSION: &str = "v1beta1";

/// Full apiVersion of this generation
pub const API_VERSION: &str = "snapshot.storage.k8s.io/v1beta1";

// =============================================================================
// VolumeSnapshot
// =============================================================================

/// Requested snapshot of a volume claim or pre-provisioned content
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "snapshot.storage.k8s.io",
    version = "v1beta1",
    kind = "VolumeSnapshot",
    plural = "volumesnapshots",
    namespaced,
    status = "VolumeSnapshotStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotSpec {
    /// Where the snapshot comes from
    pub source: VolumeSnapshotSource,

    /// Requested class; the cluster default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_class_name: Option<String>,
}

/// Exactly one of the two fields is expected to be set
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotSource {
    /// Claim to snapshot (dynamic provisioning)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_volume_claim_name: Option<String>,

    /// Existing content to bind (pre-provisioned)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_content_name: Option<String>,
}

/// Observed state of a v1beta1 snapshot
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotStatus {
    /// Content the controller bound this snapshot to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_volume_snapshot_content_name: Option<String>,

    /// When the storage system cut the snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<Time>,

    /// Whether the snapshot can be used to restore a volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_to_use: Option<bool>,

    /// Minimum size of a volume restored from this snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_size: Option<Quantity>,

    /// Last error reported by the snapshot controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<VolumeSnapshotError>,
}

/// Error reported on a v1beta1 snapshot or content
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotError {
    /// When the error was observed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<Time>,

    /// Error message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl VolumeSnapshot {
    /// Snapshot of the claim `claim_name` in `namespace`
    pub fn for_claim(name: &str, namespace: &str, claim_name: &str, class: Option<&str>) -> Self {
        let mut snap = VolumeSnapshot::new(
            name,
            VolumeSnapshotSpec {
                source: VolumeSnapshotSource {
                    persistent_volume_claim_name: Some(claim_name.to_string()),
                    volume_snapshot_content_name: None,
                },
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
                source: VolumeSnapshotSource {
                    persistent_volume_claim_name: None,
                    volume_snapshot_content_name: Some(content_name.to_string()),
                },
                volume_snapshot_class_name: class.map(str::to_string),
            },
        );
        snap.metadata.namespace = Some(namespace.to_string());
        snap
    }

    /// The raw ready flag, without the creation-time check
    pub fn ready_flag(&self) -> bool {
        self.status
            .as_ref()
            .and_then(|s| s.ready_to_use)
            .unwrap_or(false)
    }

    /// Ready flag set and a creation time recorded
    pub fn is_ready_to_use(&self) -> bool {
        self.ready_flag()
            && self
                .status
                .as_ref()
                .is_some_and(|s| s.creation_time.is_some())
    }

    /// Error message from the status, if any.
    ///
    /// A reported error without a message still counts as an error.
    pub fn error_message(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.error.as_ref())
            .map(|e| {
                e.message
                    .as_deref()
                    .filter(|m| !m.is_empty())
                    .unwrap_or(UNSPECIFIED_ERROR)
            })
    }

    /// Name of the content the controller bound; empty names count as unbound
    pub fn bound_content_name(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.bound_volume_snapshot_content_name.as_deref())
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
    version = "v1beta1",
    kind = "VolumeSnapshotContent",
    plural = "volumesnapshotcontents",
    status = "VolumeSnapshotContentStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotContentSpec {
    /// Snapshot this content belongs to
    pub volume_snapshot_ref: ObjectReference,

    /// What happens to the storage snapshot on delete
    pub deletion_policy: DeletionPolicy,

    /// CSI driver name
    pub driver: String,

    /// Class the content was provisioned with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_class_name: Option<String>,

    /// Where the storage snapshot comes from
    #[serde(default)]
    pub source: VolumeSnapshotContentSource,
}

/// Exactly one of the two fields is expected to be set
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotContentSource {
    /// Volume to snapshot (dynamic provisioning)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_handle: Option<String>,

    /// Existing storage snapshot (pre-provisioned)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_handle: Option<String>,
}

/// Observed state of a v1beta1 content
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotContentStatus {
    /// Storage-system identifier of the snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_handle: Option<String>,

    /// Creation time in nanoseconds since the epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<i64>,

    /// Restore size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_size: Option<i64>,

    /// Whether the storage snapshot is usable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_to_use: Option<bool>,

    /// Last error reported by the CSI driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<VolumeSnapshotError>,
}

impl VolumeSnapshotContent {
    /// Pre-provisioned content pointing at an existing storage snapshot and
    /// reserved for the snapshot `snapshot_name` in `namespace`
    pub fn pre_provisioned(
        name: &str,
        driver: &str,
        snapshot_handle: &str,
        snapshot_name: &str,
        namespace: &str,
        class: Option<&str>,
        deletion_policy: DeletionPolicy,
    ) -> Self {
        VolumeSnapshotContent::new(
            name,
            VolumeSnapshotContentSpec {
                volume_snapshot_ref: ObjectReference {
                    kind: Some(SNAPSHOT_KIND.to_string()),
                    name: Some(snapshot_name.to_string()),
                    namespace: Some(namespace.to_string()),
                    ..Default::default()
                },
                deletion_policy,
                driver: driver.to_string(),
                volume_snapshot_class_name: class.map(str::to_string),
                source: VolumeSnapshotContentSource {
                    volume_handle: None,
                    snapshot_handle: Some(snapshot_handle.to_string()),
                },
            },
        )
    }

    /// Storage handle: the observed one, else the pre-provisioned one
    pub fn snapshot_handle(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.snapshot_handle.as_deref())
            .or(self.spec.source.snapshot_handle.as_deref())
            .filter(|h| !h.is_empty())
    }

    /// Restore size in bytes, once the driver has reported it
    pub fn restore_size(&self) -> Option<i64> {
        self.status.as_ref().and_then(|s| s.restore_size)
    }
}

// =============================================================================
// VolumeSnapshotClass
// =============================================================================

/// Cluster-scoped snapshot class with top-level fields (no `spec`)
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotClass {
    /// Standard object metadata
    #[serde(default)]
    pub metadata: ObjectMeta,

    /// CSI driver that handles snapshots of this class
    #[serde(default)]
    pub driver: String,

    /// Driver-specific parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<BTreeMap<String, String>>,

    /// Policy applied to contents created with this class
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,
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
    pub fn new(name: &str, driver: &str, deletion_policy: DeletionPolicy) -> Self {
        Self {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            driver: driver.to_string(),
            parameters: None,
            deletion_policy,
        }
    }
}
