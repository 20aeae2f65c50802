//! Typed schemas for the CSI external-snapshotter API
//!
//! The two served generations are kept as separate modules with their own
//! field layouts. Nothing here tries to unify them; the snapshot backends
//! each speak exactly one of these schemas.

pub mod alpha;
pub mod beta;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group shared by every generation of the snapshot API
pub const SNAPSHOT_GROUP: &str = "snapshot.storage.k8s.io";

/// Kind of the namespaced snapshot object
pub const SNAPSHOT_KIND: &str = "VolumeSnapshot";

/// Kind of the cluster-scoped content object
pub const CONTENT_KIND: &str = "VolumeSnapshotContent";

/// Kind of the cluster-scoped class object
pub const CLASS_KIND: &str = "VolumeSnapshotClass";

/// Plural of [`CLASS_KIND`], used when probing which versions are served
pub const CLASS_PLURAL: &str = "volumesnapshotclasses";

/// Kind of the volume claim a snapshot is taken from
pub const PVC_KIND: &str = "PersistentVolumeClaim";

/// Reported when a status error carries no message
pub const UNSPECIFIED_ERROR: &str = "snapshot controller reported an error without a message";

/// What happens to the backing-store snapshot when its content object is deleted
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum DeletionPolicy {
    /// Delete the backing-store snapshot with the content
    #[default]
    Delete,
    /// Keep the backing-store snapshot
    Retain,
}

impl std::fmt::Display for DeletionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Delete => write!(f, "Delete"),
            Self::Retain => write!(f, "Retain"),
        }
    }
}
