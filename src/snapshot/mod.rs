//! Volume snapshot lifecycle across snapshot API generations
//!
//! [`Snapshotter`] is the only entry point callers need. The resolver picks
//! the backend that matches what the cluster serves:
//!
//! - [`alpha::AlphaSnapshotter`] speaks `snapshot.storage.k8s.io/v1alpha1`
//! - [`beta::BetaSnapshotter`] speaks `snapshot.storage.k8s.io/v1beta1`
//!
//! Both backends implement the whole contract on their own schema. What they
//! share lives here: the [`Source`] handed between backup and restore, the
//! generation-tagged [`Snapshot`] view, class selection and content naming.

pub mod alpha;
pub mod beta;
pub mod resolver;

#[cfg(test)]
mod fake;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::crd::{self, CLASS_KIND};
use crate::poll::WaitContext;
use crate::Error;

pub use resolver::{detect_generation, resolve, Probe, ProbeOutcome};

/// Value of the class annotation that marks a class as selectable
pub const CLASS_ANNOTATION_VALUE: &str = "true";

// =============================================================================
// Contract
// =============================================================================

/// Generation-independent snapshot operations.
///
/// Every call takes the caller's [`WaitContext`]; cancelling it or passing
/// its deadline aborts in-flight round-trips and waits. Objects already
/// created stay in place.
#[async_trait]
pub trait Snapshotter: Send + Sync {
    /// The API generation this backend speaks
    fn generation(&self) -> ApiGeneration;

    /// Name of the first class annotated `annotation_key: "true"`
    async fn get_volume_snapshot_class(
        &self,
        ctx: &WaitContext,
        annotation_key: &str,
    ) -> Result<String, Error>;

    /// Snapshot the claim `volume_claim`, optionally waiting for readiness
    async fn create(
        &self,
        ctx: &WaitContext,
        name: &str,
        namespace: &str,
        volume_claim: &str,
        class: Option<&str>,
        wait_for_ready: bool,
    ) -> Result<(), Error>;

    /// Fetch a snapshot; a missing snapshot is an error
    async fn get(&self, ctx: &WaitContext, name: &str, namespace: &str) -> Result<Snapshot, Error>;

    /// Delete a snapshot; a missing snapshot is success
    async fn delete(&self, ctx: &WaitContext, name: &str, namespace: &str) -> Result<(), Error>;

    /// Backing-store details of a ready, bound snapshot
    async fn get_source(
        &self,
        ctx: &WaitContext,
        name: &str,
        namespace: &str,
    ) -> Result<Source, Error>;

    /// Create a content/snapshot pair pointing at an existing storage snapshot
    async fn create_from_source(
        &self,
        ctx: &WaitContext,
        source: &Source,
        name: &str,
        namespace: &str,
        wait_for_ready: bool,
    ) -> Result<(), Error>;

    /// Poll until the snapshot is ready, fails, or the context expires
    async fn wait_on_ready_to_use(
        &self,
        ctx: &WaitContext,
        name: &str,
        namespace: &str,
    ) -> Result<(), Error>;

    /// Re-create the snapshot `namespace/name` as `clone_namespace/clone_name`
    /// sharing the same storage snapshot
    async fn clone_snapshot(
        &self,
        ctx: &WaitContext,
        name: &str,
        namespace: &str,
        clone_name: &str,
        clone_namespace: &str,
        wait_for_ready: bool,
    ) -> Result<(), Error>;
}

// =============================================================================
// Shared types
// =============================================================================

/// Snapshot API generation served by the cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiGeneration {
    /// `snapshot.storage.k8s.io/v1alpha1`
    Alpha,
    /// `snapshot.storage.k8s.io/v1beta1`
    Beta,
}

impl ApiGeneration {
    /// Full apiVersion string
    pub fn api_version(&self) -> &'static str {
        match self {
            Self::Alpha => crd::alpha::API_VERSION,
            Self::Beta => crd::beta::API_VERSION,
        }
    }
}

impl fmt::Display for ApiGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Alpha => write!(f, "alpha"),
            Self::Beta => write!(f, "beta"),
        }
    }
}

impl FromStr for ApiGeneration {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "alpha" | "v1alpha1" | "snapshot.storage.k8s.io/v1alpha1" => Ok(Self::Alpha),
            "beta" | "v1beta1" | "snapshot.storage.k8s.io/v1beta1" => Ok(Self::Beta),
            other => Err(Error::internal_with_context(
                "api_version",
                format!("unknown snapshot API generation '{}', expected alpha or beta", other),
            )),
        }
    }
}

/// Storage-level identity of a snapshot, enough to re-create it elsewhere.
///
/// Serialized as camelCase JSON so a backup can store it as an artifact and a
/// later restore can hand it to [`Snapshotter::create_from_source`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// Storage-system snapshot identifier
    pub handle: String,
    /// CSI driver that owns the handle
    pub driver: String,
    /// Restore size in bytes, when the driver reported one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_size: Option<i64>,
    /// Class the original content was provisioned with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_snapshot_class_name: Option<String>,
}

/// Where a snapshot is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SnapshotPhase {
    /// Submitted, not yet bound to a content
    Pending,
    /// Bound to a content, not yet usable
    Bound,
    /// Ready flag set and creation time recorded
    Ready,
    /// The controller reported an error before readiness
    Errored,
}

impl fmt::Display for SnapshotPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Bound => write!(f, "Bound"),
            Self::Ready => write!(f, "Ready"),
            Self::Errored => write!(f, "Errored"),
        }
    }
}

/// A snapshot as returned by [`Snapshotter::get`], in its native schema
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Snapshot {
    /// v1alpha1 object
    Alpha(crd::alpha::VolumeSnapshot),
    /// v1beta1 object
    Beta(crd::beta::VolumeSnapshot),
}

impl Snapshot {
    fn meta(&self) -> &ObjectMeta {
        match self {
            Self::Alpha(s) => &s.metadata,
            Self::Beta(s) => &s.metadata,
        }
    }

    /// Object name
    pub fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }

    /// Object namespace
    pub fn namespace(&self) -> &str {
        self.meta().namespace.as_deref().unwrap_or_default()
    }

    /// Schema this snapshot was read with
    pub fn generation(&self) -> ApiGeneration {
        match self {
            Self::Alpha(_) => ApiGeneration::Alpha,
            Self::Beta(_) => ApiGeneration::Beta,
        }
    }

    /// Ready flag and creation time both present
    pub fn is_ready_to_use(&self) -> bool {
        match self {
            Self::Alpha(s) => s.is_ready_to_use(),
            Self::Beta(s) => s.is_ready_to_use(),
        }
    }

    /// When the storage system cut the snapshot
    pub fn creation_time(&self) -> Option<&Time> {
        match self {
            Self::Alpha(s) => s.status.as_ref().and_then(|st| st.creation_time.as_ref()),
            Self::Beta(s) => s.status.as_ref().and_then(|st| st.creation_time.as_ref()),
        }
    }

    /// Error reported by the snapshot controller
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Alpha(s) => s.error_message(),
            Self::Beta(s) => s.error_message(),
        }
    }

    /// Bound content, if any
    pub fn content_name(&self) -> Option<&str> {
        match self {
            Self::Alpha(s) => s.bound_content_name(),
            Self::Beta(s) => s.bound_content_name(),
        }
    }

    /// Claim the snapshot was taken from; `None` for pre-provisioned snapshots
    pub fn claim_name(&self) -> Option<&str> {
        match self {
            Self::Alpha(s) => s.spec.source.as_ref().map(|r| r.name.as_str()),
            Self::Beta(s) => s.spec.source.persistent_volume_claim_name.as_deref(),
        }
    }

    /// Requested class
    pub fn class_name(&self) -> Option<&str> {
        match self {
            Self::Alpha(s) => s.spec.volume_snapshot_class_name.as_deref(),
            Self::Beta(s) => s.spec.volume_snapshot_class_name.as_deref(),
        }
    }

    /// Lifecycle phase derived from status
    pub fn phase(&self) -> SnapshotPhase {
        if self.is_ready_to_use() {
            SnapshotPhase::Ready
        } else if self.error_message().is_some() {
            SnapshotPhase::Errored
        } else if self.content_name().is_some() {
            SnapshotPhase::Bound
        } else {
            SnapshotPhase::Pending
        }
    }
}

// =============================================================================
// Shared helpers
// =============================================================================

/// Pick the class annotated `annotation_key: "true"`.
///
/// The first match in listing order wins. More than one match is logged,
/// since the choice then depends on the API server's ordering.
pub(crate) fn select_class<'a, I>(classes: I, annotation_key: &str) -> Result<String, Error>
where
    I: IntoIterator<Item = &'a ObjectMeta>,
{
    let mut seen = 0usize;
    let mut matches: Vec<&str> = Vec::new();
    for meta in classes {
        seen += 1;
        let selected = meta
            .annotations
            .as_ref()
            .and_then(|a| a.get(annotation_key))
            .is_some_and(|v| v == CLASS_ANNOTATION_VALUE);
        if selected {
            if let Some(name) = meta.name.as_deref() {
                matches.push(name);
            }
        }
    }

    let selector = format!("{}={}", annotation_key, CLASS_ANNOTATION_VALUE);
    if seen == 0 {
        return Err(Error::precondition_cluster(
            CLASS_KIND,
            selector,
            "failed to find any VolumeSnapshotClass in the cluster",
        ));
    }
    match matches.as_slice() {
        [] => Err(Error::precondition_cluster(
            CLASS_KIND,
            selector,
            format!(
                "none of the {} VolumeSnapshotClasses in the cluster carries the annotation",
                seen
            ),
        )),
        [only] => Ok(only.to_string()),
        [first, ..] => {
            warn!(
                annotation = %annotation_key,
                candidates = ?matches,
                selected = %first,
                "multiple VolumeSnapshotClasses match, using the first"
            );
            Ok(first.to_string())
        }
    }
}

/// Name for a content created on behalf of the snapshot `snapshot_name`
pub(crate) fn content_name_for(snapshot_name: &str) -> String {
    format!("{}-content-{}", snapshot_name, Uuid::new_v4())
}
