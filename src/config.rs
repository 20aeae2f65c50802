//! Snapshotter configuration

use std::time::Duration;

use crate::poll::{PollConfig, MIN_POLL_INTERVAL};
use crate::snapshot::ApiGeneration;

/// Annotation that marks the VolumeSnapshotClass to use for backups
pub const DEFAULT_CLASS_ANNOTATION: &str = "k10.kasten.io/is-snapshot-class";

/// Configuration for resolving and driving a snapshotter
#[derive(Clone, Debug, PartialEq)]
pub struct SnapshotterConfig {
    /// Backoff and default bound for readiness waits
    pub poll: PollConfig,
    /// Force a generation instead of probing the cluster
    pub api_version: Option<ApiGeneration>,
    /// Annotation key used by class selection
    pub class_annotation: String,
}

impl Default for SnapshotterConfig {
    fn default() -> Self {
        Self {
            poll: PollConfig::default(),
            api_version: None,
            class_annotation: DEFAULT_CLASS_ANNOTATION.to_string(),
        }
    }
}

impl SnapshotterConfig {
    /// Override the polling intervals and the default wait bound.
    ///
    /// Intervals below [`MIN_POLL_INTERVAL`] are raised to it, and a max
    /// interval below the initial one is raised to match it.
    pub fn with_poll_bounds(
        mut self,
        initial_interval: Duration,
        max_interval: Duration,
        default_timeout: Duration,
    ) -> Self {
        let initial_interval = initial_interval.max(MIN_POLL_INTERVAL);
        self.poll.initial_interval = initial_interval;
        self.poll.max_interval = max_interval.max(initial_interval);
        self.poll.default_timeout = default_timeout;
        self
    }

    /// Skip probing and bind `generation`
    pub fn with_api_version(mut self, generation: Option<ApiGeneration>) -> Self {
        self.api_version = generation;
        self
    }

    /// Select classes by `annotation` instead of the default key
    pub fn with_class_annotation(mut self, annotation: impl Into<String>) -> Self {
        self.class_annotation = annotation.into();
        self
    }
}
