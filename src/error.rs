//! Error types for snapshot lifecycle operations
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries the kind, name and namespace of the object involved so
//! callers can tell which step of a multi-object operation (clone, restore) failed.

use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for snapshot operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error that is not a not-found or conflict
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The requested object does not exist
    #[error("{kind} {} not found", display_name(.namespace.as_deref(), .name))]
    NotFound {
        /// Resource kind (e.g. "VolumeSnapshot")
        kind: String,
        /// Object name
        name: String,
        /// Namespace, `None` for cluster-scoped objects
        namespace: Option<String>,
    },

    /// An object already exists at the target identity
    #[error("{kind} {} already exists", display_name(.namespace.as_deref(), .name))]
    AlreadyExists {
        /// Resource kind
        kind: String,
        /// Object name
        name: String,
        /// Namespace, `None` for cluster-scoped objects
        namespace: Option<String>,
    },

    /// A precondition for the operation does not hold
    #[error("precondition failed for {kind} {}: {message}", display_name(.namespace.as_deref(), .name))]
    Precondition {
        /// Resource kind of the object that failed the check
        kind: String,
        /// Object name
        name: String,
        /// Namespace, `None` for cluster-scoped objects
        namespace: Option<String>,
        /// What was expected
        message: String,
    },

    /// The snapshot itself reports a failure in its status
    #[error("VolumeSnapshot {namespace}/{name} failed: {message}")]
    SnapshotFailed {
        /// Snapshot name
        name: String,
        /// Snapshot namespace
        namespace: String,
        /// Message reported by the snapshot controller, verbatim
        message: String,
    },

    /// Neither supported snapshot API generation is served by the cluster
    #[error("unsupported platform: {message}")]
    UnsupportedPlatform {
        /// Outcome of each probe
        message: String,
    },

    /// The caller's cancellation token fired
    #[error("{operation} cancelled")]
    Cancelled {
        /// Operation that was interrupted
        operation: String,
    },

    /// The wait deadline passed before the condition converged
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// Operation that was waiting
        operation: String,
        /// Total time budget that was exhausted
        timeout: Duration,
    },

    /// An error wrapped with the operation that was in progress
    #[error("{context}: {source}")]
    Context {
        /// What was being done, and to which object
        context: String,
        /// The underlying error
        #[source]
        source: Box<Error>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Where the error occurred (e.g. "create_client", "probe")
        context: String,
    },
}

fn display_name(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{}/{}", ns, name),
        None => name.to_string(),
    }
}

impl Error {
    /// Create a not-found error for a namespaced object
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>, namespace: &str) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
            namespace: Some(namespace.to_string()),
        }
    }

    /// Create a not-found error for a cluster-scoped object
    pub fn not_found_cluster(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
            namespace: None,
        }
    }

    /// Create an already-exists error for a namespaced object
    pub fn already_exists(
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: &str,
    ) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            name: name.into(),
            namespace: Some(namespace.to_string()),
        }
    }

    /// Create an already-exists error for a cluster-scoped object
    pub fn already_exists_cluster(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            name: name.into(),
            namespace: None,
        }
    }

    /// Create a precondition error for a namespaced object
    pub fn precondition(
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: &str,
        msg: impl Into<String>,
    ) -> Self {
        Self::Precondition {
            kind: kind.into(),
            name: name.into(),
            namespace: Some(namespace.to_string()),
            message: msg.into(),
        }
    }

    /// Create a precondition error for a cluster-scoped object
    pub fn precondition_cluster(
        kind: impl Into<String>,
        name: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Precondition {
            kind: kind.into(),
            name: name.into(),
            namespace: None,
            message: msg.into(),
        }
    }

    /// Create an error for a snapshot whose status reports a failure
    pub fn snapshot_failed(
        name: impl Into<String>,
        namespace: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::SnapshotFailed {
            name: name.into(),
            namespace: namespace.into(),
            message: msg.into(),
        }
    }

    /// Create an unsupported-platform error
    pub fn unsupported_platform(msg: impl Into<String>) -> Self {
        Self::UnsupportedPlatform {
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Wrap this error with a description of the operation in progress
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through any `Context` layers
    pub fn root(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Check whether the object involved does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Error::NotFound { .. })
    }

    /// Check whether the operation was rejected because of the state of the
    /// objects involved (not ready, not bound, target taken, missing claim)
    pub fn is_precondition_failure(&self) -> bool {
        matches!(
            self.root(),
            Error::Precondition { .. } | Error::AlreadyExists { .. }
        )
    }

    /// Check if this error is retryable
    ///
    /// Conflicts, precondition failures and snapshot-reported failures need a
    /// change in cluster state before a retry can succeed. Kubernetes errors
    /// depend on the status code.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Context { source, .. } => source.is_retryable(),
            Error::Kube { source } => {
                // Don't retry on 4xx errors (validation, forbidden, etc.)
                !matches!(
                    source,
                    kube::Error::Api(ae) if (400..500).contains(&ae.code)
                )
            }
            Error::NotFound { .. } => false,
            Error::AlreadyExists { .. } => false,
            Error::Precondition { .. } => false,
            Error::SnapshotFailed { .. } => false,
            Error::UnsupportedPlatform { .. } => false,
            Error::Cancelled { .. } => false,
            Error::Timeout { .. } => true,
            Error::Internal { .. } => true,
        }
    }

    /// Map a kube-rs error for a specific object into the typed taxonomy.
    ///
    /// 404 becomes [`Error::NotFound`] and 409 becomes [`Error::AlreadyExists`];
    /// everything else stays a [`Error::Kube`].
    pub fn from_kube(err: kube::Error, kind: &str, name: &str, namespace: Option<&str>) -> Self {
        match &err {
            kube::Error::Api(ae) if ae.code == 404 => Self::NotFound {
                kind: kind.to_string(),
                name: name.to_string(),
                namespace: namespace.map(str::to_string),
            },
            kube::Error::Api(ae) if ae.code == 409 => Self::AlreadyExists {
                kind: kind.to_string(),
                name: name.to_string(),
                namespace: namespace.map(str::to_string),
            },
            _ => Self::Kube { source: err },
        }
    }
}
