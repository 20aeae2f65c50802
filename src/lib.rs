//! Snapshotter - CSI volume snapshot lifecycle management
//!
//! Creates, waits on, inspects, clones and deletes volume snapshots through
//! the CSI external-snapshotter API, on clusters serving either the
//! `v1alpha1` or the `v1beta1` generation of `snapshot.storage.k8s.io`.
//!
//! # Architecture
//!
//! - A resolver probes the cluster once and binds the matching backend
//! - Each backend implements the full [`snapshot::Snapshotter`] contract on
//!   its own schema
//! - Every wait goes through [`poll::wait`], bounded by the caller's
//!   [`poll::WaitContext`]
//!
//! # Modules
//!
//! - [`snapshot`] - The Snapshotter contract, both backends and the resolver
//! - [`crd`] - Typed VolumeSnapshot/Content/Class schemas per generation
//! - [`poll`] - Bounded polling with backoff and cancellation
//! - [`config`] - Snapshotter configuration
//! - [`kube_utils`] - Client construction and typed API helpers
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod poll;
pub mod snapshot;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
