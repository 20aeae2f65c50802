//! Integration tests for snapshot API detection
//!
//! These tests tell the story of a backup tool starting up against a cluster
//! it knows nothing about.

use snapshotter::config::SnapshotterConfig;
use snapshotter::poll::WaitContext;
use snapshotter::snapshot::resolver::{detect_generation, KubeProbe, Probe, ProbeOutcome};
use snapshotter::snapshot::{resolve, ApiGeneration};

use super::helpers::{test_client, test_snapshotter};

/// Story: the tool probes the cluster and binds the generation it serves
#[tokio::test]
#[ignore = "requires kind cluster with snapshot CRDs"]
async fn story_detects_served_generation() {
    let client = test_client().await;
    let probe = KubeProbe::new(client.clone());

    let beta = probe.probe(ApiGeneration::Beta.api_version()).await;
    let generation = detect_generation(&WaitContext::new(), &probe).await.expect("detect");
    if beta == ProbeOutcome::Available {
        assert_eq!(generation, ApiGeneration::Beta);
    } else {
        assert_eq!(generation, ApiGeneration::Alpha);
    }

    let snapshotter = test_snapshotter(client).await;
    assert_eq!(snapshotter.generation(), generation);
}

/// Story: an operator pins the generation and probing is skipped
#[tokio::test]
#[ignore = "requires kind cluster with snapshot CRDs"]
async fn story_configured_generation_skips_probe() {
    let client = test_client().await;
    let config = SnapshotterConfig::default().with_api_version(Some(ApiGeneration::Alpha));
    let snapshotter = resolve(&WaitContext::new(), client, &config)
        .await
        .expect("resolve");
    assert_eq!(snapshotter.generation(), ApiGeneration::Alpha);
}

/// Story: an unknown version is reported as not served rather than failing
#[tokio::test]
#[ignore = "requires kind cluster"]
async fn story_unknown_version_is_not_served() {
    let client = test_client().await;
    let outcome = KubeProbe::new(client)
        .probe("snapshot.storage.k8s.io/v0nonexistent")
        .await;
    assert_eq!(outcome, ProbeOutcome::NotFound);
}

/// Story: deleting a snapshot that never existed is not an error
#[tokio::test]
#[ignore = "requires kind cluster with snapshot CRDs"]
async fn story_delete_nonexistent_snapshot_succeeds() {
    let snapshotter = test_snapshotter(test_client().await).await;
    snapshotter
        .delete(&WaitContext::new(), "nonexistent", "default")
        .await
        .expect("delete of a missing snapshot succeeds");

    let err = snapshotter
        .get(&WaitContext::new(), "nonexistent", "default")
        .await
        .expect_err("get of a missing snapshot fails");
    assert!(err.is_not_found());
}
