//! Integration tests for the snapshot lifecycle
//!
//! These tests tell the story of a backup: snapshot a claim, record its
//! source, restore it into another namespace and clean up.

use std::time::Duration;

use snapshotter::config::DEFAULT_CLASS_ANNOTATION;
use snapshotter::poll::WaitContext;
use snapshotter::snapshot::SnapshotPhase;

use super::helpers::{
    cleanup_namespace, ensure_namespace, test_client, test_snapshotter, unique, TestClaim,
};

/// Story: snapshotting a claim that does not exist fails before anything is created
#[tokio::test]
#[ignore = "requires kind cluster with snapshot CRDs"]
async fn story_missing_claim_is_rejected() {
    let snapshotter = test_snapshotter(test_client().await).await;
    let ctx = WaitContext::new();
    let name = unique("snap-missing");

    let err = snapshotter
        .create(&ctx, &name, "default", "no-such-claim", None, false)
        .await
        .expect_err("missing claim");
    assert!(err.is_precondition_failure());

    let err = snapshotter
        .get(&ctx, &name, "default")
        .await
        .expect_err("nothing was created");
    assert!(err.is_not_found());
}

/// Story: a backup snapshots a claim, waits for it, and clones it into a
/// restore namespace where it becomes ready with its own content
#[tokio::test]
#[ignore = "requires kind cluster with a snapshot-capable CSI driver"]
async fn story_snapshot_and_clone_across_namespaces() {
    let client = test_client().await;
    let snapshotter = test_snapshotter(client.clone()).await;
    let claim = TestClaim::from_env();
    let ctx = WaitContext::with_timeout(Duration::from_secs(300));

    let class = snapshotter
        .get_volume_snapshot_class(&ctx, DEFAULT_CLASS_ANNOTATION)
        .await
        .expect("an annotated VolumeSnapshotClass is required");

    let snap = unique("snap-1");
    snapshotter
        .create(&ctx, &snap, &claim.namespace, &claim.name, Some(&class), true)
        .await
        .expect("snapshot should become ready");
    let original = snapshotter
        .get(&ctx, &snap, &claim.namespace)
        .await
        .expect("get original");
    assert_eq!(original.phase(), SnapshotPhase::Ready);

    let restore_ns = unique("restore");
    ensure_namespace(&client, &restore_ns).await;

    let clone = unique("snap-2");
    let cloned = snapshotter
        .clone_snapshot(&ctx, &snap, &claim.namespace, &clone, &restore_ns, true)
        .await;

    let result = async {
        cloned?;
        let copy = snapshotter.get(&ctx, &clone, &restore_ns).await?;
        let a = snapshotter.get_source(&ctx, &snap, &claim.namespace).await?;
        let b = snapshotter.get_source(&ctx, &clone, &restore_ns).await?;
        Ok::<_, snapshotter::Error>((copy, a, b))
    }
    .await;

    // Cleanup before asserting so a failure does not leak objects
    let _ = snapshotter.delete(&ctx, &clone, &restore_ns).await;
    let _ = snapshotter.delete(&ctx, &snap, &claim.namespace).await;
    cleanup_namespace(&client, &restore_ns).await;

    let (copy, a, b) = result.expect("clone should become ready");
    assert!(copy.is_ready_to_use());
    assert_ne!(copy.content_name(), original.content_name());
    assert_eq!(a.handle, b.handle);
    assert_eq!(a.driver, b.driver);
}
