mod common;

use bucket_sync::listing::{Lister, Origin};
use bucket_sync::pipeline::sync_listings;
use bucket_sync::reconciliation::{
    apply, reconcile, CancelSignal, ItemOutcome, RetryPolicy, TransferOptions,
};
use bucket_sync::transfer::DestinationDeleter;
use bucket_sync::MemoryBucket;
use common::{hash_listing, shared, CountingBucket, FlakySource, UnreachableSource};
use std::collections::BTreeSet;

fn fast_options() -> TransferOptions {
    TransferOptions {
        concurrency: 2,
        retry: RetryPolicy {
            max_attempts: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
        },
    }
}

#[test]
fn test_every_identity_lands_in_exactly_one_set() {
    let cases = [
        (vec![], vec![]),
        (vec![("a", "1")], vec![]),
        (vec![], vec![("a", "1")]),
        (vec![("a", "1"), ("b", "2")], vec![("a", "1"), ("c", "3")]),
        (vec![("a", "1"), ("b", "2")], vec![("a", "9"), ("b", "2"), ("x", "0")]),
    ];

    for (source, destination) in cases {
        let source = hash_listing(Origin::Source, &source);
        let destination = hash_listing(Origin::Destination, &destination);
        let plan = reconcile(&source, &destination).expect("Should reconcile");

        let uploads = plan.upload_identities();
        let deletes = plan.delete_identities();
        let unchanged = plan.unchanged_identities();

        assert!(uploads.is_disjoint(&deletes));
        assert!(uploads.is_disjoint(&unchanged));
        assert!(deletes.is_disjoint(&unchanged));

        let union: BTreeSet<&str> = source.identities().chain(destination.identities()).collect();
        let covered: BTreeSet<&str> = uploads
            .iter()
            .chain(deletes.iter())
            .chain(unchanged.iter())
            .copied()
            .collect();
        assert_eq!(covered, union);
        assert_eq!(
            uploads.len() + deletes.len() + unchanged.len(),
            union.len(),
            "No identity may appear twice"
        );
    }
}

#[test]
fn test_matching_items_are_never_uploaded() {
    let source = hash_listing(Origin::Source, &[("a", "1"), ("b", "2"), ("c", "3")]);
    let destination = hash_listing(Origin::Destination, &[("a", "1"), ("b", "2"), ("c", "3")]);

    let plan = reconcile(&source, &destination).expect("Should reconcile");
    assert!(plan.is_noop());
    assert_eq!(plan.unchanged.len(), 3);
}

#[test]
fn test_destination_only_items_are_deleted_not_uploaded() {
    let source = hash_listing(Origin::Source, &[("a", "1")]);
    let destination = hash_listing(Origin::Destination, &[("a", "1"), ("orphan", "2")]);

    let plan = reconcile(&source, &destination).expect("Should reconcile");
    assert!(plan.delete_identities().contains("orphan"));
    assert!(!plan.upload_identities().contains("orphan"));
}

#[tokio::test]
async fn test_second_run_is_a_noop() {
    let source = MemoryBucket::with_origin(Origin::Source);
    source.insert("pr.class", "code,text", Some("3/28/2025 8:30 AM")).await;
    source.insert("pr.contacts", "contact", Some("3/28/2025 8:30 AM")).await;

    let destination = MemoryBucket::new();
    destination.insert("retired.csv", "old", None).await;

    let first = sync_listings(
        "bls",
        shared(source.clone()),
        shared(destination.clone()),
        &fast_options(),
        false,
        &CancelSignal::never(),
    )
    .await
    .expect("First run should succeed");
    assert_eq!(first.summary.to_upload, 2);
    assert_eq!(first.summary.to_delete, 1);

    let counting = shared(CountingBucket::new(destination.clone()));
    let second = sync_listings(
        "bls",
        shared(source),
        counting.clone(),
        &fast_options(),
        false,
        &CancelSignal::never(),
    )
    .await
    .expect("Second run should succeed");

    assert!(second.plan.is_noop());
    assert_eq!(second.summary.unchanged, 2);
    assert_eq!(counting.puts(), 0);
    let report = second.report.expect("Should have a report");
    assert_eq!(report.skipped(), 2);
}

#[tokio::test]
async fn test_one_failed_upload_does_not_stop_the_batch() {
    let source = MemoryBucket::with_origin(Origin::Source);
    for name in ["a", "b", "c", "d"] {
        source.insert(name, name, None).await;
    }
    let destination = MemoryBucket::new();
    destination.insert("d", "d", None).await;
    destination.insert("stale", "x", None).await;

    let flaky = shared(FlakySource::new(source, &["b"]));
    let outcome = sync_listings(
        "bls",
        flaky.clone(),
        shared(destination.clone()),
        &fast_options(),
        false,
        &CancelSignal::never(),
    )
    .await
    .expect("Run should finish despite the failure");

    let report = outcome.report.as_ref().expect("Should have a report");
    assert_eq!(report.outcome("a"), Some(&ItemOutcome::Uploaded));
    assert_eq!(report.outcome("c"), Some(&ItemOutcome::Uploaded));
    assert_eq!(report.outcome("d"), Some(&ItemOutcome::Skipped));
    assert_eq!(report.outcome("stale"), Some(&ItemOutcome::Deleted));
    assert!(matches!(report.outcome("b"), Some(ItemOutcome::Failed { reason }) if reason.contains("connection reset")));
    assert_eq!(report.outcomes.len(), 5);
    assert!(outcome.has_failures());

    assert_eq!(destination.identities().await, vec!["a", "c", "d"]);
}

#[tokio::test]
async fn test_failed_write_is_retried_then_reported() {
    let source = MemoryBucket::with_origin(Origin::Source);
    source.insert("a", "1", None).await;
    source.insert("b", "2", None).await;

    let destination = shared(CountingBucket::refusing(MemoryBucket::new(), &["a"]));
    let outcome = sync_listings(
        "bls",
        shared(source),
        destination.clone(),
        &fast_options(),
        false,
        &CancelSignal::never(),
    )
    .await
    .expect("Run should finish");

    let report = outcome.report.expect("Should have a report");
    assert!(matches!(report.outcome("a"), Some(ItemOutcome::Failed { .. })));
    assert_eq!(report.outcome("b"), Some(&ItemOutcome::Uploaded));
    // two attempts for "a", one for "b"
    assert_eq!(destination.puts(), 3);
}

#[tokio::test]
async fn test_delete_of_already_absent_object_counts_as_deleted() {
    let source = MemoryBucket::with_origin(Origin::Source);
    source.insert("a", "1", None).await;
    let destination = MemoryBucket::new();
    destination.insert("a", "1", None).await;
    destination.insert("gone.csv", "old", None).await;

    let plan = reconcile(
        &source.list().await.expect("Should list source"),
        &destination.list().await.expect("Should list destination"),
    )
    .expect("Should reconcile");
    assert_eq!(plan.delete_identities().into_iter().collect::<Vec<_>>(), vec!["gone.csv"]);

    // Someone else removes it between planning and applying
    destination.delete("gone.csv").await.expect("Should delete out of band");

    let counting = shared(CountingBucket::new(destination.clone()));
    let report = apply(
        plan,
        shared(source),
        counting.clone(),
        counting.clone(),
        &fast_options(),
        &CancelSignal::never(),
    )
    .await;

    assert_eq!(report.outcome("gone.csv"), Some(&ItemOutcome::Deleted));
    assert!(!report.has_failures());
    assert_eq!(counting.deletes(), 1, "NotFound must not be retried");
    assert_eq!(destination.identities().await, vec!["a"]);
}

#[tokio::test]
async fn test_unreachable_source_aborts_before_any_change() {
    let destination = MemoryBucket::new();
    destination.insert("keep.csv", "data", None).await;

    let counting = shared(CountingBucket::new(destination.clone()));
    let result = sync_listings(
        "bls",
        shared(UnreachableSource),
        counting.clone(),
        &fast_options(),
        false,
        &CancelSignal::never(),
    )
    .await;

    assert!(result.is_err());
    assert_eq!(counting.puts(), 0);
    assert_eq!(destination.identities().await, vec!["keep.csv"]);
}

#[tokio::test]
async fn test_dry_run_leaves_destination_alone() {
    let source = MemoryBucket::with_origin(Origin::Source);
    source.insert("new.csv", "1", None).await;
    let destination = MemoryBucket::new();
    destination.insert("old.csv", "2", None).await;

    let outcome = sync_listings(
        "bls",
        shared(source),
        shared(destination.clone()),
        &fast_options(),
        true,
        &CancelSignal::never(),
    )
    .await
    .expect("Dry run should succeed");

    assert!(outcome.dry_run);
    assert!(outcome.report.is_none());
    assert_eq!(outcome.summary.to_upload, 1);
    assert_eq!(outcome.summary.to_delete, 1);
    assert_eq!(destination.identities().await, vec!["old.csv"]);
}
