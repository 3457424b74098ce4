mod common;

use common::{seeded, FaultyStore};
use planflow::jobs::error_codes::ErrorCode;
use planflow::jobs::{FailureReason, JobOutcome, RetryPolicy};
use planflow::plans::{ItemId, MemoryPlanStore, PlanDuplication, PlanId, PlanItem, PlanStore};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn pairs(links: &[PlanItem]) -> Vec<(ItemId, i32)> {
    let mut out: Vec<_> = links.iter().map(|l| (l.item_id, l.quantity)).collect();
    out.sort();
    out
}

#[tokio::test]
async fn copies_every_item_with_its_quantity() {
    let store = MemoryPlanStore::new();
    let (target, parent) = seeded(&store).await;
    let before = store.list_plan_items(parent).await.unwrap();

    let outcome = PlanDuplication::new(target, parent)
        .run(&store, 0, &RetryPolicy::default())
        .await;

    assert_eq!(outcome, JobOutcome::Success(3));
    let copied = store.list_plan_items(target).await.unwrap();
    assert_eq!(pairs(&copied), pairs(&before));
    assert!(copied.iter().all(|l| l.plan_id == target));
    // parent untouched
    assert_eq!(store.list_plan_items(parent).await.unwrap(), before);
}

#[tokio::test]
async fn empty_parent_copies_nothing() {
    let store = MemoryPlanStore::new();
    let parent = store.create_plan(1).await.unwrap();
    let target = store.create_plan(1).await.unwrap();

    let outcome = PlanDuplication::new(target.id, parent.id)
        .run(&store, 0, &RetryPolicy::default())
        .await;

    assert_eq!(outcome, JobOutcome::Success(0));
    assert!(store.list_plan_items(target.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_target_fails_permanently() {
    let store = MemoryPlanStore::new();
    let (_, parent) = seeded(&store).await;

    let outcome = PlanDuplication::new(PlanId(999), parent)
        .run(&store, 0, &RetryPolicy::default())
        .await;

    assert_eq!(
        outcome,
        JobOutcome::PermanentFailure(FailureReason::NotFound(PlanId(999)))
    );
    assert!(outcome.is_terminal());
}

#[tokio::test]
async fn missing_parent_fails_permanently_and_leaves_target_empty() {
    let store = MemoryPlanStore::new();
    let (target, _) = seeded(&store).await;

    let outcome = PlanDuplication::new(target, PlanId(999))
        .run(&store, 2, &RetryPolicy::default())
        .await;

    assert_eq!(
        outcome,
        JobOutcome::PermanentFailure(FailureReason::NotFound(PlanId(999)))
    );
    assert!(store.list_plan_items(target).await.unwrap().is_empty());
}

#[tokio::test]
async fn failure_mid_copy_rolls_back_and_requests_retry() {
    let inner = MemoryPlanStore::new();
    let (target, parent) = seeded(&inner).await;
    let store = FaultyStore::failing_after(inner.clone(), 2);

    let outcome = PlanDuplication::new(target, parent)
        .run(&store, 0, &RetryPolicy::default())
        .await;

    match outcome {
        JobOutcome::RetryRequested { delay, code, error } => {
            assert_eq!(delay, Duration::from_secs(5));
            assert_eq!(code, ErrorCode::StoreError);
            assert!(error.contains("connection reset"));
        }
        other => panic!("expected retry, got {other:?}"),
    }
    assert_eq!(store.begins.load(Ordering::SeqCst), 1);
    assert!(inner.list_plan_items(target).await.unwrap().is_empty());
}

#[tokio::test]
async fn retry_delay_doubles_with_each_retry() {
    let inner = MemoryPlanStore::new();
    let (target, parent) = seeded(&inner).await;
    let store = FaultyStore::failing_after(inner, 0);
    let job = PlanDuplication::new(target, parent);
    let policy = RetryPolicy::default();

    let mut delays = Vec::new();
    for retries in 0..5 {
        match job.run(&store, retries, &policy).await {
            JobOutcome::RetryRequested { delay, .. } => delays.push(delay.as_secs()),
            other => panic!("expected retry at {retries}, got {other:?}"),
        }
    }
    assert_eq!(delays, vec![5, 10, 20, 40, 80]);
}

#[tokio::test]
async fn gives_up_after_five_retries() {
    let inner = MemoryPlanStore::new();
    let (target, parent) = seeded(&inner).await;
    let store = FaultyStore::failing_after(inner.clone(), 1);

    let outcome = PlanDuplication::new(target, parent)
        .run(&store, 5, &RetryPolicy::default())
        .await;

    match outcome {
        JobOutcome::PermanentFailure(FailureReason::RetriesExhausted { retries, last_error }) => {
            assert_eq!(retries, 5);
            assert!(last_error.contains("connection reset"));
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
    assert!(inner.list_plan_items(target).await.unwrap().is_empty());
}

#[tokio::test]
async fn second_delivery_does_not_duplicate_items() {
    let store = MemoryPlanStore::new();
    let (target, parent) = seeded(&store).await;
    let job = PlanDuplication::new(target, parent);
    let policy = RetryPolicy::default();

    assert_eq!(job.run(&store, 0, &policy).await, JobOutcome::Success(3));
    assert_eq!(job.run(&store, 0, &policy).await, JobOutcome::Success(0));
    assert_eq!(store.list_plan_items(target).await.unwrap().len(), 3);
}

#[tokio::test]
async fn concurrent_deliveries_copy_once() {
    let store = Arc::new(MemoryPlanStore::new());
    let (target, parent) = seeded(&store).await;
    let job = PlanDuplication::new(target, parent);
    let policy = RetryPolicy::default();

    let (a, b) = tokio::join!(
        job.run(store.as_ref(), 0, &policy),
        job.run(store.as_ref(), 0, &policy)
    );

    let mut copied = [a, b].map(|o| match o {
        JobOutcome::Success(n) => n,
        other => panic!("expected success, got {other:?}"),
    });
    copied.sort();
    assert_eq!(copied, [0, 3]);
    assert_eq!(store.list_plan_items(target).await.unwrap().len(), 3);
}

#[test]
fn payload_round_trips_through_job_row() {
    let job = PlanDuplication::new(PlanId(7), PlanId(3));
    let payload = job.to_payload();
    assert_eq!(payload["target_plan_id"], 7);
    assert_eq!(payload["parent_plan_id"], 3);
    assert_eq!(PlanDuplication::from_payload(&payload).unwrap(), job);

    let bad = serde_json::json!({ "target_plan_id": 7 });
    assert!(matches!(
        PlanDuplication::from_payload(&bad),
        Err(FailureReason::BadPayload(_))
    ));
}
