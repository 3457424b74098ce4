mod common;

use common::setup_db;
use planflow::jobs::{FailureReason, JobOutcome, RetryPolicy};
use planflow::plans::{ItemId, PgPlanStore, PlanDuplication, PlanId, PlanStore, StoreError};
use serial_test::serial;

#[tokio::test]
#[serial]
async fn item_titles_conflict_ignoring_case() {
    let Some(pool) = setup_db().await else { return };
    let store = PgPlanStore::new(pool);

    store.create_item("Squat").await.unwrap();
    let err = store.create_item(" squat ").await.unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
}

#[tokio::test]
#[serial]
async fn bad_links_map_to_typed_errors() {
    let Some(pool) = setup_db().await else { return };
    let store = PgPlanStore::new(pool);
    let plan = store.create_plan(1).await.unwrap();
    let item = store.create_item("row").await.unwrap();

    assert!(matches!(
        store.add_plan_item(plan.id, item.id, 0).await,
        Err(StoreError::InvalidQuantity(0))
    ));
    assert!(matches!(
        store.add_plan_item(PlanId(9_999), item.id, 1).await,
        Err(StoreError::PlanNotFound(PlanId(9_999)))
    ));
    assert!(matches!(
        store.add_plan_item(plan.id, ItemId(9_999), 1).await,
        Err(StoreError::ItemNotFound(ItemId(9_999)))
    ));
}

#[tokio::test]
#[serial]
async fn dropped_transaction_leaves_no_rows() {
    let Some(pool) = setup_db().await else { return };
    let store = PgPlanStore::new(pool);
    let plan = store.create_plan(1).await.unwrap();
    let item = store.create_item("plank").await.unwrap();

    {
        let mut tx = store.begin().await.unwrap();
        assert!(tx.lock_plan(plan.id).await.unwrap().is_some());
        tx.insert_plan_item(plan.id, item.id, 3).await.unwrap();
        assert_eq!(tx.list_plan_items(plan.id).await.unwrap().len(), 1);
    }

    assert!(store.list_plan_items(plan.id).await.unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn duplication_copies_then_is_idempotent() {
    let Some(pool) = setup_db().await else { return };
    let store = PgPlanStore::new(pool);
    let parent = store.create_plan(1).await.unwrap();
    for (title, quantity) in [("squat", 5), ("lunge", 2), ("dip", 8)] {
        let item = store.create_item(title).await.unwrap();
        store.add_plan_item(parent.id, item.id, quantity).await.unwrap();
    }
    let target = store.create_plan(2).await.unwrap();
    let job = PlanDuplication::new(target.id, parent.id);
    let policy = RetryPolicy::default();

    assert_eq!(job.run(&store, 0, &policy).await, JobOutcome::Success(3));
    assert_eq!(job.run(&store, 1, &policy).await, JobOutcome::Success(0));

    let copied: Vec<_> = store
        .list_plan_items(target.id)
        .await
        .unwrap()
        .into_iter()
        .map(|l| (l.item_id, l.quantity))
        .collect();
    let parent_links: Vec<_> = store
        .list_plan_items(parent.id)
        .await
        .unwrap()
        .into_iter()
        .map(|l| (l.item_id, l.quantity))
        .collect();
    assert_eq!(copied, parent_links);
}

#[tokio::test]
#[serial]
async fn duplication_of_missing_parent_is_not_found() {
    let Some(pool) = setup_db().await else { return };
    let store = PgPlanStore::new(pool);
    let target = store.create_plan(2).await.unwrap();

    let outcome = PlanDuplication::new(target.id, PlanId(123_456))
        .run(&store, 0, &RetryPolicy::default())
        .await;
    assert_eq!(
        outcome,
        JobOutcome::PermanentFailure(FailureReason::NotFound(PlanId(123_456)))
    );
}

#[tokio::test]
#[serial]
async fn deleting_a_plan_takes_its_links() {
    let Some(pool) = setup_db().await else { return };
    let store = PgPlanStore::new(pool);
    let plan = store.create_plan(1).await.unwrap();
    let item = store.create_item("crunch").await.unwrap();
    store.add_plan_item(plan.id, item.id, 12).await.unwrap();

    assert!(store.delete_plan(plan.id).await.unwrap());
    assert!(store.get_plan(plan.id).await.unwrap().is_none());
    assert!(store.list_plan_items(plan.id).await.unwrap().is_empty());
    assert!(!store.delete_plan(plan.id).await.unwrap());
}
