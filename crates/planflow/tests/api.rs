use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::Json;
use planflow::api::models::{AddPlanItemRequest, CreateItemRequest, CreatePlanRequest};
use planflow::api::{self, PlansState, USER_ID_HEADER};
use planflow::jobs::{JobScheduler, JobTicket};
use planflow::plans::{MemoryPlanStore, PlanDuplication, PlanId, PlanStore};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// Remembers what was submitted and never runs anything.
#[derive(Default)]
struct RecordingScheduler {
    submitted: Mutex<Vec<(PlanDuplication, Duration)>>,
}

#[async_trait]
impl JobScheduler for RecordingScheduler {
    async fn submit(&self, job: PlanDuplication, delay: Duration) -> anyhow::Result<JobTicket> {
        self.submitted.lock().unwrap().push((job, delay));
        Ok(JobTicket {
            job_id: Uuid::new_v4(),
            job,
            retries: 0,
        })
    }

    async fn retry(&self, _ticket: &JobTicket, _delay: Duration, _reason: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A queue that is down.
struct DownScheduler;

#[async_trait]
impl JobScheduler for DownScheduler {
    async fn submit(&self, _job: PlanDuplication, _delay: Duration) -> anyhow::Result<JobTicket> {
        anyhow::bail!("queue unavailable")
    }

    async fn retry(&self, _ticket: &JobTicket, _delay: Duration, _reason: &str) -> anyhow::Result<()> {
        anyhow::bail!("queue unavailable")
    }
}

fn state() -> (PlansState, MemoryPlanStore, Arc<RecordingScheduler>) {
    let store = MemoryPlanStore::new();
    let scheduler = Arc::new(RecordingScheduler::default());
    let state = PlansState {
        store: Arc::new(store.clone()),
        scheduler: scheduler.clone(),
        submit_delay: Duration::from_secs(5),
    };
    (state, store, scheduler)
}

async fn parent_with_items(store: &MemoryPlanStore, owner_id: i64) -> PlanId {
    let parent = store.create_plan(owner_id).await.unwrap();
    for (title, quantity) in [("plank", 2), ("lunge", 4)] {
        let item = store.create_item(title).await.unwrap();
        store.add_plan_item(parent.id, item.id, quantity).await.unwrap();
    }
    parent.id
}

fn user(id: &'static str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_ID_HEADER, HeaderValue::from_static(id));
    headers
}

#[tokio::test]
async fn duplicate_returns_empty_plan_owned_by_requester() {
    let (state, store, scheduler) = state();
    let parent = parent_with_items(&store, 1).await;

    let (status, Json(body)) = api::duplicate_plan(State(state), Path(parent), user("9"))
        .await
        .unwrap();

    assert_eq!(status, StatusCode::CREATED);
    assert_ne!(body.plan.plan.id, parent);
    assert_eq!(body.plan.plan.owner_id, 9);
    assert!(body.plan.items.is_empty());

    let submitted = scheduler.submitted.lock().unwrap().clone();
    assert_eq!(
        submitted,
        vec![(
            PlanDuplication::new(body.plan.plan.id, parent),
            Duration::from_secs(5)
        )]
    );
    // nothing copied yet
    assert!(store.list_plan_items(body.plan.plan.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_without_user_keeps_parent_owner() {
    let (state, store, _) = state();
    let parent = parent_with_items(&store, 7).await;

    let (_, Json(body)) = api::duplicate_plan(State(state.clone()), Path(parent), HeaderMap::new())
        .await
        .unwrap();
    assert_eq!(body.plan.plan.owner_id, 7);

    let (_, Json(body)) = api::duplicate_plan(State(state), Path(parent), user("not-a-number"))
        .await
        .unwrap();
    assert_eq!(body.plan.plan.owner_id, 7);
}

#[tokio::test]
async fn duplicate_of_unknown_plan_is_404_and_schedules_nothing() {
    let (state, store, scheduler) = state();

    let err = api::duplicate_plan(State(state), Path(PlanId(12)), user("1"))
        .await
        .unwrap_err();

    assert_eq!(err.0, StatusCode::NOT_FOUND);
    assert!(scheduler.submitted.lock().unwrap().is_empty());
    assert!(store.get_plan(PlanId(1)).await.unwrap().is_none());
}

#[tokio::test]
async fn failed_submit_removes_the_empty_copy() {
    let store = MemoryPlanStore::new();
    let parent = parent_with_items(&store, 1).await;
    let state = PlansState {
        store: Arc::new(store.clone()),
        scheduler: Arc::new(DownScheduler),
        submit_delay: Duration::from_secs(5),
    };

    let err = api::duplicate_plan(State(state), Path(parent), user("2"))
        .await
        .unwrap_err();
    assert_eq!(err.0, StatusCode::INTERNAL_SERVER_ERROR);

    // the copy would have been the next plan id
    assert!(store.get_plan(PlanId(parent.0 + 1)).await.unwrap().is_none());
    assert!(store.get_plan(parent).await.unwrap().is_some());
    assert_eq!(store.list_plan_items(parent).await.unwrap().len(), 2);
}

#[tokio::test]
async fn plan_crud_round_trip() {
    let (state, _, _) = state();

    let (status, Json(plan)) =
        api::create_plan(State(state.clone()), Json(CreatePlanRequest { owner_id: 3 }))
            .await
            .unwrap();
    assert_eq!(status, StatusCode::CREATED);

    let (_, Json(item)) = api::create_item(
        State(state.clone()),
        Json(CreateItemRequest {
            title: "Burpee".into(),
        }),
    )
    .await
    .unwrap();

    let (status, Json(link)) = api::add_plan_item(
        State(state.clone()),
        Path(plan.id),
        Json(AddPlanItemRequest {
            item_id: item.id,
            quantity: 10,
        }),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(link.plan_id, plan.id);

    let Json(full) = api::get_plan(State(state), Path(plan.id)).await.unwrap();
    assert_eq!(full.plan, plan);
    assert_eq!(full.items, vec![link]);
}

#[tokio::test]
async fn item_titles_are_unique_ignoring_case() {
    let (state, _, _) = state();
    let create = |title: &str| {
        api::create_item(
            State(state.clone()),
            Json(CreateItemRequest {
                title: title.to_string(),
            }),
        )
    };

    create("Pull-up").await.unwrap();
    let err = create("PULL-UP").await.unwrap_err();
    assert_eq!(err.0, StatusCode::CONFLICT);

    let err = create("   ").await.unwrap_err();
    assert_eq!(err.0, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn bad_links_are_rejected() {
    let (state, store, _) = state();
    let plan = store.create_plan(1).await.unwrap();
    let item = store.create_item("row").await.unwrap();

    let err = api::add_plan_item(
        State(state.clone()),
        Path(plan.id),
        Json(AddPlanItemRequest {
            item_id: item.id,
            quantity: 0,
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.0, StatusCode::BAD_REQUEST);

    let err = api::add_plan_item(
        State(state.clone()),
        Path(PlanId(99)),
        Json(AddPlanItemRequest {
            item_id: item.id,
            quantity: 1,
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.0, StatusCode::NOT_FOUND);

    let err = api::get_plan(State(state), Path(PlanId(99))).await.unwrap_err();
    assert_eq!(err.0, StatusCode::NOT_FOUND);
}
