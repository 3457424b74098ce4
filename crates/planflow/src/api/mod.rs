use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::api::models::{
    AddPlanItemRequest, CreateItemRequest, CreatePlanRequest, DuplicateResponse, JobListItem,
};
use crate::jobs::scheduler::JobScheduler;
use crate::jobs::timeline::{build_timeline, explain, JobExplanation, JobTimeline};
use crate::jobs::{AttemptsRepo, JobsRepo};
use crate::plans::{Item, Plan, PlanDuplication, PlanId, PlanItem, PlanStore, PlanWithItems, StoreError};

pub mod models;

/// Header carrying the id of the requesting user, when there is one.
pub const USER_ID_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct PlansState {
    pub store: Arc<dyn PlanStore>,
    pub scheduler: Arc<dyn JobScheduler>,
    pub submit_delay: Duration,
}

#[derive(Clone)]
pub struct AdminState {
    pub jobs: JobsRepo,
    pub attempts: AttemptsRepo,
}

pub fn plans_router(state: PlansState) -> Router {
    Router::new()
        .route("/plans", post(create_plan))
        .route("/plans/:id", get(get_plan))
        .route("/plans/:id/items", post(add_plan_item))
        .route("/plans/:id/duplicate", post(duplicate_plan))
        .route("/plans/:id/duplicate/", post(duplicate_plan))
        .route("/items", post(create_item))
        .with_state(state)
}

pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/:id/timeline", get(get_timeline))
        .route("/jobs/:id/explain", get(explain_job))
        .route("/jobs/:id/replay", post(replay_job))
        .route("/dlq", get(list_dlq))
        .with_state(state)
}

pub fn router(plans: PlansState, admin: AdminState) -> Router {
    plans_router(plans)
        .merge(admin_router(admin))
        .route("/health", get(health))
}

type ApiResult<T> = Result<T, (StatusCode, String)>;

fn internal_err(e: anyhow::Error) -> (StatusCode, String) {
    tracing::error!(error = %e, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("internal error: {e}"),
    )
}

fn store_err(e: StoreError) -> (StatusCode, String) {
    match e {
        StoreError::PlanNotFound(_) | StoreError::ItemNotFound(_) => {
            (StatusCode::NOT_FOUND, e.to_string())
        }
        StoreError::InvalidQuantity(_) => (StatusCode::BAD_REQUEST, e.to_string()),
        StoreError::Conflict(_) => (StatusCode::CONFLICT, e.to_string()),
        StoreError::Unavailable(_) | StoreError::Database(_) => internal_err(e.into()),
    }
}

fn plan_not_found(id: PlanId) -> (StatusCode, String) {
    store_err(StoreError::PlanNotFound(id))
}

/// Requesting user from [`USER_ID_HEADER`]; unparsable values count as anonymous.
fn requesting_user(headers: &HeaderMap) -> Option<i64> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

// ----------------------------
// Plans
// ----------------------------

pub async fn create_plan(
    State(state): State<PlansState>,
    Json(body): Json<CreatePlanRequest>,
) -> ApiResult<(StatusCode, Json<Plan>)> {
    let plan = state
        .store
        .create_plan(body.owner_id)
        .await
        .map_err(store_err)?;
    Ok((StatusCode::CREATED, Json(plan)))
}

pub async fn get_plan(
    State(state): State<PlansState>,
    Path(id): Path<PlanId>,
) -> ApiResult<Json<PlanWithItems>> {
    let plan = state
        .store
        .get_plan(id)
        .await
        .map_err(store_err)?
        .ok_or_else(|| plan_not_found(id))?;
    let items = state.store.list_plan_items(id).await.map_err(store_err)?;
    Ok(Json(PlanWithItems { plan, items }))
}

pub async fn add_plan_item(
    State(state): State<PlansState>,
    Path(id): Path<PlanId>,
    Json(body): Json<AddPlanItemRequest>,
) -> ApiResult<(StatusCode, Json<PlanItem>)> {
    let link = state
        .store
        .add_plan_item(id, body.item_id, body.quantity)
        .await
        .map_err(store_err)?;
    Ok((StatusCode::CREATED, Json(link)))
}

pub async fn create_item(
    State(state): State<PlansState>,
    Json(body): Json<CreateItemRequest>,
) -> ApiResult<(StatusCode, Json<Item>)> {
    if body.title.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "title is required".into()));
    }
    let item = state
        .store
        .create_item(&body.title)
        .await
        .map_err(store_err)?;
    Ok((StatusCode::CREATED, Json(item)))
}

/// Create an empty copy of plan `id` now and fill it out of band.
pub async fn duplicate_plan(
    State(state): State<PlansState>,
    Path(id): Path<PlanId>,
    headers: HeaderMap,
) -> ApiResult<(StatusCode, Json<DuplicateResponse>)> {
    let parent = state
        .store
        .get_plan(id)
        .await
        .map_err(store_err)?
        .ok_or_else(|| plan_not_found(id))?;

    let owner_id = requesting_user(&headers).unwrap_or(parent.owner_id);
    let target = state
        .store
        .create_plan(owner_id)
        .await
        .map_err(store_err)?;

    let ticket = match state
        .scheduler
        .submit(PlanDuplication::new(target.id, parent.id), state.submit_delay)
        .await
    {
        Ok(ticket) => ticket,
        Err(e) => {
            // nothing will ever fill the new plan, so don't leave it behind
            match state.store.delete_plan(target.id).await {
                Ok(_) => tracing::warn!(
                    target_plan_id = %target.id,
                    parent_plan_id = %parent.id,
                    "submit failed, empty copy removed"
                ),
                Err(del) => tracing::error!(
                    target_plan_id = %target.id,
                    parent_plan_id = %parent.id,
                    error = %del,
                    "submit failed and the empty copy could not be removed"
                ),
            }
            return Err(internal_err(e));
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(DuplicateResponse {
            plan: PlanWithItems {
                plan: target,
                items: Vec::new(),
            },
            job_id: ticket.job_id,
        }),
    ))
}

// ----------------------------
// Jobs (inspection)
// ----------------------------

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub queue: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub cursor_created_at: Option<DateTime<Utc>>,
    pub cursor_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub items: Vec<JobListItem>,
    pub next_cursor_created_at: Option<DateTime<Utc>>,
    pub next_cursor_id: Option<Uuid>,
}

pub async fn list_jobs(
    State(state): State<AdminState>,
    Query(q): Query<ListJobsQuery>,
) -> ApiResult<Json<ListJobsResponse>> {
    let items = state
        .jobs
        .list_jobs(
            q.queue.as_deref(),
            q.status.as_deref(),
            q.limit.unwrap_or(100),
            q.cursor_created_at,
            q.cursor_id,
        )
        .await
        .map_err(internal_err)?;

    let (next_cursor_created_at, next_cursor_id) = items
        .last()
        .map(|x| (Some(x.created_at), Some(x.id)))
        .unwrap_or((None, None));

    Ok(Json(ListJobsResponse {
        items,
        next_cursor_created_at,
        next_cursor_id,
    }))
}

pub async fn list_dlq(
    State(state): State<AdminState>,
    Query(mut q): Query<ListJobsQuery>,
) -> ApiResult<Json<ListJobsResponse>> {
    q.status = Some("dlq".to_string());
    list_jobs(State(state), Query(q)).await
}

async fn load_timeline(state: &AdminState, id: Uuid) -> ApiResult<JobTimeline> {
    build_timeline(&state.jobs, &state.attempts, id)
        .await
        .map_err(internal_err)?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "job not found".to_string()))
}

pub async fn get_timeline(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobTimeline>> {
    load_timeline(&state, id).await.map(Json)
}

pub async fn explain_job(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobExplanation>> {
    let tl = load_timeline(&state, id).await?;
    Ok(Json(explain(&tl)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ReplayRequest {
    pub queue: Option<String>,
    pub run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ReplayResponse {
    pub new_job_id: Uuid,
    pub replay_of_job_id: Uuid,
}

pub async fn replay_job(
    State(state): State<AdminState>,
    Path(id): Path<Uuid>,
    body: Option<Json<ReplayRequest>>,
) -> ApiResult<(StatusCode, Json<ReplayResponse>)> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let new_job_id = state
        .jobs
        .replay_job(id, body.queue.as_deref(), body.run_at)
        .await
        .map_err(internal_err)?
        .ok_or_else(|| (StatusCode::NOT_FOUND, "job not found".to_string()))?;

    tracing::info!(replay_of_job_id = %id, %new_job_id, "job replayed");

    Ok((
        StatusCode::CREATED,
        Json(ReplayResponse {
            new_job_id,
            replay_of_job_id: id,
        }),
    ))
}

pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
