#![allow(dead_code)]

use async_trait::async_trait;
use planflow::jobs::NewJob;
use planflow::plans::{Item, ItemId, MemoryPlanStore, Plan, PlanId, PlanItem, PlanStore, PlanTx, StoreError};
use std::sync::atomic::{AtomicUsize, Ordering};
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

/// Connects to `TEST_DATABASE_URL`, migrates and wipes every table.
///
/// Returns `None` when the variable is unset so database tests can skip
/// locally. CI sets `REQUIRE_TEST_DATABASE=1`, which turns a skip into a
/// failure instead of a silent pass.
pub async fn setup_db() -> Option<PgPool> {
    let _ = dotenvy::dotenv();

    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        if std::env::var_os("REQUIRE_TEST_DATABASE").is_some() {
            panic!("REQUIRE_TEST_DATABASE is set but TEST_DATABASE_URL is missing");
        }
        eprintln!(
            "warning: TEST_DATABASE_URL missing, database test SKIPPED (not run). \
             Set REQUIRE_TEST_DATABASE=1 to fail instead."
        );
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .expect("failed to connect to TEST_DATABASE_URL");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations failed");

    sqlx::query(
        r#"
        TRUNCATE TABLE
            job_attempts,
            jobs,
            plan_items,
            plans,
            items
        RESTART IDENTITY CASCADE
        "#,
    )
    .execute(&pool)
    .await
    .expect("truncate failed");

    Some(pool)
}

pub async fn insert_job(pool: &PgPool, job_type: &str, payload: serde_json::Value, max_attempts: i32) -> Uuid {
    let jobs = planflow::jobs::JobsRepo::new(pool.clone());
    jobs.enqueue(NewJob {
        queue: "default".into(),
        job_type: job_type.into(),
        payload_json: payload,
        run_at: chrono::Utc::now(),
        priority: 0,
        max_attempts,
    })
    .await
    .expect("failed to insert job")
}

/// Parent with three items and an empty target owned by someone else.
pub async fn seeded(store: &MemoryPlanStore) -> (PlanId, PlanId) {
    let parent = store.create_plan(1).await.unwrap();
    for (title, quantity) in [("squat", 5), ("bench press", 3), ("deadlift", 1)] {
        let item = store.create_item(title).await.unwrap();
        store.add_plan_item(parent.id, item.id, quantity).await.unwrap();
    }
    let target = store.create_plan(2).await.unwrap();
    (target.id, parent.id)
}

/// Pull `run_at` back to now so the next lease picks the job up.
pub async fn make_runnable(pool: &PgPool, job_id: Uuid) {
    sqlx::query("UPDATE jobs SET run_at = now() WHERE id = $1")
        .bind(job_id)
        .execute(pool)
        .await
        .expect("failed to reset run_at");
}

/// Wraps the memory store and makes transactional inserts fail once
/// `fail_after` of them went through in the same transaction.
pub struct FaultyStore {
    pub inner: MemoryPlanStore,
    pub fail_after: Option<usize>,
    pub begins: AtomicUsize,
}

impl FaultyStore {
    pub fn failing_after(inner: MemoryPlanStore, n: usize) -> Self {
        Self {
            inner,
            fail_after: Some(n),
            begins: AtomicUsize::new(0),
        }
    }
}

struct FaultyTx {
    inner: Box<dyn PlanTx>,
    fail_after: Option<usize>,
    inserted: usize,
}

#[async_trait]
impl PlanStore for FaultyStore {
    async fn create_plan(&self, owner_id: i64) -> Result<Plan, StoreError> {
        self.inner.create_plan(owner_id).await
    }

    async fn get_plan(&self, id: PlanId) -> Result<Option<Plan>, StoreError> {
        self.inner.get_plan(id).await
    }

    async fn delete_plan(&self, id: PlanId) -> Result<bool, StoreError> {
        self.inner.delete_plan(id).await
    }

    async fn create_item(&self, title: &str) -> Result<Item, StoreError> {
        self.inner.create_item(title).await
    }

    async fn add_plan_item(
        &self,
        plan_id: PlanId,
        item_id: ItemId,
        quantity: i32,
    ) -> Result<PlanItem, StoreError> {
        self.inner.add_plan_item(plan_id, item_id, quantity).await
    }

    async fn list_plan_items(&self, plan_id: PlanId) -> Result<Vec<PlanItem>, StoreError> {
        self.inner.list_plan_items(plan_id).await
    }

    async fn begin(&self) -> Result<Box<dyn PlanTx>, StoreError> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FaultyTx {
            inner: self.inner.begin().await?,
            fail_after: self.fail_after,
            inserted: 0,
        }))
    }
}

#[async_trait]
impl PlanTx for FaultyTx {
    async fn lock_plan(&mut self, id: PlanId) -> Result<Option<Plan>, StoreError> {
        self.inner.lock_plan(id).await
    }

    async fn list_plan_items(&mut self, plan_id: PlanId) -> Result<Vec<PlanItem>, StoreError> {
        self.inner.list_plan_items(plan_id).await
    }

    async fn insert_plan_item(
        &mut self,
        plan_id: PlanId,
        item_id: ItemId,
        quantity: i32,
    ) -> Result<PlanItem, StoreError> {
        if self.fail_after == Some(self.inserted) {
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        self.inserted += 1;
        self.inner.insert_plan_item(plan_id, item_id, quantity).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.commit().await
    }
}
