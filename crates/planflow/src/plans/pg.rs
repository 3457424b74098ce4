use crate::plans::model::{Item, ItemId, Plan, PlanId, PlanItem};
use crate::plans::store::{PlanStore, PlanTx, StoreError};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

const FOREIGN_KEY_VIOLATION: &str = "23503";
const UNIQUE_VIOLATION: &str = "23505";
const CHECK_VIOLATION: &str = "23514";

#[derive(Clone)]
pub struct PgPlanStore {
    pool: PgPool,
}

impl PgPlanStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn db_code(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
        _ => None,
    }
}

fn map_insert_item_err(err: sqlx::Error, plan_id: PlanId, item_id: ItemId, quantity: i32) -> StoreError {
    match db_code(&err).as_deref() {
        Some(CHECK_VIOLATION) => StoreError::InvalidQuantity(quantity),
        Some(FOREIGN_KEY_VIOLATION) => {
            let constraint = match &err {
                sqlx::Error::Database(db) => db.constraint().unwrap_or_default().to_string(),
                _ => String::new(),
            };
            if constraint.contains("plan_id") {
                StoreError::PlanNotFound(plan_id)
            } else {
                StoreError::ItemNotFound(item_id)
            }
        }
        _ => StoreError::Database(err),
    }
}

#[async_trait]
impl PlanStore for PgPlanStore {
    async fn create_plan(&self, owner_id: i64) -> Result<Plan, StoreError> {
        let plan = sqlx::query_as::<_, Plan>(
            r#"
            INSERT INTO plans (owner_id)
            VALUES ($1)
            RETURNING id, owner_id, created_at
            "#,
        )
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(plan)
    }

    async fn get_plan(&self, id: PlanId) -> Result<Option<Plan>, StoreError> {
        let plan = sqlx::query_as::<_, Plan>(
            "SELECT id, owner_id, created_at FROM plans WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(plan)
    }

    async fn delete_plan(&self, id: PlanId) -> Result<bool, StoreError> {
        // plan_items go with it (ON DELETE CASCADE)
        let res = sqlx::query("DELETE FROM plans WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(res.rows_affected() == 1)
    }

    async fn create_item(&self, title: &str) -> Result<Item, StoreError> {
        sqlx::query_as::<_, Item>(
            r#"
            INSERT INTO items (title)
            VALUES ($1)
            RETURNING id, title
            "#,
        )
        .bind(title.trim())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match db_code(&e).as_deref() {
            Some(UNIQUE_VIOLATION) => {
                StoreError::Conflict(format!("item titled {:?} already exists", title.trim()))
            }
            _ => StoreError::Database(e),
        })
    }

    async fn add_plan_item(
        &self,
        plan_id: PlanId,
        item_id: ItemId,
        quantity: i32,
    ) -> Result<PlanItem, StoreError> {
        if quantity <= 0 {
            return Err(StoreError::InvalidQuantity(quantity));
        }

        insert_plan_item(&self.pool, plan_id, item_id, quantity).await
    }

    async fn list_plan_items(&self, plan_id: PlanId) -> Result<Vec<PlanItem>, StoreError> {
        let rows = sqlx::query_as::<_, PlanItem>(
            r#"
            SELECT id, plan_id, item_id, quantity
            FROM plan_items
            WHERE plan_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(plan_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn begin(&self) -> Result<Box<dyn PlanTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgPlanTx { tx }))
    }
}

async fn insert_plan_item<'e, E>(
    executor: E,
    plan_id: PlanId,
    item_id: ItemId,
    quantity: i32,
) -> Result<PlanItem, StoreError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, PlanItem>(
        r#"
        INSERT INTO plan_items (plan_id, item_id, quantity)
        VALUES ($1, $2, $3)
        RETURNING id, plan_id, item_id, quantity
        "#,
    )
    .bind(plan_id)
    .bind(item_id)
    .bind(quantity)
    .fetch_one(executor)
    .await
    .map_err(|e| map_insert_item_err(e, plan_id, item_id, quantity))
}

/// Rolls back on drop.
pub struct PgPlanTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl PlanTx for PgPlanTx {
    async fn lock_plan(&mut self, id: PlanId) -> Result<Option<Plan>, StoreError> {
        let plan = sqlx::query_as::<_, Plan>(
            r#"
            SELECT id, owner_id, created_at
            FROM plans
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(plan)
    }

    async fn list_plan_items(&mut self, plan_id: PlanId) -> Result<Vec<PlanItem>, StoreError> {
        let rows = sqlx::query_as::<_, PlanItem>(
            r#"
            SELECT id, plan_id, item_id, quantity
            FROM plan_items
            WHERE plan_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(plan_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows)
    }

    async fn insert_plan_item(
        &mut self,
        plan_id: PlanId,
        item_id: ItemId,
        quantity: i32,
    ) -> Result<PlanItem, StoreError> {
        insert_plan_item(&mut *self.tx, plan_id, item_id, quantity).await
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}
