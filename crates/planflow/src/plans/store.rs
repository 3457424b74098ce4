use crate::plans::model::{Item, ItemId, Plan, PlanId, PlanItem};
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("plan {0} not found")]
    PlanNotFound(PlanId),
    #[error("item {0} not found")]
    ItemNotFound(ItemId),
    #[error("quantity must be positive, got {0}")]
    InvalidQuantity(i32),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Plan persistence. Implementations must give `begin` real transaction
/// semantics: writes made through a [`PlanTx`] become visible only on
/// `commit`, and a dropped transaction leaves no trace.
#[async_trait]
pub trait PlanStore: Send + Sync {
    async fn create_plan(&self, owner_id: i64) -> Result<Plan, StoreError>;

    async fn get_plan(&self, id: PlanId) -> Result<Option<Plan>, StoreError>;

    /// Remove a plan and its links. Returns false when there was no such plan.
    async fn delete_plan(&self, id: PlanId) -> Result<bool, StoreError>;

    async fn create_item(&self, title: &str) -> Result<Item, StoreError>;

    async fn add_plan_item(
        &self,
        plan_id: PlanId,
        item_id: ItemId,
        quantity: i32,
    ) -> Result<PlanItem, StoreError>;

    async fn list_plan_items(&self, plan_id: PlanId) -> Result<Vec<PlanItem>, StoreError>;

    async fn begin(&self) -> Result<Box<dyn PlanTx>, StoreError>;
}

#[async_trait]
pub trait PlanTx: Send {
    /// Resolve a plan and hold it exclusively until the transaction ends.
    async fn lock_plan(&mut self, id: PlanId) -> Result<Option<Plan>, StoreError>;

    async fn list_plan_items(&mut self, plan_id: PlanId) -> Result<Vec<PlanItem>, StoreError>;

    async fn insert_plan_item(
        &mut self,
        plan_id: PlanId,
        item_id: ItemId,
        quantity: i32,
    ) -> Result<PlanItem, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
