use crate::plans::model::{Item, ItemId, Plan, PlanId, PlanItem, PlanItemId};
use crate::plans::store::{PlanStore, PlanTx, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
struct State {
    plans: BTreeMap<PlanId, Plan>,
    items: BTreeMap<ItemId, Item>,
    plan_items: Vec<PlanItem>,
    next_plan_id: i64,
    next_item_id: i64,
    next_plan_item_id: i64,
}

impl State {
    fn check_link(&self, plan_id: PlanId, item_id: ItemId, quantity: i32) -> Result<(), StoreError> {
        if quantity <= 0 {
            return Err(StoreError::InvalidQuantity(quantity));
        }
        if !self.plans.contains_key(&plan_id) {
            return Err(StoreError::PlanNotFound(plan_id));
        }
        if !self.items.contains_key(&item_id) {
            return Err(StoreError::ItemNotFound(item_id));
        }
        Ok(())
    }

    fn new_link(&mut self, plan_id: PlanId, item_id: ItemId, quantity: i32) -> PlanItem {
        self.next_plan_item_id += 1;
        PlanItem {
            id: PlanItemId(self.next_plan_item_id),
            plan_id,
            item_id,
            quantity,
        }
    }

    fn items_of(&self, plan_id: PlanId) -> impl Iterator<Item = &PlanItem> {
        self.plan_items.iter().filter(move |pi| pi.plan_id == plan_id)
    }
}

/// In-process plan store.
///
/// A transaction takes the whole store exclusively until it commits or is
/// dropped, so transactions are serializable. Inserted links are staged and
/// only published on commit.
#[derive(Clone, Default)]
pub struct MemoryPlanStore {
    state: Arc<Mutex<State>>,
}

impl MemoryPlanStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanStore for MemoryPlanStore {
    async fn create_plan(&self, owner_id: i64) -> Result<Plan, StoreError> {
        let mut st = self.state.lock().await;
        st.next_plan_id += 1;
        let plan = Plan {
            id: PlanId(st.next_plan_id),
            owner_id,
            created_at: Utc::now(),
        };
        st.plans.insert(plan.id, plan.clone());
        Ok(plan)
    }

    async fn get_plan(&self, id: PlanId) -> Result<Option<Plan>, StoreError> {
        Ok(self.state.lock().await.plans.get(&id).cloned())
    }

    async fn delete_plan(&self, id: PlanId) -> Result<bool, StoreError> {
        let mut st = self.state.lock().await;
        if st.plans.remove(&id).is_none() {
            return Ok(false);
        }
        st.plan_items.retain(|pi| pi.plan_id != id);
        Ok(true)
    }

    async fn create_item(&self, title: &str) -> Result<Item, StoreError> {
        let title = title.trim();
        let mut st = self.state.lock().await;
        let lowered = title.to_lowercase();
        if st.items.values().any(|i| i.title.to_lowercase() == lowered) {
            return Err(StoreError::Conflict(format!(
                "item titled {title:?} already exists"
            )));
        }
        st.next_item_id += 1;
        let item = Item {
            id: ItemId(st.next_item_id),
            title: title.to_string(),
        };
        st.items.insert(item.id, item.clone());
        Ok(item)
    }

    async fn add_plan_item(
        &self,
        plan_id: PlanId,
        item_id: ItemId,
        quantity: i32,
    ) -> Result<PlanItem, StoreError> {
        let mut st = self.state.lock().await;
        st.check_link(plan_id, item_id, quantity)?;
        let link = st.new_link(plan_id, item_id, quantity);
        st.plan_items.push(link.clone());
        Ok(link)
    }

    async fn list_plan_items(&self, plan_id: PlanId) -> Result<Vec<PlanItem>, StoreError> {
        let st = self.state.lock().await;
        Ok(st.items_of(plan_id).cloned().collect())
    }

    async fn begin(&self) -> Result<Box<dyn PlanTx>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        Ok(Box::new(MemoryPlanTx {
            state: guard,
            staged: Vec::new(),
        }))
    }
}

pub struct MemoryPlanTx {
    state: OwnedMutexGuard<State>,
    staged: Vec<PlanItem>,
}

#[async_trait]
impl PlanTx for MemoryPlanTx {
    async fn lock_plan(&mut self, id: PlanId) -> Result<Option<Plan>, StoreError> {
        Ok(self.state.plans.get(&id).cloned())
    }

    async fn list_plan_items(&mut self, plan_id: PlanId) -> Result<Vec<PlanItem>, StoreError> {
        let staged = self.staged.iter().filter(|pi| pi.plan_id == plan_id);
        Ok(self.state.items_of(plan_id).chain(staged).cloned().collect())
    }

    async fn insert_plan_item(
        &mut self,
        plan_id: PlanId,
        item_id: ItemId,
        quantity: i32,
    ) -> Result<PlanItem, StoreError> {
        self.state.check_link(plan_id, item_id, quantity)?;
        let link = self.state.new_link(plan_id, item_id, quantity);
        self.staged.push(link.clone());
        Ok(link)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryPlanTx { mut state, staged } = *self;
        state.plan_items.extend(staged);
        Ok(())
    }
}
