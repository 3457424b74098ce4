pub mod duplicate;
pub mod memory;
pub mod model;
pub mod pg;
pub mod store;

pub use duplicate::PlanDuplication;
pub use memory::MemoryPlanStore;
pub use model::{Item, ItemId, Plan, PlanId, PlanItem, PlanItemId, PlanWithItems};
pub use pg::PgPlanStore;
pub use store::{PlanStore, PlanTx, StoreError};
