//! Copy a parent plan's items into a freshly created target plan.
//!
//! The copy runs out of band, after the API call that created the target has
//! already returned. One attempt is [`PlanDuplication::run`]; the scheduler
//! decides what to do with the [`JobOutcome`] it returns.

use crate::jobs::error_codes::ErrorCode;
use crate::jobs::outcome::{FailureReason, JobOutcome};
use crate::jobs::retry::RetryPolicy;
use crate::plans::model::PlanId;
use crate::plans::store::{PlanStore, StoreError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

pub const JOB_TYPE: &str = "plan.duplicate";

/// Delay between the duplicate request and the first attempt.
pub const SUBMIT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDuplication {
    pub target_plan_id: PlanId,
    pub parent_plan_id: PlanId,
}

enum CopyError {
    NotFound(PlanId),
    Store(StoreError),
}

impl From<StoreError> for CopyError {
    fn from(e: StoreError) -> Self {
        CopyError::Store(e)
    }
}

impl PlanDuplication {
    pub fn new(target_plan_id: PlanId, parent_plan_id: PlanId) -> Self {
        Self {
            target_plan_id,
            parent_plan_id,
        }
    }

    pub fn from_payload(payload: &serde_json::Value) -> Result<Self, FailureReason> {
        serde_json::from_value(payload.clone()).map_err(|e| FailureReason::BadPayload(e.to_string()))
    }

    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "target_plan_id": self.target_plan_id,
            "parent_plan_id": self.parent_plan_id,
        })
    }

    /// One attempt. `retries` is how many retries already happened before it.
    pub async fn run(&self, store: &dyn PlanStore, retries: u32, policy: &RetryPolicy) -> JobOutcome {
        match self.copy(store).await {
            Ok(copied) => {
                info!(
                    target_plan_id = %self.target_plan_id,
                    parent_plan_id = %self.parent_plan_id,
                    copied,
                    retries,
                    "plan duplicated"
                );
                JobOutcome::Success(copied)
            }
            Err(CopyError::NotFound(id)) => {
                error!(
                    target_plan_id = %self.target_plan_id,
                    parent_plan_id = %self.parent_plan_id,
                    missing_plan_id = %id,
                    "plan duplication cannot run: plan missing"
                );
                JobOutcome::PermanentFailure(FailureReason::NotFound(id))
            }
            Err(CopyError::Store(e)) => match policy.next_retry(retries) {
                Some(delay) => {
                    warn!(
                        target_plan_id = %self.target_plan_id,
                        parent_plan_id = %self.parent_plan_id,
                        retries,
                        delay_secs = delay.as_secs(),
                        error = %e,
                        "plan duplication failed, retry requested"
                    );
                    JobOutcome::RetryRequested {
                        delay,
                        code: ErrorCode::StoreError,
                        error: e.to_string(),
                    }
                }
                None => {
                    error!(
                        target_plan_id = %self.target_plan_id,
                        parent_plan_id = %self.parent_plan_id,
                        retries,
                        error = %e,
                        "plan duplication failed, retries exhausted"
                    );
                    JobOutcome::PermanentFailure(FailureReason::RetriesExhausted {
                        retries,
                        last_error: e.to_string(),
                    })
                }
            },
        }
    }

    async fn copy(&self, store: &dyn PlanStore) -> Result<u64, CopyError> {
        let target = store
            .get_plan(self.target_plan_id)
            .await?
            .ok_or(CopyError::NotFound(self.target_plan_id))?;
        let parent = store
            .get_plan(self.parent_plan_id)
            .await?
            .ok_or(CopyError::NotFound(self.parent_plan_id))?;

        let mut tx = store.begin().await?;

        // Serializes concurrent deliveries for the same target.
        if tx.lock_plan(target.id).await?.is_none() {
            return Err(CopyError::NotFound(target.id));
        }
        if !tx.list_plan_items(target.id).await?.is_empty() {
            warn!(
                target_plan_id = %target.id,
                parent_plan_id = %parent.id,
                "target plan already has items, skipping copy"
            );
            return Ok(0);
        }

        let links = tx.list_plan_items(parent.id).await?;
        let mut copied = 0_u64;
        for link in links {
            tx.insert_plan_item(target.id, link.item_id, link.quantity)
                .await?;
            copied += 1;
        }

        tx.commit().await?;
        Ok(copied)
    }
}
