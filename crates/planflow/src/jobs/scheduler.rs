use crate::jobs::repo::JobsRepo;
use crate::jobs::retry::RetryPolicy;
use crate::plans::duplicate::{PlanDuplication, JOB_TYPE};
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use uuid::Uuid;

/// A submitted duplication job plus the retry counter the scheduler keeps for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTicket {
    pub job_id: Uuid,
    pub job: PlanDuplication,
    pub retries: u32,
}

/// Runs jobs out of band, after a delay.
///
/// The job code only talks to this trait, so the backing queue can be the
/// Postgres `jobs` table or an in-process timer.
#[async_trait]
pub trait JobScheduler: Send + Sync {
    async fn submit(&self, job: PlanDuplication, delay: Duration) -> anyhow::Result<JobTicket>;

    /// Run `ticket` again from scratch after `delay`. `reason` is the error
    /// that made the previous attempt fail.
    async fn retry(&self, ticket: &JobTicket, delay: Duration, reason: &str) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct PgJobScheduler {
    jobs: JobsRepo,
    queue: String,
    max_attempts: i32,
}

impl PgJobScheduler {
    pub fn new(jobs: JobsRepo, queue: impl Into<String>, policy: &RetryPolicy) -> Self {
        Self {
            jobs,
            queue: queue.into(),
            max_attempts: policy.max_attempts(),
        }
    }

    /// Move a leased row back to `queued`, runnable after `delay`.
    ///
    /// With `owner` set, returns false and leaves the row alone unless
    /// `owner` still holds its lease.
    pub async fn reschedule(
        &self,
        job_id: Uuid,
        owner: Option<&str>,
        delay: Duration,
        code: Option<&str>,
        reason: &str,
    ) -> anyhow::Result<bool> {
        let next_run_at = Utc::now() + chrono::Duration::from_std(delay)?;
        self.jobs
            .reschedule_for_retry(job_id, owner, next_run_at, code, Some(reason))
            .await
    }
}

#[async_trait]
impl JobScheduler for PgJobScheduler {
    async fn submit(&self, job: PlanDuplication, delay: Duration) -> anyhow::Result<JobTicket> {
        let job_id = self
            .jobs
            .enqueue_in(&self.queue, JOB_TYPE, job.to_payload(), delay, self.max_attempts)
            .await?;

        tracing::info!(
            %job_id,
            queue = %self.queue,
            target_plan_id = %job.target_plan_id,
            parent_plan_id = %job.parent_plan_id,
            delay_secs = delay.as_secs(),
            "plan duplication submitted"
        );

        Ok(JobTicket {
            job_id,
            job,
            retries: 0,
        })
    }

    async fn retry(&self, ticket: &JobTicket, delay: Duration, reason: &str) -> anyhow::Result<()> {
        self.reschedule(ticket.job_id, None, delay, None, reason)
            .await?;
        Ok(())
    }
}
