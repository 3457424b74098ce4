// crates/planflow/src/jobs/repo.rs

use crate::api::models::JobListItem;
use crate::jobs::model::{DlqReason, Job, JobStatus, NewJob};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

const JOB_COLUMNS: &str = r#"
    id, queue, job_type, payload_json, run_at, status, priority, max_attempts,
    locked_at, locked_by, lock_expires_at,
    last_error_code, last_error_message,
    dlq_reason_code, dlq_at,
    replay_of_job_id,
    created_at, updated_at
"#;

#[derive(Clone)]
pub struct JobsRepo {
    pool: PgPool,
}

impl JobsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // ----------------------------
    // Enqueue
    // ----------------------------

    pub async fn enqueue(&self, job: NewJob) -> anyhow::Result<Uuid> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO jobs (queue, job_type, payload_json, run_at, status, priority, max_attempts)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(&job.queue)
        .bind(&job.job_type)
        .bind(&job.payload_json)
        .bind(job.run_at)
        .bind(JobStatus::Queued.as_str())
        .bind(job.priority)
        .bind(job.max_attempts)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    pub async fn enqueue_in(
        &self,
        queue: &str,
        job_type: &str,
        payload_json: serde_json::Value,
        delay: std::time::Duration,
        max_attempts: i32,
    ) -> anyhow::Result<Uuid> {
        self.enqueue(NewJob {
            queue: queue.to_string(),
            job_type: job_type.to_string(),
            payload_json,
            run_at: Utc::now() + chrono::Duration::from_std(delay)?,
            priority: 0,
            max_attempts,
        })
        .await
    }

    // ----------------------------
    // Reads
    // ----------------------------

    pub async fn get_job(&self, job_id: Uuid) -> anyhow::Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    /// Cursor-paginated list of jobs, newest first.
    /// Cursor is (created_at, id); queue/status are optional filters and
    /// limit is clamped to [1, 500].
    pub async fn list_jobs(
        &self,
        queue: Option<&str>,
        status: Option<&str>,
        limit: i64,
        cursor_created_at: Option<DateTime<Utc>>,
        cursor_id: Option<Uuid>,
    ) -> anyhow::Result<Vec<JobListItem>> {
        let limit = limit.clamp(1, 500);

        // a cursor only counts when both halves are present
        let (cursor_created_at, cursor_id) = match (cursor_created_at, cursor_id) {
            (Some(ca), Some(cid)) => (Some(ca), Some(cid)),
            _ => (None, None),
        };

        let rows = sqlx::query_as::<_, JobListItem>(
            r#"
            SELECT
                id, queue, job_type, status,
                run_at, priority, max_attempts,
                last_error_code, last_error_message,
                dlq_reason_code,
                created_at, updated_at
            FROM jobs
            WHERE ($1::text IS NULL OR queue = $1)
              AND ($2::text IS NULL OR status = $2)
              AND ($3::timestamptz IS NULL OR (created_at, id) < ($3, $4::uuid))
            ORDER BY created_at DESC, id DESC
            LIMIT $5
            "#,
        )
        .bind(queue)
        .bind(status)
        .bind(cursor_created_at)
        .bind(cursor_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Returns (status, count) for every status that has jobs.
    pub async fn status_counts(&self) -> anyhow::Result<Vec<(String, i64)>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT status, COUNT(*)
            FROM jobs
            GROUP BY status
            ORDER BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    // ----------------------------
    // Leasing
    // ----------------------------

    /// Lease exactly one runnable job for this worker.
    /// SELECT ... FOR UPDATE SKIP LOCKED keeps two workers from claiming the same row.
    pub async fn lease_one_job(
        &self,
        queue: &str,
        worker_id: &str,
        lease_seconds: i64,
    ) -> anyhow::Result<Option<Job>> {
        let mut tx = self.pool.begin().await?;

        let job = sqlx::query_as::<_, Job>(&format!(
            r#"
            WITH candidate AS (
              SELECT id
              FROM jobs
              WHERE queue = $1
                AND status = 'queued'
                AND run_at <= now()
              ORDER BY priority DESC, run_at ASC, created_at ASC
              FOR UPDATE SKIP LOCKED
              LIMIT 1
            )
            UPDATE jobs j
            SET status = 'running',
                locked_by = $2,
                locked_at = now(),
                lock_expires_at = now() + ($3::int * interval '1 second'),
                updated_at = now()
            FROM candidate
            WHERE j.id = candidate.id
            RETURNING {}
            "#,
            prefixed_columns("j")
        ))
        .bind(queue)
        .bind(worker_id)
        .bind(lease_seconds as i32)
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(job)
    }

    /// Put jobs whose lease ran out (worker died mid-attempt) back in the queue.
    pub async fn reap_expired_locks(&self) -> anyhow::Result<u64> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'queued',
                locked_at = NULL,
                locked_by = NULL,
                lock_expires_at = NULL,
                updated_at = now()
            WHERE status = 'running'
              AND lock_expires_at IS NOT NULL
              AND lock_expires_at < now()
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected())
    }

    // ----------------------------
    // State transitions
    // ----------------------------

    // Each transition only touches a row still leased by `worker_id` and
    // returns false when that lease is gone (reaped, or taken by another worker).

    pub async fn mark_succeeded(&self, job_id: Uuid, worker_id: &str) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'succeeded',
                locked_at = NULL,
                locked_by = NULL,
                lock_expires_at = NULL,
                updated_at = now()
            WHERE id = $1
              AND locked_by = $2
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    /// With `owner` set, a worker whose lease was reaped cannot requeue a row
    /// another worker now holds. `None` requeues unconditionally.
    pub async fn reschedule_for_retry(
        &self,
        job_id: Uuid,
        owner: Option<&str>,
        next_run_at: DateTime<Utc>,
        last_error_code: Option<&str>,
        last_error_message: Option<&str>,
    ) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'queued',
                run_at = $2,
                locked_at = NULL,
                locked_by = NULL,
                lock_expires_at = NULL,
                updated_at = now(),
                last_error_code = COALESCE($3, last_error_code),
                last_error_message = COALESCE($4, last_error_message)
            WHERE id = $1
              AND ($5::text IS NULL OR locked_by = $5)
            "#,
        )
        .bind(job_id)
        .bind(next_run_at)
        .bind(last_error_code)
        .bind(last_error_message)
        .bind(owner)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    pub async fn mark_dlq(
        &self,
        job_id: Uuid,
        worker_id: &str,
        reason: DlqReason,
        last_error_code: Option<&str>,
        last_error_message: Option<&str>,
    ) -> anyhow::Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'dlq',
                dlq_reason_code = $3,
                dlq_at = now(),
                locked_at = NULL,
                locked_by = NULL,
                lock_expires_at = NULL,
                updated_at = now(),
                last_error_code = $4,
                last_error_message = $5
            WHERE id = $1
              AND locked_by = $2
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(reason.as_str())
        .bind(last_error_code)
        .bind(last_error_message)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    // ----------------------------
    // Replay
    // ----------------------------

    /// Re-enqueue a copy of `job_id` (typically a DLQ entry) as a fresh job.
    pub async fn replay_job(
        &self,
        job_id: Uuid,
        override_queue: Option<&str>,
        override_run_at: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Option<Uuid>> {
        let Some(src) = self.get_job(job_id).await? else {
            return Ok(None);
        };

        let new_queue = override_queue.unwrap_or(src.queue.as_str());
        let new_run_at = override_run_at.unwrap_or_else(Utc::now);

        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO jobs (
                queue, job_type, payload_json, run_at, status, priority, max_attempts,
                replay_of_job_id
            )
            VALUES ($1, $2, $3, $4, 'queued', $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(new_queue)
        .bind(&src.job_type)
        .bind(&src.payload_json)
        .bind(new_run_at)
        .bind(src.priority)
        .bind(src.max_attempts)
        .bind(src.id)
        .fetch_one(&self.pool)
        .await?;

        Ok(Some(id))
    }
}

fn prefixed_columns(alias: &str) -> String {
    JOB_COLUMNS
        .split(',')
        .map(|c| format!("{alias}.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}
