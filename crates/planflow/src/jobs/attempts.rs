//! One `job_attempts` row per execution of a job.
//!
//! The row records the retry counter the attempt ran with and how it ended,
//! so a timeline can be read back without re-deriving either from the job.

use crate::jobs::error_codes::ErrorCode;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

const ATTEMPT_COLUMNS: &str = "id, job_id, attempt_no, retries, started_at, finished_at, \
     outcome, copied, error_code, error_message, latency_ms, worker_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Running,
    Succeeded,
    /// Failed, and the job went back to the queue.
    RetryScheduled,
    /// Failed, and the job went to the DLQ.
    DeadLettered,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Running => "running",
            AttemptOutcome::Succeeded => "succeeded",
            AttemptOutcome::RetryScheduled => "retry_scheduled",
            AttemptOutcome::DeadLettered => "dead_lettered",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(AttemptOutcome::Running),
            "succeeded" => Some(AttemptOutcome::Succeeded),
            "retry_scheduled" => Some(AttemptOutcome::RetryScheduled),
            "dead_lettered" => Some(AttemptOutcome::DeadLettered),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            AttemptOutcome::RetryScheduled | AttemptOutcome::DeadLettered
        )
    }
}

#[derive(sqlx::FromRow)]
struct AttemptRow {
    id: Uuid,
    job_id: Uuid,
    attempt_no: i32,
    retries: i32,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    outcome: String,
    copied: Option<i64>,
    error_code: Option<String>,
    error_message: Option<String>,
    latency_ms: Option<i32>,
    worker_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobAttempt {
    pub id: Uuid,
    pub job_id: Uuid,
    pub attempt_no: i32,
    /// Retries that happened before this attempt.
    pub retries: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: AttemptOutcome,
    /// Links copied, for a successful attempt.
    pub copied: Option<u64>,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    pub latency_ms: Option<i32>,
    pub worker_id: String,
}

impl TryFrom<AttemptRow> for JobAttempt {
    type Error = anyhow::Error;

    fn try_from(row: AttemptRow) -> anyhow::Result<Self> {
        let outcome = AttemptOutcome::parse(&row.outcome).ok_or_else(|| {
            anyhow::anyhow!("attempt {} has unknown outcome {:?}", row.id, row.outcome)
        })?;

        Ok(JobAttempt {
            id: row.id,
            job_id: row.job_id,
            attempt_no: row.attempt_no,
            retries: u32::try_from(row.retries)?,
            started_at: row.started_at,
            finished_at: row.finished_at,
            outcome,
            copied: row.copied.map(u64::try_from).transpose()?,
            error_code: row.error_code.as_deref().map(ErrorCode::parse),
            error_message: row.error_message,
            latency_ms: row.latency_ms,
            worker_id: row.worker_id,
        })
    }
}

#[derive(Clone)]
pub struct AttemptsRepo {
    pool: PgPool,
}

impl AttemptsRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open the next attempt for `job_id`; `retries` is one less than its number.
    pub async fn start_attempt(&self, job_id: Uuid, worker_id: &str) -> anyhow::Result<JobAttempt> {
        let row = sqlx::query_as::<_, AttemptRow>(&format!(
            r#"
            WITH next AS (
              SELECT COALESCE(MAX(attempt_no), 0) + 1 AS n
              FROM job_attempts
              WHERE job_id = $1
            )
            INSERT INTO job_attempts (job_id, attempt_no, retries, outcome, worker_id)
            SELECT $1, n, n - 1, $2, $3
            FROM next
            RETURNING {ATTEMPT_COLUMNS}
            "#
        ))
        .bind(job_id)
        .bind(AttemptOutcome::Running.as_str())
        .bind(worker_id)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    pub async fn finish_succeeded(
        &self,
        attempt_id: Uuid,
        latency_ms: i32,
        copied: u64,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE job_attempts
            SET outcome = $2,
                finished_at = now(),
                latency_ms = $3,
                copied = $4
            WHERE id = $1
            "#,
        )
        .bind(attempt_id)
        .bind(AttemptOutcome::Succeeded.as_str())
        .bind(latency_ms)
        .bind(i64::try_from(copied).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// `outcome` says where the job went next: back to the queue or to the DLQ.
    pub async fn finish_failed(
        &self,
        attempt_id: Uuid,
        latency_ms: i32,
        outcome: AttemptOutcome,
        code: ErrorCode,
        message: &str,
    ) -> anyhow::Result<()> {
        anyhow::ensure!(
            outcome.is_failure(),
            "finish_failed called with outcome {}",
            outcome.as_str()
        );

        sqlx::query(
            r#"
            UPDATE job_attempts
            SET outcome = $2,
                finished_at = now(),
                latency_ms = $3,
                error_code = $4,
                error_message = $5
            WHERE id = $1
            "#,
        )
        .bind(attempt_id)
        .bind(outcome.as_str())
        .bind(latency_ms)
        .bind(code.as_str())
        .bind(message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list_attempts_for_job(&self, job_id: Uuid) -> anyhow::Result<Vec<JobAttempt>> {
        let rows = sqlx::query_as::<_, AttemptRow>(&format!(
            "SELECT {ATTEMPT_COLUMNS} FROM job_attempts WHERE job_id = $1 ORDER BY attempt_no ASC"
        ))
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(JobAttempt::try_from).collect()
    }
}
