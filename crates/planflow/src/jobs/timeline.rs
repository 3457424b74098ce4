use crate::jobs::attempts::AttemptOutcome;
use crate::jobs::error_codes::{self, ErrorCode};
use crate::jobs::model::JobStatus;
use crate::jobs::{AttemptsRepo, JobsRepo};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct JobTimeline {
    pub job_id: Uuid,
    pub status: String,
    pub queue: String,
    pub job_type: String,
    pub payload_json: serde_json::Value,
    pub run_at: DateTime<Utc>,
    pub max_attempts: i32,

    pub next_run_at: Option<DateTime<Utc>>,
    pub last_worker_id: Option<String>,
    pub last_error: Option<LastError>,
    pub dlq_reason_code: Option<String>,
    pub replay_of_job_id: Option<Uuid>,

    pub attempts: Vec<TimelineAttempt>,
}

#[derive(Debug, Serialize)]
pub struct TimelineAttempt {
    pub id: Uuid,
    pub attempt_no: i32,
    pub retries: u32,
    pub outcome: AttemptOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub copied: Option<u64>,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    pub latency_ms: Option<i32>,
    pub worker_id: String,
    pub suggested_action: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LastError {
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JobExplanation {
    pub job_id: Uuid,
    pub status: String,
    pub summary: String,
    pub attempts: usize,
    pub failed_attempts: usize,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<LastError>,
    pub dlq_reason_code: Option<String>,
    pub suggested_action: Option<String>,
}

pub async fn build_timeline(
    jobs: &JobsRepo,
    attempts: &AttemptsRepo,
    job_id: Uuid,
) -> anyhow::Result<Option<JobTimeline>> {
    let Some(job) = jobs.get_job(job_id).await? else {
        return Ok(None);
    };

    let raw_attempts = attempts.list_attempts_for_job(job_id).await?;

    let last_worker_id = raw_attempts.last().map(|a| a.worker_id.clone());
    let last_error = raw_attempts
        .iter()
        .rev()
        .find(|a| a.outcome.is_failure())
        .map(|a| LastError {
            error_code: a.error_code,
            error_message: a.error_message.clone(),
        });

    let next_run_at = (job.status == JobStatus::Queued.as_str()).then_some(job.run_at);

    let attempts_out = raw_attempts
        .into_iter()
        .map(|a| TimelineAttempt {
            suggested_action: a
                .error_code
                .map(|code| error_codes::suggested_action(code).to_string()),
            id: a.id,
            attempt_no: a.attempt_no,
            retries: a.retries,
            outcome: a.outcome,
            started_at: a.started_at,
            finished_at: a.finished_at,
            copied: a.copied,
            error_code: a.error_code,
            error_message: a.error_message,
            latency_ms: a.latency_ms,
            worker_id: a.worker_id,
        })
        .collect();

    Ok(Some(JobTimeline {
        job_id: job.id,
        status: job.status,
        queue: job.queue,
        job_type: job.job_type,
        payload_json: job.payload_json,
        run_at: job.run_at,
        max_attempts: job.max_attempts,
        next_run_at,
        last_worker_id,
        last_error,
        dlq_reason_code: job.dlq_reason_code,
        replay_of_job_id: job.replay_of_job_id,
        attempts: attempts_out,
    }))
}

/// Human-readable summary of where a job stands.
pub fn explain(tl: &JobTimeline) -> JobExplanation {
    let attempts = tl.attempts.len();
    let failed_attempts = tl
        .attempts
        .iter()
        .filter(|a| a.outcome.is_failure())
        .count();

    let summary = match tl.status.as_str() {
        "succeeded" => format!("Succeeded after {} attempt(s).", attempts.max(1)),
        "running" => "Currently running.".to_string(),
        "dlq" => format!(
            "Moved to DLQ after {} attempt(s). Reason: {}.",
            attempts,
            tl.dlq_reason_code.as_deref().unwrap_or("UNKNOWN")
        ),
        "queued" if tl.last_error.is_some() => format!(
            "Retry {} of {} scheduled. Next run at {}.",
            attempts,
            (tl.max_attempts - 1).max(0),
            tl.next_run_at
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string())
        ),
        "queued" => "Queued and waiting to run.".to_string(),
        other => format!("Status: {other}."),
    };

    let suggested_action = tl
        .last_error
        .as_ref()
        .and_then(|e| e.error_code)
        .map(|code| error_codes::suggested_action(code).to_string());

    JobExplanation {
        job_id: tl.job_id,
        status: tl.status.clone(),
        summary,
        attempts,
        failed_attempts,
        next_run_at: tl.next_run_at,
        last_error: tl.last_error.clone(),
        dlq_reason_code: tl.dlq_reason_code.clone(),
        suggested_action,
    }
}
