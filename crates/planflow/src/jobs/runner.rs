use crate::jobs::{
    attempts::{AttemptOutcome, AttemptsRepo, JobAttempt},
    error_codes::ErrorCode,
    model::{DlqReason, Job},
    outcome::{FailureReason, JobOutcome},
    repo::JobsRepo,
    scheduler::PgJobScheduler,
};
use std::time::Duration;
use tracing::{error, info, warn};

/// What the queue does with a leased row after one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Succeed {
        copied: u64,
    },
    Reschedule {
        delay: Duration,
        code: ErrorCode,
        error: String,
    },
    DeadLetter {
        reason: DlqReason,
        code: ErrorCode,
        message: String,
    },
}

impl Disposition {
    /// How the attempt row is closed.
    pub fn attempt_outcome(&self) -> AttemptOutcome {
        match self {
            Disposition::Succeed { .. } => AttemptOutcome::Succeeded,
            Disposition::Reschedule { .. } => AttemptOutcome::RetryScheduled,
            Disposition::DeadLetter { .. } => AttemptOutcome::DeadLettered,
        }
    }
}

/// Decide the fate of attempt `attempt_no` of a row allowing `max_attempts`.
///
/// The row's `max_attempts` is the last word even if a handler asked for
/// another retry.
pub fn disposition(attempt_no: i32, max_attempts: i32, outcome: &JobOutcome) -> Disposition {
    match outcome {
        JobOutcome::Success(copied) => Disposition::Succeed { copied: *copied },
        JobOutcome::RetryRequested { code, error, .. } if attempt_no >= max_attempts => {
            Disposition::DeadLetter {
                reason: DlqReason::MaxAttemptsExceeded,
                code: *code,
                message: error.clone(),
            }
        }
        JobOutcome::RetryRequested { delay, code, error } => Disposition::Reschedule {
            delay: *delay,
            code: *code,
            error: error.clone(),
        },
        JobOutcome::PermanentFailure(reason) => Disposition::DeadLetter {
            reason: match reason {
                FailureReason::RetriesExhausted { .. } => DlqReason::MaxAttemptsExceeded,
                _ => DlqReason::NonRetryable,
            },
            code: reason.error_code(),
            message: reason.to_string(),
        },
    }
}

/// Applies the outcome of one attempt to the durable queue.
#[derive(Clone)]
pub struct JobRunner {
    jobs: JobsRepo,
    attempts: AttemptsRepo,
    scheduler: PgJobScheduler,
}

impl JobRunner {
    pub fn new(jobs: JobsRepo, attempts: AttemptsRepo, scheduler: PgJobScheduler) -> Self {
        Self {
            jobs,
            attempts,
            scheduler,
        }
    }

    pub async fn apply(
        &self,
        job: &Job,
        attempt: &JobAttempt,
        worker_id: &str,
        latency_ms: i32,
        outcome: &JobOutcome,
    ) -> anyhow::Result<()> {
        let next = disposition(attempt.attempt_no, job.max_attempts, outcome);
        let owned = match &next {
            Disposition::Succeed { copied } => {
                self.attempts
                    .finish_succeeded(attempt.id, latency_ms, *copied)
                    .await?;
                let owned = self.jobs.mark_succeeded(job.id, worker_id).await?;
                if owned {
                    info!(
                        job_id = %job.id,
                        attempt_no = attempt.attempt_no,
                        copied,
                        latency_ms,
                        "job succeeded"
                    );
                }
                owned
            }
            Disposition::Reschedule { delay, code, error } => {
                self.attempts
                    .finish_failed(attempt.id, latency_ms, next.attempt_outcome(), *code, error)
                    .await?;
                let owned = self
                    .scheduler
                    .reschedule(job.id, Some(worker_id), *delay, Some(code.as_str()), error)
                    .await?;
                if owned {
                    warn!(
                        job_id = %job.id,
                        attempt_no = attempt.attempt_no,
                        retries = attempt.retries,
                        delay_secs = delay.as_secs(),
                        code = code.as_str(),
                        "job failed, retry scheduled"
                    );
                }
                owned
            }
            Disposition::DeadLetter {
                reason,
                code,
                message,
            } => {
                self.attempts
                    .finish_failed(attempt.id, latency_ms, next.attempt_outcome(), *code, message)
                    .await?;
                self.dead_letter(job, worker_id, *reason, *code, message)
                    .await?
            }
        };

        if !owned {
            warn!(
                job_id = %job.id,
                attempt_no = attempt.attempt_no,
                %worker_id,
                "lease lost before the attempt finished, row left to its new owner"
            );
        }

        Ok(())
    }

    async fn dead_letter(
        &self,
        job: &Job,
        worker_id: &str,
        reason: DlqReason,
        code: ErrorCode,
        message: &str,
    ) -> anyhow::Result<bool> {
        let owned = self
            .jobs
            .mark_dlq(job.id, worker_id, reason, Some(code.as_str()), Some(message))
            .await?;
        if owned {
            error!(
                job_id = %job.id,
                job_type = %job.job_type,
                dlq_reason = reason.as_str(),
                code = code.as_str(),
                message,
                "job moved to DLQ"
            );
        }
        Ok(owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plans::PlanId;

    fn retry() -> JobOutcome {
        JobOutcome::RetryRequested {
            delay: Duration::from_secs(20),
            code: ErrorCode::StoreError,
            error: "connection reset".into(),
        }
    }

    #[test]
    fn success_carries_the_copy_count() {
        let next = disposition(1, 6, &JobOutcome::Success(4));
        assert_eq!(next, Disposition::Succeed { copied: 4 });
        assert_eq!(next.attempt_outcome(), AttemptOutcome::Succeeded);
    }

    #[test]
    fn retry_below_the_cap_is_rescheduled_with_its_delay() {
        let next = disposition(3, 6, &retry());
        assert_eq!(
            next,
            Disposition::Reschedule {
                delay: Duration::from_secs(20),
                code: ErrorCode::StoreError,
                error: "connection reset".into(),
            }
        );
        assert_eq!(next.attempt_outcome(), AttemptOutcome::RetryScheduled);
    }

    #[test]
    fn retry_at_the_cap_is_dead_lettered() {
        for attempt_no in [6, 7] {
            let next = disposition(attempt_no, 6, &retry());
            assert_eq!(
                next,
                Disposition::DeadLetter {
                    reason: DlqReason::MaxAttemptsExceeded,
                    code: ErrorCode::StoreError,
                    message: "connection reset".into(),
                }
            );
            assert_eq!(next.attempt_outcome(), AttemptOutcome::DeadLettered);
        }
    }

    #[test]
    fn permanent_failures_pick_their_dlq_reason() {
        let not_found = disposition(
            1,
            6,
            &JobOutcome::PermanentFailure(FailureReason::NotFound(PlanId(7))),
        );
        assert_eq!(
            not_found,
            Disposition::DeadLetter {
                reason: DlqReason::NonRetryable,
                code: ErrorCode::PlanNotFound,
                message: "plan 7 not found".into(),
            }
        );

        let exhausted = disposition(
            6,
            6,
            &JobOutcome::PermanentFailure(FailureReason::RetriesExhausted {
                retries: 5,
                last_error: "connection reset".into(),
            }),
        );
        assert!(matches!(
            exhausted,
            Disposition::DeadLetter {
                reason: DlqReason::MaxAttemptsExceeded,
                code: ErrorCode::RetriesExhausted,
                ..
            }
        ));
    }
}
