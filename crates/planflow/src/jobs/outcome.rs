use crate::jobs::error_codes::ErrorCode;
use crate::plans::model::PlanId;
use std::time::Duration;

/// Why a job stopped for good.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureReason {
    #[error("plan {0} not found")]
    NotFound(PlanId),
    #[error("gave up after {retries} retries: {last_error}")]
    RetriesExhausted { retries: u32, last_error: String },
    #[error("bad payload: {0}")]
    BadPayload(String),
    #[error("no handler for job_type={0}")]
    UnknownJobType(String),
}

impl FailureReason {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            FailureReason::NotFound(_) => ErrorCode::PlanNotFound,
            FailureReason::RetriesExhausted { .. } => ErrorCode::RetriesExhausted,
            FailureReason::BadPayload(_) => ErrorCode::BadPayload,
            FailureReason::UnknownJobType(_) => ErrorCode::UnknownJobType,
        }
    }
}

/// Result of one attempt. The scheduler owns what happens next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Number of records the attempt produced.
    Success(u64),
    PermanentFailure(FailureReason),
    /// Run the whole job again after `delay`.
    RetryRequested {
        delay: Duration,
        code: ErrorCode,
        error: String,
    },
}

impl JobOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobOutcome::RetryRequested { .. })
    }
}
