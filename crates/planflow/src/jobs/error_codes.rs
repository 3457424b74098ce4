// src/jobs/error_codes.rs
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    PlanNotFound,
    StoreError,
    RetriesExhausted,
    BadPayload,
    UnknownJobType,
    Timeout,
    Unknown,
}

impl ErrorCode {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_uppercase().as_str() {
            "PLAN_NOT_FOUND" => Self::PlanNotFound,
            "STORE_ERROR" => Self::StoreError,
            "RETRIES_EXHAUSTED" => Self::RetriesExhausted,
            "BAD_PAYLOAD" => Self::BadPayload,
            "UNKNOWN_JOB_TYPE" => Self::UnknownJobType,
            "TIMEOUT" => Self::Timeout,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlanNotFound => "PLAN_NOT_FOUND",
            Self::StoreError => "STORE_ERROR",
            Self::RetriesExhausted => "RETRIES_EXHAUSTED",
            Self::BadPayload => "BAD_PAYLOAD",
            Self::UnknownJobType => "UNKNOWN_JOB_TYPE",
            Self::Timeout => "TIMEOUT",
            Self::Unknown => "UNKNOWN",
        }
    }
}

pub fn suggested_action(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::PlanNotFound => {
            "Non-retryable. The target or parent plan was deleted (or never created) before the copy ran. Check the producer."
        }
        ErrorCode::StoreError => {
            "Retry is OK. Check database health and constraint violations on plan_items."
        }
        ErrorCode::RetriesExhausted => {
            "Store kept failing for every attempt. Fix the underlying store error, then replay the job."
        }
        ErrorCode::BadPayload => {
            "Non-retryable. Payload must carry target_plan_id and parent_plan_id. Fix the producer."
        }
        ErrorCode::UnknownJobType => {
            "Non-retryable. No handler registered for this job_type on this worker. Deploy the handler, then replay."
        }
        ErrorCode::Timeout => {
            "Retry is OK. Check database latency and lock contention on the target plan."
        }
        ErrorCode::Unknown => {
            "Inspect error_message + logs. Decide if retryable; add mapping once understood."
        }
    }
}
