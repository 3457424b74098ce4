//! Scheduler that keeps everything inside the current process.
//!
//! Each submit or retry arms a tokio timer; when it fires, the ticket goes
//! over an mpsc channel to a single worker task that runs the attempt. Jobs
//! that end in a permanent failure land in an in-memory dead-letter list.

use crate::jobs::outcome::{FailureReason, JobOutcome};
use crate::jobs::retry::RetryPolicy;
use crate::jobs::scheduler::{JobScheduler, JobTicket};
use crate::plans::duplicate::PlanDuplication;
use crate::plans::store::PlanStore;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct AttemptRecord {
    pub job_id: Uuid,
    pub retries: u32,
    pub started_at: Instant,
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub ticket: JobTicket,
    pub copied: u64,
}

#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub ticket: JobTicket,
    pub reason: FailureReason,
}

#[derive(Debug, Default)]
struct Records {
    attempts: Vec<AttemptRecord>,
    completions: Vec<Completion>,
    dead_letters: Vec<DeadLetter>,
}

#[derive(Clone)]
pub struct InProcessScheduler {
    ready: mpsc::UnboundedSender<JobTicket>,
    records: Arc<Mutex<Records>>,
}

impl InProcessScheduler {
    /// Spawn the worker task. Must be called inside a tokio runtime.
    pub fn start(store: Arc<dyn PlanStore>, policy: RetryPolicy) -> (Self, JoinHandle<()>) {
        let (ready, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            ready,
            records: Arc::new(Mutex::new(Records::default())),
        };

        let worker = tokio::spawn(scheduler.clone().work(rx, store, policy));
        (scheduler, worker)
    }

    pub fn attempts(&self) -> Vec<AttemptRecord> {
        self.with_records(|r| r.attempts.clone())
    }

    pub fn completions(&self) -> Vec<Completion> {
        self.with_records(|r| r.completions.clone())
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.with_records(|r| r.dead_letters.clone())
    }

    fn with_records<T>(&self, f: impl FnOnce(&mut Records) -> T) -> T {
        // a poisoned lock only means a reader panicked; the data is still usable
        let mut guard = self.records.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut guard)
    }

    fn arm(&self, ticket: JobTicket, delay: Duration) {
        let ready = self.ready.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if ready.send(ticket).is_err() {
                error!("in-process scheduler worker is gone, dropping ticket");
            }
        });
    }

    async fn work(
        self,
        mut rx: mpsc::UnboundedReceiver<JobTicket>,
        store: Arc<dyn PlanStore>,
        policy: RetryPolicy,
    ) {
        while let Some(ticket) = rx.recv().await {
            self.with_records(|r| {
                r.attempts.push(AttemptRecord {
                    job_id: ticket.job_id,
                    retries: ticket.retries,
                    started_at: Instant::now(),
                })
            });

            let outcome = ticket.job.run(store.as_ref(), ticket.retries, &policy).await;

            match outcome {
                JobOutcome::Success(copied) => {
                    self.with_records(|r| {
                        r.completions.push(Completion {
                            ticket: ticket.clone(),
                            copied,
                        })
                    });
                }
                JobOutcome::RetryRequested { delay, error, .. } => {
                    if let Err(e) = self.retry(&ticket, delay, &error).await {
                        error!(job_id = %ticket.job_id, error = %e, "failed to schedule retry");
                    }
                }
                JobOutcome::PermanentFailure(reason) => {
                    error!(
                        job_id = %ticket.job_id,
                        retries = ticket.retries,
                        code = reason.error_code().as_str(),
                        reason = %reason,
                        "job dead-lettered"
                    );
                    self.with_records(|r| {
                        r.dead_letters.push(DeadLetter {
                            ticket: ticket.clone(),
                            reason,
                        })
                    });
                }
            }
        }
    }
}

#[async_trait]
impl JobScheduler for InProcessScheduler {
    async fn submit(&self, job: PlanDuplication, delay: Duration) -> anyhow::Result<JobTicket> {
        let ticket = JobTicket {
            job_id: Uuid::new_v4(),
            job,
            retries: 0,
        };
        info!(job_id = %ticket.job_id, delay_secs = delay.as_secs(), "job submitted");
        self.arm(ticket.clone(), delay);
        Ok(ticket)
    }

    async fn retry(&self, ticket: &JobTicket, delay: Duration, reason: &str) -> anyhow::Result<()> {
        let next = JobTicket {
            retries: ticket.retries + 1,
            ..ticket.clone()
        };
        info!(
            job_id = %next.job_id,
            retries = next.retries,
            delay_secs = delay.as_secs(),
            reason,
            "job retry scheduled"
        );
        self.arm(next, delay);
        Ok(())
    }
}
