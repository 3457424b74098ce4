use planflow::jobs::error_codes::ErrorCode;
use planflow::jobs::{FailureReason, Job, JobOutcome, RetryPolicy};
use planflow::plans::duplicate::{PlanDuplication, JOB_TYPE};
use planflow::plans::PlanStore;
use std::{collections::HashMap, pin::Pin, sync::Arc, time::Duration};
use tokio::{sync::Semaphore, time::timeout};

pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// `retries` is how many retries the job already went through.
type HandlerFn =
    dyn for<'a> Fn(&'a Job, u32, &'a JobContext) -> BoxFuture<'a, JobOutcome> + Send + Sync;

#[derive(Clone)]
pub struct JobContext {
    pub store: Arc<dyn PlanStore>,
    pub retry: RetryPolicy,
}

impl JobContext {
    /// Outcome for a transient failure the handler itself did not report.
    fn transient(&self, retries: u32, code: ErrorCode, error: String) -> JobOutcome {
        match self.retry.next_retry(retries) {
            Some(delay) => JobOutcome::RetryRequested { delay, code, error },
            None => JobOutcome::PermanentFailure(FailureReason::RetriesExhausted {
                retries,
                last_error: error,
            }),
        }
    }
}

#[derive(Clone)]
pub struct HandlerEntry {
    pub handler: Arc<HandlerFn>,
    pub semaphore: Option<Arc<Semaphore>>,
    pub timeout: Option<Duration>,
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, HandlerEntry>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, job_type: &str, handler: F)
    where
        F: for<'a> Fn(&'a Job, u32, &'a JobContext) -> BoxFuture<'a, JobOutcome>
            + Send
            + Sync
            + 'static,
    {
        self.register_with_options(job_type, handler, HandlerOptions::new());
    }

    pub fn register_with_options<F>(&mut self, job_type: &str, handler: F, opts: HandlerOptions)
    where
        F: for<'a> Fn(&'a Job, u32, &'a JobContext) -> BoxFuture<'a, JobOutcome>
            + Send
            + Sync
            + 'static,
    {
        let semaphore = opts
            .max_concurrency
            .map(|n| Arc::new(Semaphore::new(n.max(1))));
        self.handlers.insert(
            job_type.to_string(),
            HandlerEntry {
                handler: Arc::new(handler),
                semaphore,
                timeout: opts.timeout,
            },
        );
    }

    pub fn handler_for(&self, job_type: &str) -> Option<HandlerEntry> {
        self.handlers.get(job_type).cloned()
    }
}

#[derive(Clone, Debug, Default)]
pub struct HandlerOptions {
    max_concurrency: Option<usize>,
    timeout: Option<Duration>,
}

impl HandlerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = Some(n);
        self
    }

    pub fn timeout(mut self, dur: Duration) -> Self {
        self.timeout = Some(dur);
        self
    }
}

impl HandlerEntry {
    pub async fn run(&self, job: &Job, retries: u32, ctx: &JobContext) -> JobOutcome {
        let _permit = match &self.semaphore {
            Some(sem) => match sem.clone().acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => {
                    return ctx.transient(
                        retries,
                        ErrorCode::Unknown,
                        "handler semaphore closed".to_string(),
                    )
                }
            },
            None => None,
        };

        let fut = (self.handler)(job, retries, ctx);
        match self.timeout {
            Some(dur) => match timeout(dur, fut).await {
                Ok(outcome) => outcome,
                Err(_) => ctx.transient(
                    retries,
                    ErrorCode::Timeout,
                    format!("handler timeout after {}ms", dur.as_millis()),
                ),
            },
            None => fut.await,
        }
    }
}

fn boxed<'a, T>(fut: impl std::future::Future<Output = T> + Send + 'a) -> BoxFuture<'a, T> {
    Box::pin(fut)
}

fn duplicate_plan<'a>(job: &'a Job, retries: u32, ctx: &'a JobContext) -> BoxFuture<'a, JobOutcome> {
    boxed(async move {
        match PlanDuplication::from_payload(&job.payload_json) {
            Ok(dup) => dup.run(ctx.store.as_ref(), retries, &ctx.retry).await,
            Err(reason) => JobOutcome::PermanentFailure(reason),
        }
    })
}

/// `handler_timeout` must stay below the lease so a timed-out attempt is
/// recorded by the worker that still owns the row.
pub fn build_registry(max_concurrency: usize, handler_timeout: Duration) -> Arc<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();

    registry.register_with_options(
        JOB_TYPE,
        duplicate_plan,
        HandlerOptions::new()
            .max_concurrency(max_concurrency)
            .timeout(handler_timeout),
    );

    Arc::new(registry)
}
