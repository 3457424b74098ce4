use planflow::api::{self, AdminState, PlansState};
use planflow::config;
use planflow::db;
use planflow::jobs::runner::JobRunner;
use planflow::jobs::{AttemptsRepo, FailureReason, JobOutcome, JobsRepo, PgJobScheduler};
use planflow::plans::PgPlanStore;
use planflow::telemetry;

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, info};

mod handlers;
use handlers::{build_registry, JobContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::Config::from_env()?;
    telemetry::init(cfg.log_format);

    let queue = cfg.queue.clone();
    let lease_seconds = cfg.lease_seconds;
    let concurrency = cfg.concurrency;
    let handler_timeout = cfg.handler_timeout();
    let reap_interval = Duration::from_millis(cfg.reap_interval_ms);
    let api_addr = cfg.api_addr.clone();

    info!(
        worker_id = %cfg.worker_id,
        queue = %queue,
        lease_seconds,
        concurrency,
        handler_timeout_ms = handler_timeout.as_millis() as u64,
        reap_interval_ms = cfg.reap_interval_ms,
        api = api_addr.as_deref().unwrap_or("disabled"),
        migrate_on_startup = cfg.migrate_on_startup,
        submit_delay_secs = cfg.submit_delay.as_secs(),
        retry_base_secs = cfg.retry.base_delay.as_secs(),
        max_retries = cfg.retry.max_retries,
        "planflow worker starting"
    );

    let pool = db::make_pool(&cfg.database_url).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(&pool).await?;
    }

    let jobs_repo = JobsRepo::new(pool.clone());
    let attempts_repo = AttemptsRepo::new(pool.clone());
    let store = Arc::new(PgPlanStore::new(pool.clone()));
    let scheduler = PgJobScheduler::new(jobs_repo.clone(), queue.clone(), &cfg.retry);

    let runner = JobRunner::new(jobs_repo.clone(), attempts_repo.clone(), scheduler.clone());
    let registry = build_registry(concurrency, handler_timeout);
    let ctx = JobContext {
        store: store.clone(),
        retry: cfg.retry.clone(),
    };

    // ---- API task ----
    let app = api::router(
        PlansState {
            store,
            scheduler: Arc::new(scheduler),
            submit_delay: cfg.submit_delay,
        },
        AdminState {
            jobs: jobs_repo.clone(),
            attempts: attempts_repo.clone(),
        },
    );

    let api_handle = tokio::spawn(async move {
        if let Some(addr) = api_addr {
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!(%addr, "api listening");
            axum::serve(listener, app).await?;
        } else {
            std::future::pending::<()>().await;
        }
        Ok::<(), anyhow::Error>(())
    });

    // ---- Worker loop task ----
    let worker_id = cfg.worker_id.clone();

    let worker_handle = tokio::spawn(async move {
        let mut last_reap_at: Option<Instant> = None;
        let mut in_flight = JoinSet::new();

        loop {
            // reclaim jobs from dead workers on a fixed interval, not every poll
            if last_reap_at.map_or(true, |t| t.elapsed() >= reap_interval) {
                let reaped = jobs_repo.reap_expired_locks().await?;
                last_reap_at = Some(Instant::now());
                if reaped > 0 {
                    info!(%worker_id, reaped, "reaped expired locks");
                }
            }

            let leased = if in_flight.len() < concurrency {
                jobs_repo
                    .lease_one_job(&queue, &worker_id, lease_seconds)
                    .await?
            } else {
                None
            };

            let Some(job) = leased else {
                // full or idle: wait for a slot to free up or for the next poll
                tokio::select! {
                    Some(done) = in_flight.join_next(), if !in_flight.is_empty() => done??,
                    _ = tokio::time::sleep(Duration::from_millis(250)) => {}
                }
                continue;
            };

            let attempt = attempts_repo.start_attempt(job.id, &worker_id).await?;
            debug!(
                job_id = %job.id,
                job_type = %job.job_type,
                attempt_no = attempt.attempt_no,
                retries = attempt.retries,
                in_flight = in_flight.len() + 1,
                "leased job"
            );

            let registry = registry.clone();
            let ctx = ctx.clone();
            let runner = runner.clone();
            let worker_id = worker_id.clone();

            in_flight.spawn(async move {
                let start = Instant::now();
                let outcome = match registry.handler_for(&job.job_type) {
                    Some(entry) => entry.run(&job, attempt.retries, &ctx).await,
                    None => JobOutcome::PermanentFailure(FailureReason::UnknownJobType(
                        job.job_type.clone(),
                    )),
                };
                let latency_ms = i32::try_from(start.elapsed().as_millis()).unwrap_or(i32::MAX);

                runner
                    .apply(&job, &attempt, &worker_id, latency_ms, &outcome)
                    .await
            });
        }

        #[allow(unreachable_code)]
        Ok::<(), anyhow::Error>(())
    });

    tokio::select! {
        res = api_handle => res??,
        res = worker_handle => res??,
    }

    Ok(())
}
