use planflow::config::Config;
use planflow::db;
use planflow::jobs::scheduler::JobScheduler;
use planflow::jobs::timeline::{build_timeline, explain};
use planflow::jobs::{AttemptsRepo, JobsRepo, PgJobScheduler};
use planflow::plans::{PgPlanStore, PlanDuplication, PlanId, PlanStore};
use sqlx::PgPool;
use std::env;
use uuid::Uuid;

const USAGE: &str = "planflowctl <command>\n\
Commands:\n\
- migrate\n\
- reset\n\
- seed <owner_id> <n_items>\n\
- show <plan_id>\n\
- duplicate <plan_id> [owner_id]\n\
- timeline <job_id>\n\
- counts\n\
\n\
Uses DATABASE_URL.\n";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();

    let Some(command) = args.get(1) else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };

    let cfg = Config::from_env()?;
    planflow::telemetry::init(cfg.log_format);
    let pool = db::make_pool(&cfg.database_url).await?;
    let store = PgPlanStore::new(pool.clone());

    match command.as_str() {
        "migrate" => {
            db::run_migrations(&pool).await?;
            println!("migrations OK");
        }
        "reset" => reset(&pool).await?,
        "seed" => {
            let owner_id: i64 = parse_arg(&args, 2, "owner_id")?;
            let n: usize = args.get(3).and_then(|s| s.parse().ok()).unwrap_or(3);
            let plan_id = seed(&store, owner_id, n).await?;
            println!("+ seeded plan id={plan_id} owner={owner_id} items={n}");
        }
        "show" => {
            let plan_id = PlanId(parse_arg(&args, 2, "plan_id")?);
            show(&store, plan_id).await?;
        }
        "duplicate" => {
            let parent_id = PlanId(parse_arg(&args, 2, "plan_id")?);
            let Some(parent) = store.get_plan(parent_id).await? else {
                anyhow::bail!("plan {parent_id} not found");
            };
            let owner_id = args
                .get(3)
                .and_then(|s| s.parse().ok())
                .unwrap_or(parent.owner_id);

            let target = store.create_plan(owner_id).await?;
            let scheduler = PgJobScheduler::new(JobsRepo::new(pool.clone()), &cfg.queue, &cfg.retry);
            let ticket = scheduler
                .submit(PlanDuplication::new(target.id, parent.id), cfg.submit_delay)
                .await?;
            println!(
                "+ plan {} created from {}; copy job {} runs in {}s",
                target.id,
                parent.id,
                ticket.job_id,
                cfg.submit_delay.as_secs()
            );
        }
        "timeline" => {
            let job_id: Uuid = parse_arg(&args, 2, "job_id")?;
            print_timeline(&pool, job_id).await?;
        }
        "counts" => {
            for (status, n) in JobsRepo::new(pool.clone()).status_counts().await? {
                println!("{status:>10} {n}");
            }
        }
        other => {
            eprintln!("Unknown command: {other}\n\n{USAGE}");
            std::process::exit(2);
        }
    }

    Ok(())
}

fn parse_arg<T: std::str::FromStr>(args: &[String], idx: usize, name: &str) -> anyhow::Result<T> {
    args.get(idx)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| anyhow::anyhow!("missing or invalid <{name}>\n\n{USAGE}"))
}

async fn reset(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        TRUNCATE TABLE
            job_attempts,
            jobs,
            plan_items,
            plans,
            items
        RESTART IDENTITY CASCADE
        "#,
    )
    .execute(pool)
    .await?;

    println!("reset OK");
    Ok(())
}

async fn seed(store: &PgPlanStore, owner_id: i64, n: usize) -> anyhow::Result<PlanId> {
    let plan = store.create_plan(owner_id).await?;
    let suffix = Uuid::new_v4().simple().to_string();
    for i in 0..n {
        let item = store
            .create_item(&format!("item-{i}-{}", &suffix[..8]))
            .await?;
        let quantity = i32::try_from(i + 1).unwrap_or(i32::MAX);
        store.add_plan_item(plan.id, item.id, quantity).await?;
    }
    Ok(plan.id)
}

async fn show(store: &PgPlanStore, plan_id: PlanId) -> anyhow::Result<()> {
    let Some(plan) = store.get_plan(plan_id).await? else {
        anyhow::bail!("plan {plan_id} not found");
    };
    println!("PLAN: id={} owner={} created_at={}", plan.id, plan.owner_id, plan.created_at);
    for link in store.list_plan_items(plan_id).await? {
        println!("  - link={} item={} quantity={}", link.id, link.item_id, link.quantity);
    }
    Ok(())
}

async fn print_timeline(pool: &PgPool, job_id: Uuid) -> anyhow::Result<()> {
    let jobs = JobsRepo::new(pool.clone());
    let attempts = AttemptsRepo::new(pool.clone());

    let Some(tl) = build_timeline(&jobs, &attempts, job_id).await? else {
        anyhow::bail!("job {job_id} not found");
    };

    println!(
        "JOB: id={} queue={} type={} status={} run_at={} payload={}",
        tl.job_id, tl.queue, tl.job_type, tl.status, tl.run_at, tl.payload_json
    );
    for a in &tl.attempts {
        println!(
            "{} | attempt {} (retries={}) | {} | worker={} latency_ms={:?} copied={:?} error={:?} {:?}",
            a.started_at.to_rfc3339(),
            a.attempt_no,
            a.retries,
            a.outcome.as_str(),
            a.worker_id,
            a.latency_ms,
            a.copied,
            a.error_code.map(|c| c.as_str()),
            a.error_message
        );
    }

    let ex = explain(&tl);
    println!("\n{}", ex.summary);
    if let Some(action) = ex.suggested_action {
        println!("suggested: {action}");
    }

    Ok(())
}
