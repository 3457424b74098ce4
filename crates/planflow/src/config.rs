use crate::jobs::retry::RetryPolicy;
use crate::plans::duplicate::SUBMIT_DELAY;
use std::time::Duration;

/// Runtime configuration, read from the environment (and `.env` if present).
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub worker_id: String,
    pub queue: String,
    pub lease_seconds: i64,
    /// Jobs a worker runs at once.
    pub concurrency: usize,
    pub reap_interval_ms: u64,
    pub api_addr: Option<String>,
    pub migrate_on_startup: bool,
    pub submit_delay: Duration,
    pub retry: RetryPolicy,
    pub log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL is missing"))?;

        let worker_id = env_nonempty("PLANFLOW_WORKER_ID")
            .or_else(|| env_nonempty("HOSTNAME"))
            .unwrap_or_else(|| "worker-1".to_string());

        let queue = env_nonempty("PLANFLOW_QUEUE").unwrap_or_else(|| "default".to_string());

        let lease_seconds = env_parse::<i64>("PLANFLOW_LEASE_SECONDS").unwrap_or(30).max(1);

        let concurrency = env_parse::<usize>("PLANFLOW_WORKER_CONCURRENCY").unwrap_or(8).max(1);

        let reap_interval_ms = env_parse::<u64>("PLANFLOW_REAP_INTERVAL_MS").unwrap_or(5_000);

        let api_addr = env_nonempty("PLANFLOW_API_ADDR").and_then(|s| normalize_optional_addr(&s));

        let migrate_on_startup = env_bool("PLANFLOW_MIGRATE_ON_STARTUP").unwrap_or(false);

        let submit_delay = env_parse::<u64>("PLANFLOW_SUBMIT_DELAY_SECS")
            .map(Duration::from_secs)
            .unwrap_or(SUBMIT_DELAY);

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            base_delay: env_parse::<u64>("PLANFLOW_RETRY_BASE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.base_delay),
            max_retries: env_parse::<u32>("PLANFLOW_MAX_RETRIES").unwrap_or(defaults.max_retries),
        };

        let log_format = match env_nonempty("PLANFLOW_LOG_FORMAT").as_deref() {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Ok(Self {
            database_url,
            worker_id,
            queue,
            lease_seconds,
            concurrency,
            reap_interval_ms,
            api_addr,
            migrate_on_startup,
            submit_delay,
            retry,
            log_format,
        })
    }

    /// How long a handler may run, see [`handler_timeout`].
    pub fn handler_timeout(&self) -> Duration {
        handler_timeout(self.lease_seconds)
    }
}

/// Three quarters of the lease. A handler that runs out of time still
/// holds its lease while the outcome is written, so the reaper cannot hand
/// the row to another worker first.
pub fn handler_timeout(lease_seconds: i64) -> Duration {
    let lease_ms = u64::try_from(lease_seconds.max(1)).unwrap_or(1) * 1_000;
    Duration::from_millis(lease_ms * 3 / 4)
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_nonempty(key).and_then(|s| s.trim().parse().ok())
}

pub(crate) fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn normalize_optional_addr(value: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if matches!(v.to_lowercase().as_str(), "0" | "off" | "false" | "none") {
        return None;
    }
    Some(v.to_string())
}
