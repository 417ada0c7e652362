use std::net::IpAddr;
use std::time::Duration;

use ipnet::IpNet;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Config {
    /// Absent means the process runs on the in-memory store.
    pub database_url: Option<String>,
    pub host: IpAddr,
    pub port: u16,
    pub max_body_size: usize,
    pub trusted_proxies: Vec<IpNet>,
    pub log_level: String,
    /// When set, a full-scope key is issued for this tenant at startup if it has none.
    pub bootstrap_tenant: Option<Uuid>,
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of worker loops sharing the delivery queue.
    pub worker_count: usize,
    /// Fallback polling interval when no publish signal arrives.
    pub poll_interval: Duration,
    pub batch_size: i64,
    pub per_tenant_batch: i64,
    /// Attempts run concurrently within one batch.
    pub concurrency: usize,
    pub max_attempts: i32,
    pub attempt_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            poll_interval: Duration::from_secs(5),
            batch_size: 50,
            per_tenant_batch: 10,
            concurrency: 8,
            max_attempts: 8,
            attempt_timeout: Duration::from_secs(30),
            backoff_base: Duration::from_secs(10),
            backoff_max: Duration::from_secs(3600),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let host: IpAddr = env_or("HOOKLINE_HOST", "0.0.0.0")
            .parse()
            .map_err(|e| format!("Invalid HOOKLINE_HOST: {e}"))?;

        let port: u16 = env_parse("HOOKLINE_PORT", "3000")?;

        let max_body_size: usize = env_parse("HOOKLINE_MAX_BODY_SIZE", "1048576")?;

        let trusted_proxies: Vec<IpNet> = env_or("HOOKLINE_TRUSTED_PROXIES", "")
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| {
                s.trim()
                    .parse()
                    .map_err(|e| format!("Invalid HOOKLINE_TRUSTED_PROXIES entry '{s}': {e}"))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let log_level = env_or("HOOKLINE_LOG_LEVEL", "info");

        let bootstrap_tenant = std::env::var("HOOKLINE_BOOTSTRAP_TENANT_ID")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(|s| {
                s.trim()
                    .parse::<Uuid>()
                    .map_err(|e| format!("Invalid HOOKLINE_BOOTSTRAP_TENANT_ID: {e}"))
            })
            .transpose()?;

        let defaults = WorkerConfig::default();
        let worker = WorkerConfig {
            worker_count: env_parse("HOOKLINE_WORKER_COUNT", &defaults.worker_count.to_string())?,
            poll_interval: Duration::from_secs(env_parse(
                "HOOKLINE_WORKER_INTERVAL_SECS",
                &defaults.poll_interval.as_secs().to_string(),
            )?),
            batch_size: env_parse("HOOKLINE_BATCH_SIZE", &defaults.batch_size.to_string())?,
            per_tenant_batch: env_parse(
                "HOOKLINE_PER_TENANT_BATCH",
                &defaults.per_tenant_batch.to_string(),
            )?,
            concurrency: env_parse(
                "HOOKLINE_DELIVERY_CONCURRENCY",
                &defaults.concurrency.to_string(),
            )?,
            max_attempts: env_parse("HOOKLINE_MAX_ATTEMPTS", &defaults.max_attempts.to_string())?,
            attempt_timeout: Duration::from_secs(env_parse(
                "HOOKLINE_ATTEMPT_TIMEOUT_SECS",
                &defaults.attempt_timeout.as_secs().to_string(),
            )?),
            backoff_base: Duration::from_secs(env_parse(
                "HOOKLINE_BACKOFF_BASE_SECS",
                &defaults.backoff_base.as_secs().to_string(),
            )?),
            backoff_max: Duration::from_secs(env_parse(
                "HOOKLINE_BACKOFF_MAX_SECS",
                &defaults.backoff_max.as_secs().to_string(),
            )?),
        };

        if worker.max_attempts < 1 {
            return Err("HOOKLINE_MAX_ATTEMPTS must be at least 1".to_string());
        }
        if worker.batch_size < 1 || worker.per_tenant_batch < 1 {
            return Err("HOOKLINE_BATCH_SIZE and HOOKLINE_PER_TENANT_BATCH must be at least 1".to_string());
        }
        if worker.attempt_timeout.is_zero() {
            return Err("HOOKLINE_ATTEMPT_TIMEOUT_SECS must be at least 1".to_string());
        }
        if worker.backoff_base.is_zero() || worker.backoff_max < worker.backoff_base {
            return Err(
                "HOOKLINE_BACKOFF_BASE_SECS must be positive and not exceed HOOKLINE_BACKOFF_MAX_SECS"
                    .to_string(),
            );
        }

        Ok(Config {
            database_url,
            host,
            port,
            max_body_size,
            trusted_proxies,
            log_level,
            bootstrap_tenant,
            worker,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: &str) -> Result<T, String>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    env_or(key, default)
        .trim()
        .parse()
        .map_err(|e| format!("Invalid {key}: {e}"))
}
