use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Coordinator configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// etcd endpoints backing the state store.
    pub etcd_endpoints: Vec<String>,
    /// Namespace for runner Jobs and CronJobs.
    pub k8s_namespace: String,
    /// Worker image the Kubernetes runner launches.
    pub runner_image: String,
    /// Prefix for generated job names.
    pub job_prefix: String,
    /// Executions before a job is abandoned and its key deleted.
    pub max_job_attempts: i32,
    /// Lease TTL for per-job sessions.
    pub session_ttl: Duration,
    /// Poll interval for dependency readiness waits.
    pub dependency_poll_interval: Duration,
    /// Kubernetes Job backoffLimit.
    pub job_backoff_limit: i32,
    /// Kubernetes Job ttlSecondsAfterFinished.
    pub job_ttl_seconds_after_finished: i32,
    /// CronJob concurrency policy: Allow, Forbid, or Replace.
    pub cron_concurrency_policy: String,
    pub successful_jobs_history_limit: i32,
    pub failed_jobs_history_limit: i32,
    /// Debug mode pulls the runner image on every start.
    pub debug: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            etcd_endpoints: env::var("ETCD_ENDPOINTS")
                .context("ETCD_ENDPOINTS must be set")?
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            k8s_namespace: env::var("K8S_NAMESPACE").unwrap_or_else(|_| "default".to_string()),
            runner_image: env::var("RUNNER_IMAGE").context("RUNNER_IMAGE must be set")?,
            job_prefix: env::var("JOB_PREFIX").unwrap_or_else(|_| "runner".to_string()),
            max_job_attempts: parse_env("MAX_JOB_ATTEMPTS", 3)?,
            session_ttl: Duration::from_secs(parse_env("SESSION_TTL_SECONDS", 10)?),
            dependency_poll_interval: Duration::from_secs(1),
            job_backoff_limit: parse_env("JOB_BACKOFF_LIMIT", 0)?,
            job_ttl_seconds_after_finished: parse_env("JOB_TTL_SECONDS_AFTER_FINISHED", 60)?,
            cron_concurrency_policy: env::var("CRON_CONCURRENCY_POLICY")
                .unwrap_or_else(|_| "Allow".to_string()),
            successful_jobs_history_limit: parse_env("SUCCESSFUL_JOBS_HISTORY_LIMIT", 3)?,
            failed_jobs_history_limit: parse_env("FAILED_JOBS_HISTORY_LIMIT", 1)?,
            debug: env::var("DEBUG").map(|v| v == "true" || v == "1").unwrap_or(false),
        })
    }

    /// Defaults for local mode and tests: no external services, fast
    /// dependency polling.
    pub fn local() -> Self {
        Self {
            etcd_endpoints: Vec::new(),
            k8s_namespace: "default".to_string(),
            runner_image: String::new(),
            job_prefix: "runner".to_string(),
            max_job_attempts: 3,
            session_ttl: Duration::from_secs(10),
            dependency_poll_interval: Duration::from_millis(20),
            job_backoff_limit: 0,
            job_ttl_seconds_after_finished: 60,
            cron_concurrency_policy: "Allow".to_string(),
            successful_jobs_history_limit: 3,
            failed_jobs_history_limit: 1,
            debug: false,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("{name} must be a valid number")),
        Err(_) => Ok(default),
    }
}
