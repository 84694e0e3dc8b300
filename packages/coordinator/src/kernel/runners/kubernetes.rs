//! Kubernetes runner.
//!
//! Translates a runner config into a batch/v1 Job (or CronJob for update
//! schedules), creates it, and watches it to completion. The worker
//! container receives the runner name and serialized config through env
//! vars and performs the actual store operation; failure surfaces here
//! with the tail of the pod log attached.

use std::fmt::Write as _;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, Job, JobSpec, JobTemplateSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, Pod, PodSpec, PodTemplateSpec};
use kube::api::{Api, ListParams, LogParams, ObjectMeta, PostParams};
use kube::runtime::wait::await_condition;
use kube::Client;
use tracing::{info, warn};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::common::error::{Error, Result};
use crate::common::resource::ResourceId;
use crate::kernel::runners::configs::RunnerName;
use crate::kernel::runners::runner::{
    CompletionWatcher, CronRunner, Runner, TaskCompletionWatcher,
};

/// Env var carrying the runner name into the worker container.
const ENV_NAME: &str = "NAME";
/// Env var carrying the serialized runner config.
const ENV_CONFIG: &str = "CONFIG";

/// How much pod log to attach to a failure.
const FAILURE_LOG_TAIL_LINES: i64 = 50;

/// The sanitized, truncated, deterministic part of a job name.
const JOB_NAME_BASE_LEN: usize = 41;
/// How much of the uuid goes into the suffix.
const JOB_NAME_SUFFIX_LEN: usize = 10;

/// Deterministic base: `lowercase(prefix-type-name-variant)` with `_`
/// mapped to `.`, `/` and `:` stripped, truncated to 41 characters.
fn job_name_base(id: &ResourceId, prefix: &str) -> String {
    let raw = format!(
        "{}-{}-{}-{}",
        prefix, id.resource_type, id.name, id.variant
    )
    .to_lowercase();
    raw.chars()
        .filter_map(|c| match c {
            '_' => Some('.'),
            '/' | ':' => None,
            c => Some(c),
        })
        .take(JOB_NAME_BASE_LEN)
        .collect()
}

/// A fresh Job name: the deterministic base plus a uuid-derived suffix.
/// At most 52 characters.
pub fn generate_job_name(id: &ResourceId, prefix: &str) -> String {
    let suffix: String = Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(JOB_NAME_SUFFIX_LEN)
        .collect();
    format!("{}-{}", job_name_base(id, prefix), suffix)
}

/// The CronJob name for a resource. No suffix: schedule updates must be
/// able to reconstruct it from the resource id alone.
pub fn cron_job_name(id: &ResourceId, prefix: &str) -> String {
    job_name_base(id, prefix)
}

/// Everything needed to build the Job or CronJob spec.
#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct KubernetesRunnerConfig {
    pub runner_name: RunnerName,
    /// Serialized runner config, handed to the container verbatim.
    pub payload: Vec<u8>,
    pub resource: ResourceId,
    #[builder(default)]
    pub is_update: bool,
    pub namespace: String,
    pub image: String,
    #[builder(default = "runner".to_string())]
    pub job_prefix: String,
    #[builder(default = 0)]
    pub backoff_limit: i32,
    #[builder(default = 60)]
    pub ttl_seconds_after_finished: i32,
    #[builder(default)]
    pub debug: bool,
    #[builder(default = 3)]
    pub successful_jobs_history_limit: i32,
    #[builder(default = 1)]
    pub failed_jobs_history_limit: i32,
    #[builder(default = "Allow".to_string())]
    pub concurrency_policy: String,
    /// Extra env for the container; update jobs carry the lock substrate
    /// credentials here.
    #[builder(default)]
    pub extra_env: Vec<(String, String)>,
}

impl KubernetesRunnerConfig {
    fn container_env(&self) -> Vec<EnvVar> {
        let mut env = vec![
            EnvVar {
                name: ENV_NAME.to_string(),
                value: Some(self.runner_name.to_string()),
                ..Default::default()
            },
            EnvVar {
                name: ENV_CONFIG.to_string(),
                value: Some(String::from_utf8_lossy(&self.payload).into_owned()),
                ..Default::default()
            },
        ];
        for (name, value) in &self.extra_env {
            env.push(EnvVar {
                name: name.clone(),
                value: Some(value.clone()),
                ..Default::default()
            });
        }
        env
    }

    fn pod_template(&self) -> PodTemplateSpec {
        let pull_policy = if self.debug { "Always" } else { "IfNotPresent" };
        PodTemplateSpec {
            metadata: None,
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "worker".to_string(),
                    image: Some(self.image.clone()),
                    image_pull_policy: Some(pull_policy.to_string()),
                    env: Some(self.container_env()),
                    ..Default::default()
                }],
                restart_policy: Some("Never".to_string()),
                ..Default::default()
            }),
        }
    }

    fn job_spec(&self) -> JobSpec {
        // Copy-to-online shards by chunk index; everything else is a
        // single completion.
        let (completion_mode, completions) = if self.runner_name == RunnerName::CopyToOnline {
            (Some("Indexed".to_string()), Some(1))
        } else {
            (Some("NonIndexed".to_string()), None)
        };
        JobSpec {
            backoff_limit: Some(self.backoff_limit),
            ttl_seconds_after_finished: Some(self.ttl_seconds_after_finished),
            completion_mode,
            completions,
            template: self.pod_template(),
            ..Default::default()
        }
    }

    fn cron_job_spec(&self, schedule: &str) -> CronJobSpec {
        let concurrency_policy = match self.concurrency_policy.as_str() {
            policy @ ("Allow" | "Forbid" | "Replace") => policy.to_string(),
            other => {
                warn!(policy = other, "unknown concurrency policy, using Allow");
                "Allow".to_string()
            }
        };
        CronJobSpec {
            schedule: schedule.to_string(),
            concurrency_policy: Some(concurrency_policy),
            successful_jobs_history_limit: Some(self.successful_jobs_history_limit),
            failed_jobs_history_limit: Some(self.failed_jobs_history_limit),
            job_template: JobTemplateSpec {
                metadata: None,
                spec: Some(self.job_spec()),
            },
            ..Default::default()
        }
    }
}

/// Runs a config as a Kubernetes Job, or installs it as a CronJob.
pub struct KubernetesRunner {
    client: Client,
    config: KubernetesRunnerConfig,
}

impl std::fmt::Debug for KubernetesRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubernetesRunner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl KubernetesRunner {
    pub fn new(client: Client, config: KubernetesRunnerConfig) -> Self {
        Self { client, config }
    }

    fn jobs(&self) -> Api<Job> {
        Api::namespaced(self.client.clone(), &self.config.namespace)
    }

    fn cron_jobs(&self) -> Api<CronJob> {
        Api::namespaced(self.client.clone(), &self.config.namespace)
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.config.namespace)
    }
}

/// A Job is terminal once it reports success with nothing active, or any
/// failure.
fn job_terminal(job: Option<&Job>) -> bool {
    job.and_then(|j| j.status.as_ref())
        .map(|status| {
            let active = status.active.unwrap_or(0);
            let succeeded = status.succeeded.unwrap_or(0);
            let failed = status.failed.unwrap_or(0);
            (active == 0 && succeeded > 0) || failed > 0
        })
        .unwrap_or(false)
}

/// Tail of the first pod's log, best effort, for failure messages.
async fn failure_log(pods: &Api<Pod>, job_name: &str) -> String {
    let selector = format!("job-name={job_name}");
    let listed = match pods.list(&ListParams::default().labels(&selector)).await {
        Ok(listed) => listed,
        Err(err) => return format!("(could not list pods: {err})"),
    };
    let Some(pod_name) = listed.items.first().and_then(|p| p.metadata.name.clone()) else {
        return "(no pods found)".to_string();
    };
    let params = LogParams {
        tail_lines: Some(FAILURE_LOG_TAIL_LINES),
        ..Default::default()
    };
    match pods.logs(&pod_name, &params).await {
        Ok(log) => log,
        Err(err) => format!("(could not read pod log: {err})"),
    }
}

#[async_trait]
impl Runner for KubernetesRunner {
    fn resource(&self) -> ResourceId {
        self.config.resource.clone()
    }

    fn is_update_job(&self) -> bool {
        self.config.is_update
    }

    async fn run(&self) -> Result<Box<dyn CompletionWatcher>> {
        let name = generate_job_name(&self.config.resource, &self.config.job_prefix);
        let job = Job {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(self.config.namespace.clone()),
                ..Default::default()
            },
            spec: Some(self.config.job_spec()),
            status: None,
        };

        let jobs = self.jobs();
        jobs.create(&PostParams::default(), &job)
            .await
            .map_err(|err| Error::internal(format!("create job {name}: {err}")))?;
        info!(job = name, resource = %self.config.resource, "created kubernetes job");

        let pods = self.pods();
        let watch_name = name.clone();
        let label = format!("kubernetes job {name}");
        Ok(Box::new(TaskCompletionWatcher::spawn(label, async move {
            let terminal = await_condition(jobs.clone(), &watch_name, job_terminal)
                .await
                .map_err(|err| Error::internal(format!("watch job {watch_name}: {err}")))?;

            let status = terminal.as_ref().and_then(|j| j.status.as_ref());
            let succeeded = status.and_then(|s| s.succeeded).unwrap_or(0);
            let failed = status.and_then(|s| s.failed).unwrap_or(0);
            if failed > 0 || succeeded == 0 {
                let mut message = format!("job {watch_name} failed");
                let log = failure_log(&pods, &watch_name).await;
                if !log.is_empty() {
                    let _ = write!(message, "; pod log tail:\n{log}");
                }
                return Err(Error::Internal(message));
            }
            Ok(())
        })))
    }

    fn as_cron(&self) -> Option<&dyn CronRunner> {
        Some(self)
    }
}

#[async_trait]
impl CronRunner for KubernetesRunner {
    async fn schedule_job(&self, schedule: &str) -> Result<()> {
        let name = cron_job_name(&self.config.resource, &self.config.job_prefix);
        let cron_job = CronJob {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(self.config.namespace.clone()),
                ..Default::default()
            },
            spec: Some(self.config.cron_job_spec(schedule)),
            status: None,
        };

        let api = self.cron_jobs();
        match api.create(&PostParams::default(), &cron_job).await {
            Ok(_) => {}
            Err(kube::Error::Api(resp)) if resp.code == 409 => {
                // Already installed: converge the spec in place.
                let mut existing = api
                    .get(&name)
                    .await
                    .map_err(|err| Error::internal(format!("get cronjob {name}: {err}")))?;
                existing.spec = cron_job.spec.clone();
                api.replace(&name, &PostParams::default(), &existing)
                    .await
                    .map_err(|err| Error::internal(format!("replace cronjob {name}: {err}")))?;
            }
            Err(err) => {
                return Err(Error::internal(format!("create cronjob {name}: {err}")));
            }
        }
        info!(cronjob = name, schedule, "installed kubernetes cron job");
        Ok(())
    }
}

/// Point an installed CronJob at a new schedule. The name is
/// reconstructed from the resource id, which is why cron names carry no
/// uuid suffix.
pub async fn update_cron_schedule(
    client: Client,
    namespace: &str,
    id: &ResourceId,
    job_prefix: &str,
    schedule: &str,
) -> Result<()> {
    let name = cron_job_name(id, job_prefix);
    let api: Api<CronJob> = Api::namespaced(client, namespace);
    let mut cron_job = api
        .get(&name)
        .await
        .map_err(|err| Error::internal(format!("get cronjob {name}: {err}")))?;
    let spec = cron_job
        .spec
        .as_mut()
        .ok_or_else(|| Error::internal(format!("cronjob {name} has no spec")))?;
    spec.schedule = schedule.to_string();
    api.replace(&name, &PostParams::default(), &cron_job)
        .await
        .map_err(|err| Error::internal(format!("replace cronjob {name}: {err}")))?;
    info!(cronjob = name, schedule, "updated cron schedule");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::resource::ResourceType;

    fn id() -> ResourceId {
        ResourceId::new("avg_amt", "v1", ResourceType::FeatureVariant)
    }

    #[test]
    fn job_names_fit_and_are_sanitized() {
        let name = generate_job_name(&id(), "runner");
        assert!(name.len() <= 52);
        assert!(!name.contains('_'));
        assert!(!name.contains('/'));
        assert!(!name.contains(':'));
        assert!(name.starts_with("runner-feature.variant-avg.amt-v1-"));
    }

    #[test]
    fn job_name_base_is_stable_suffix_is_not() {
        let a = generate_job_name(&id(), "runner");
        let b = generate_job_name(&id(), "runner");
        assert_eq!(a[..a.len() - JOB_NAME_SUFFIX_LEN], b[..b.len() - JOB_NAME_SUFFIX_LEN]);
        assert_ne!(a, b);
    }

    #[test]
    fn long_names_truncate_to_the_base_length() {
        let long = ResourceId::new(
            "a_very_long_feature_name_that_keeps_going_and_going",
            "variant_with_length",
            ResourceType::FeatureVariant,
        );
        let name = generate_job_name(&long, "runner");
        assert_eq!(name.len(), JOB_NAME_BASE_LEN + 1 + JOB_NAME_SUFFIX_LEN);
        assert!(name.len() <= 52);
    }

    #[test]
    fn cron_names_are_deterministic() {
        assert_eq!(cron_job_name(&id(), "runner"), cron_job_name(&id(), "runner"));
        assert_eq!(cron_job_name(&id(), "runner"), job_name_base(&id(), "runner"));
    }

    #[test]
    fn indexed_completion_only_for_copy_to_online() {
        let base = KubernetesRunnerConfig::builder()
            .runner_name(RunnerName::CopyToOnline)
            .payload(b"{}".to_vec())
            .resource(id())
            .namespace("feature-store")
            .image("registry.example.com/worker:latest")
            .build();
        assert_eq!(base.job_spec().completion_mode.as_deref(), Some("Indexed"));

        let materialize = KubernetesRunnerConfig {
            runner_name: RunnerName::Materialize,
            ..base
        };
        assert_eq!(
            materialize.job_spec().completion_mode.as_deref(),
            Some("NonIndexed")
        );
    }

    #[test]
    fn unknown_concurrency_policy_defaults_to_allow() {
        let config = KubernetesRunnerConfig::builder()
            .runner_name(RunnerName::Materialize)
            .payload(b"{}".to_vec())
            .resource(id())
            .namespace("feature-store")
            .image("registry.example.com/worker:latest")
            .concurrency_policy("Sometimes")
            .build();
        let spec = config.cron_job_spec("*/5 * * * *");
        assert_eq!(spec.concurrency_policy.as_deref(), Some("Allow"));
        assert_eq!(spec.schedule, "*/5 * * * *");
    }

    #[test]
    fn container_env_carries_name_and_config() {
        let config = KubernetesRunnerConfig::builder()
            .runner_name(RunnerName::Materialize)
            .payload(br#"{"IsUpdate":false}"#.to_vec())
            .resource(id())
            .namespace("feature-store")
            .image("registry.example.com/worker:latest")
            .extra_env(vec![("ETCD_HOST".to_string(), "etcd:2379".to_string())])
            .build();
        let env = config.container_env();
        assert_eq!(env[0].name, "NAME");
        assert_eq!(env[0].value.as_deref(), Some("MATERIALIZE"));
        assert_eq!(env[1].name, "CONFIG");
        assert_eq!(env[1].value.as_deref(), Some(r#"{"IsUpdate":false}"#));
        assert_eq!(env[2].name, "ETCD_HOST");
    }

    #[test]
    fn debug_flag_flips_pull_policy() {
        let mut config = KubernetesRunnerConfig::builder()
            .runner_name(RunnerName::Materialize)
            .payload(b"{}".to_vec())
            .resource(id())
            .namespace("feature-store")
            .image("registry.example.com/worker:latest")
            .build();
        let spec = config.pod_template().spec.unwrap();
        assert_eq!(
            spec.containers[0].image_pull_policy.as_deref(),
            Some("IfNotPresent")
        );

        config.debug = true;
        let spec = config.pod_template().spec.unwrap();
        assert_eq!(spec.containers[0].image_pull_policy.as_deref(), Some("Always"));
    }
}
