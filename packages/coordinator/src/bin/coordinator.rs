//! Coordinator daemon.
//!
//! Wires the etcd state store, the metadata facade, the Kubernetes runner
//! factories, and the schedule reconciler, then runs the watch loop until
//! shutdown.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use syncstore::{EtcdStore, StateStore};

use coordinator_core::common::resource::ResourceId;
use coordinator_core::common::Error;
use coordinator_core::config::Config;
use coordinator_core::kernel::runners::{
    CreateTransformationConfig, KubernetesRunner, KubernetesRunnerConfig,
    KubernetesScheduleReconciler, MaterializedRunnerConfig, RunnerName, RunnerRegistry,
    TrainingSetRunnerConfig,
};
use coordinator_core::kernel::stores::LocalCatalog;
use coordinator_core::kernel::{Coordinator, CoordinatorDeps, InProcessMetadata};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    info!(endpoints = ?config.etcd_endpoints, "connecting state store");
    let store: Arc<dyn StateStore> = Arc::new(EtcdStore::connect(&config.etcd_endpoints).await?);

    let kube_client = kube::Client::try_default().await?;
    let metadata = Arc::new(InProcessMetadata::new(store.clone()));
    let catalog = Arc::new(LocalCatalog::new());

    let registry = Arc::new(RunnerRegistry::new());
    register_kubernetes_runners(&registry, kube_client.clone(), &config)?;

    let schedules = Arc::new(KubernetesScheduleReconciler::new(
        kube_client,
        config.k8s_namespace.clone(),
        config.job_prefix.clone(),
    ));

    let deps = Arc::new(CoordinatorDeps {
        store,
        metadata,
        catalog,
        runners: registry,
        schedules,
        scheduled_runners: Default::default(),
        config,
    });

    Coordinator::new(deps).run_until_shutdown().await?;
    Ok(())
}

/// Register a Kubernetes-backed factory for every runner name.
fn register_kubernetes_runners(
    registry: &RunnerRegistry,
    client: kube::Client,
    config: &Config,
) -> Result<()> {
    for name in [
        RunnerName::Materialize,
        RunnerName::CreateTrainingSet,
        RunnerName::CreateTransformation,
        RunnerName::CopyToOnline,
        RunnerName::S3ImportDynamodb,
    ] {
        let client = client.clone();
        let config = config.clone();
        registry.register(
            name,
            Box::new(move |bytes| {
                let (resource, is_update) = peek_payload(name, bytes)?;
                // Update jobs write completion events back to the store.
                let extra_env = if is_update {
                    vec![("ETCD_ENDPOINTS".to_string(), config.etcd_endpoints.join(","))]
                } else {
                    Vec::new()
                };
                let runner_config = KubernetesRunnerConfig::builder()
                    .runner_name(name)
                    .payload(bytes.to_vec())
                    .resource(resource)
                    .is_update(is_update)
                    .namespace(config.k8s_namespace.clone())
                    .image(config.runner_image.clone())
                    .job_prefix(config.job_prefix.clone())
                    .backoff_limit(config.job_backoff_limit)
                    .ttl_seconds_after_finished(config.job_ttl_seconds_after_finished)
                    .debug(config.debug)
                    .successful_jobs_history_limit(config.successful_jobs_history_limit)
                    .failed_jobs_history_limit(config.failed_jobs_history_limit)
                    .concurrency_policy(config.cron_concurrency_policy.clone())
                    .extra_env(extra_env)
                    .build();
                Ok(Arc::new(KubernetesRunner::new(client.clone(), runner_config)) as _)
            }),
        )?;
    }
    Ok(())
}

/// Pull the resource id and update flag out of a serialized runner
/// config without committing to the full shape.
fn peek_payload(
    name: RunnerName,
    bytes: &[u8],
) -> std::result::Result<(ResourceId, bool), Error> {
    match name {
        RunnerName::CreateTransformation => {
            let config: CreateTransformationConfig = serde_json::from_slice(bytes)?;
            Ok((config.transformation_config.target, config.is_update))
        }
        RunnerName::CreateTrainingSet => {
            let config: TrainingSetRunnerConfig = serde_json::from_slice(bytes)?;
            Ok((config.def.id, config.is_update))
        }
        _ => {
            let config: MaterializedRunnerConfig = serde_json::from_slice(bytes)?;
            Ok((config.resource_id, config.is_update))
        }
    }
}
