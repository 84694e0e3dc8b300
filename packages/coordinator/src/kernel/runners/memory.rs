//! In-process runners.
//!
//! Each runner spawns a cooperative task that drives the delegated store
//! operation and completes when it returns. `LocalCronRunner` wraps any of
//! them for scheduled update jobs: every firing re-runs the work and, on
//! success, writes the `UPDATE_EVENT_…` key the coordinator is watching -
//! the same contract the Kubernetes CronJob path fulfills through its
//! container.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};
use uuid::Uuid;

use syncstore::StateStore;

use crate::common::error::{Error, Result};
use crate::common::resource::ResourceId;
use crate::kernel::coordinator::jobs::ResourceUpdatedEvent;
use crate::kernel::runners::configs::{
    CreateTransformationConfig, MaterializedRunnerConfig, RunnerName, TrainingSetRunnerConfig,
};
use crate::kernel::runners::registry::RunnerRegistry;
use crate::kernel::runners::runner::{
    CompletionWatcher, CronRunner, Runner, TaskCompletionWatcher,
};
use crate::kernel::stores::{resource_to_table_name, ProviderCatalog, ResourceTableKind};

// ============================================================================
// Materialize / copy / import
// ============================================================================

/// Runs a materialization against the offline store and mirrors the table
/// into the online store when one is configured.
pub struct LocalMaterializeRunner {
    config: MaterializedRunnerConfig,
    catalog: Arc<dyn ProviderCatalog>,
}


impl fmt::Debug for LocalMaterializeRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMaterializeRunner").finish_non_exhaustive()
    }
}

impl LocalMaterializeRunner {
    pub fn new(config: MaterializedRunnerConfig, catalog: Arc<dyn ProviderCatalog>) -> Self {
        Self { config, catalog }
    }
}

#[async_trait]
impl Runner for LocalMaterializeRunner {
    fn resource(&self) -> ResourceId {
        self.config.resource_id.clone()
    }

    fn is_update_job(&self) -> bool {
        self.config.is_update
    }

    async fn run(&self) -> Result<Box<dyn CompletionWatcher>> {
        let config = self.config.clone();
        let catalog = self.catalog.clone();
        let label = format!("materialize {}", config.resource_id);
        Ok(Box::new(TaskCompletionWatcher::spawn(label, async move {
            let offline = catalog
                .offline_store(config.offline_type, &config.offline_config)
                .await?;
            let materialization = offline.materialize(&config.resource_id).await;
            offline.close().await?;
            let materialization = materialization?;
            info!(resource = %config.resource_id, materialization, "materialized feature");

            if config.online_type != crate::kernel::providers::ProviderType::None {
                let online = catalog
                    .online_store(config.online_type, &config.online_config)
                    .await?;
                let copied = online
                    .create_table(
                        &config.resource_id.name,
                        &config.resource_id.variant,
                        config.vtype,
                    )
                    .await;
                online.close().await?;
                copied?;
            }
            Ok(())
        })))
    }
}

/// Copies an existing materialization into the online store.
pub struct LocalCopyToOnlineRunner {
    config: MaterializedRunnerConfig,
    catalog: Arc<dyn ProviderCatalog>,
}


impl fmt::Debug for LocalCopyToOnlineRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCopyToOnlineRunner").finish_non_exhaustive()
    }
}

impl LocalCopyToOnlineRunner {
    pub fn new(config: MaterializedRunnerConfig, catalog: Arc<dyn ProviderCatalog>) -> Self {
        Self { config, catalog }
    }
}

#[async_trait]
impl Runner for LocalCopyToOnlineRunner {
    fn resource(&self) -> ResourceId {
        self.config.resource_id.clone()
    }

    fn is_update_job(&self) -> bool {
        self.config.is_update
    }

    async fn run(&self) -> Result<Box<dyn CompletionWatcher>> {
        let config = self.config.clone();
        let catalog = self.catalog.clone();
        let label = format!("copy to online {}", config.resource_id);
        Ok(Box::new(TaskCompletionWatcher::spawn(label, async move {
            let online = catalog
                .online_store(config.online_type, &config.online_config)
                .await?;
            let copied = online
                .create_table(
                    &config.resource_id.name,
                    &config.resource_id.variant,
                    config.vtype,
                )
                .await;
            online.close().await?;
            copied
        })))
    }
}

/// Stand-in for the S3 to DynamoDB bulk import path.
pub struct LocalS3ImportRunner {
    config: MaterializedRunnerConfig,
    catalog: Arc<dyn ProviderCatalog>,
}


impl fmt::Debug for LocalS3ImportRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalS3ImportRunner").finish_non_exhaustive()
    }
}

impl LocalS3ImportRunner {
    pub fn new(config: MaterializedRunnerConfig, catalog: Arc<dyn ProviderCatalog>) -> Self {
        Self { config, catalog }
    }
}

#[async_trait]
impl Runner for LocalS3ImportRunner {
    fn resource(&self) -> ResourceId {
        self.config.resource_id.clone()
    }

    fn is_update_job(&self) -> bool {
        self.config.is_update
    }

    async fn run(&self) -> Result<Box<dyn CompletionWatcher>> {
        let config = self.config.clone();
        let catalog = self.catalog.clone();
        let label = format!("s3 import {}", config.resource_id);
        Ok(Box::new(TaskCompletionWatcher::spawn(label, async move {
            let offline = catalog
                .offline_store(config.offline_type, &config.offline_config)
                .await?;
            let materialized = offline.materialize(&config.resource_id).await;
            offline.close().await?;
            materialized?;

            let online = catalog
                .online_store(config.online_type, &config.online_config)
                .await?;
            let imported = online
                .create_table(
                    &config.resource_id.name,
                    &config.resource_id.variant,
                    config.vtype,
                )
                .await;
            online.close().await?;
            imported
        })))
    }
}

// ============================================================================
// Transformation
// ============================================================================

pub struct LocalTransformationRunner {
    config: CreateTransformationConfig,
    catalog: Arc<dyn ProviderCatalog>,
}


impl fmt::Debug for LocalTransformationRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTransformationRunner").finish_non_exhaustive()
    }
}

impl LocalTransformationRunner {
    pub fn new(config: CreateTransformationConfig, catalog: Arc<dyn ProviderCatalog>) -> Self {
        Self { config, catalog }
    }
}

#[async_trait]
impl Runner for LocalTransformationRunner {
    fn resource(&self) -> ResourceId {
        self.config.transformation_config.target.clone()
    }

    fn is_update_job(&self) -> bool {
        self.config.is_update
    }

    async fn run(&self) -> Result<Box<dyn CompletionWatcher>> {
        let config = self.config.clone();
        let catalog = self.catalog.clone();
        let label = format!("transformation {}", config.transformation_config.target);
        Ok(Box::new(TaskCompletionWatcher::spawn(label, async move {
            let offline = catalog
                .offline_store(config.offline_type, &config.offline_config)
                .await?;
            let applied = if config.is_update {
                offline
                    .update_transformation(&config.transformation_config)
                    .await
            } else {
                offline
                    .create_transformation(&config.transformation_config)
                    .await
            };
            offline.close().await?;
            applied
        })))
    }
}

// ============================================================================
// Training set
// ============================================================================

pub struct LocalTrainingSetRunner {
    config: TrainingSetRunnerConfig,
    catalog: Arc<dyn ProviderCatalog>,
}


impl fmt::Debug for LocalTrainingSetRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTrainingSetRunner").finish_non_exhaustive()
    }
}

impl LocalTrainingSetRunner {
    pub fn new(config: TrainingSetRunnerConfig, catalog: Arc<dyn ProviderCatalog>) -> Self {
        Self { config, catalog }
    }
}

#[async_trait]
impl Runner for LocalTrainingSetRunner {
    fn resource(&self) -> ResourceId {
        self.config.def.id.clone()
    }

    fn is_update_job(&self) -> bool {
        self.config.is_update
    }

    async fn run(&self) -> Result<Box<dyn CompletionWatcher>> {
        let config = self.config.clone();
        let catalog = self.catalog.clone();
        let label = format!("training set {}", config.def.id);
        Ok(Box::new(TaskCompletionWatcher::spawn(label, async move {
            let offline = catalog
                .offline_store(config.offline_type, &config.offline_config)
                .await?;
            let applied = if config.is_update {
                // Updates rebuild in place.
                let table = resource_to_table_name(
                    ResourceTableKind::TrainingSet,
                    &config.def.id.name,
                    &config.def.id.variant,
                );
                match offline.delete(&table).await {
                    Ok(()) | Err(Error::DatasetNotFound(_)) => {
                        offline.create_training_set(&config.def).await
                    }
                    Err(err) => Err(err),
                }
            } else {
                offline.create_training_set(&config.def).await
            };
            offline.close().await?;
            applied
        })))
    }
}

// ============================================================================
// Cron wrapper
// ============================================================================

/// Drives a wrapped runner on a cron schedule and emits the update event
/// after each successful firing.
pub struct LocalCronRunner {
    inner: Arc<dyn Runner>,
    store: Arc<dyn StateStore>,
    scheduler: Mutex<Option<JobScheduler>>,
}


impl fmt::Debug for LocalCronRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCronRunner").finish_non_exhaustive()
    }
}

impl LocalCronRunner {
    pub fn new(inner: Arc<dyn Runner>, store: Arc<dyn StateStore>) -> Self {
        Self {
            inner,
            store,
            scheduler: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Runner for LocalCronRunner {
    fn resource(&self) -> ResourceId {
        self.inner.resource()
    }

    fn is_update_job(&self) -> bool {
        true
    }

    async fn run(&self) -> Result<Box<dyn CompletionWatcher>> {
        self.inner.run().await
    }

    fn as_cron(&self) -> Option<&dyn CronRunner> {
        Some(self)
    }
}

/// One firing of a scheduled update: run the wrapped work and, on
/// success, write the update event.
async fn fire_update(
    inner: Arc<dyn Runner>,
    store: Arc<dyn StateStore>,
    resource: ResourceId,
) -> Result<()> {
    let watcher = inner.run().await?;
    watcher.wait().await?;
    let event = ResourceUpdatedEvent {
        resource_id: resource.clone(),
        completed: Utc::now(),
    };
    let key = resource.update_event_key(Uuid::new_v4());
    store.put(&key, serde_json::to_vec(&event)?).await?;
    info!(resource = %resource, key, "scheduled update completed");
    Ok(())
}

#[async_trait]
impl CronRunner for LocalCronRunner {
    async fn schedule_job(&self, schedule: &str) -> Result<()> {
        // The scheduler takes six-field cron (leading seconds); callers
        // speak standard five-field.
        let spec = format!("0 {schedule}");
        let scheduler = JobScheduler::new()
            .await
            .map_err(|err| Error::internal(format!("cron scheduler: {err}")))?;

        let inner = self.inner.clone();
        let store = self.store.clone();
        let resource = self.resource();
        let job = Job::new_async(spec.as_str(), move |_id, _scheduler| {
            let inner = inner.clone();
            let store = store.clone();
            let resource = resource.clone();
            Box::pin(async move {
                if let Err(err) = fire_update(inner, store, resource.clone()).await {
                    warn!(resource = %resource, error = %err, "scheduled update failed");
                }
            })
        })
        .map_err(|err| Error::invalid_argument(format!("cron schedule {schedule}: {err}")))?;

        scheduler
            .add(job)
            .await
            .map_err(|err| Error::internal(format!("cron scheduler add: {err}")))?;
        scheduler
            .start()
            .await
            .map_err(|err| Error::internal(format!("cron scheduler start: {err}")))?;

        info!(resource = %self.resource(), schedule, "installed local cron job");
        *self.scheduler.lock().await = Some(scheduler);
        Ok(())
    }
}

// ============================================================================
// Registration
// ============================================================================

/// Register the in-process factory for every runner name. Update configs
/// come back wrapped in [`LocalCronRunner`] so handlers can schedule them.
pub fn register_local_runners(
    registry: &RunnerRegistry,
    catalog: Arc<dyn ProviderCatalog>,
    store: Arc<dyn StateStore>,
) -> Result<()> {
    let wrap = |runner: Arc<dyn Runner>, is_update: bool, store: &Arc<dyn StateStore>| {
        if is_update {
            Arc::new(LocalCronRunner::new(runner, store.clone())) as Arc<dyn Runner>
        } else {
            runner
        }
    };

    {
        let catalog = catalog.clone();
        let store = store.clone();
        registry.register(
            RunnerName::Materialize,
            Box::new(move |bytes| {
                let config: MaterializedRunnerConfig = serde_json::from_slice(bytes)?;
                let is_update = config.is_update;
                let runner = Arc::new(LocalMaterializeRunner::new(config, catalog.clone()));
                Ok(wrap(runner, is_update, &store))
            }),
        )?;
    }
    {
        let catalog = catalog.clone();
        let store = store.clone();
        registry.register(
            RunnerName::CreateTransformation,
            Box::new(move |bytes| {
                let config: CreateTransformationConfig = serde_json::from_slice(bytes)?;
                let is_update = config.is_update;
                let runner = Arc::new(LocalTransformationRunner::new(config, catalog.clone()));
                Ok(wrap(runner, is_update, &store))
            }),
        )?;
    }
    {
        let catalog = catalog.clone();
        let store = store.clone();
        registry.register(
            RunnerName::CreateTrainingSet,
            Box::new(move |bytes| {
                let config: TrainingSetRunnerConfig = serde_json::from_slice(bytes)?;
                let is_update = config.is_update;
                let runner = Arc::new(LocalTrainingSetRunner::new(config, catalog.clone()));
                Ok(wrap(runner, is_update, &store))
            }),
        )?;
    }
    {
        let catalog = catalog.clone();
        registry.register(
            RunnerName::CopyToOnline,
            Box::new(move |bytes| {
                let config: MaterializedRunnerConfig = serde_json::from_slice(bytes)?;
                Ok(Arc::new(LocalCopyToOnlineRunner::new(config, catalog.clone())) as _)
            }),
        )?;
    }
    {
        registry.register(
            RunnerName::S3ImportDynamodb,
            Box::new(move |bytes| {
                let config: MaterializedRunnerConfig = serde_json::from_slice(bytes)?;
                Ok(Arc::new(LocalS3ImportRunner::new(config, catalog.clone())) as _)
            }),
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::resource::ResourceType;
    use crate::common::types::{ScalarType, ValueType};
    use crate::kernel::providers::ProviderType;
    use crate::kernel::runners::configs::CloudProvider;
    use crate::kernel::stores::{LocalCatalog, OfflineStore, ResourceSchema};
    use serde_json::Value;
    use syncstore::MemoryStore;

    fn materialize_config(is_update: bool) -> MaterializedRunnerConfig {
        MaterializedRunnerConfig {
            offline_type: ProviderType::Memory,
            offline_config: Value::Null,
            online_type: ProviderType::Memory,
            online_config: Value::Null,
            resource_id: ResourceId::new("f", "v", ResourceType::FeatureVariant),
            vtype: ValueType::scalar(ScalarType::Float32),
            cloud: CloudProvider::Local,
            is_update,
        }
    }

    async fn register_feature(catalog: &LocalCatalog) {
        catalog
            .offline()
            .register_resource_from_source_table(
                &ResourceId::new("f", "v", ResourceType::FeatureVariant),
                ResourceSchema::default(),
                ValueType::scalar(ScalarType::Float32),
                &[],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn materialize_runner_creates_online_table() {
        let catalog = Arc::new(LocalCatalog::new());
        register_feature(&catalog).await;

        let runner =
            LocalMaterializeRunner::new(materialize_config(false), catalog.clone() as _);
        let watcher = runner.run().await.unwrap();
        watcher.wait().await.unwrap();

        assert!(catalog.offline().materialization_exists(&runner.resource()).await);
        assert!(catalog.online().table_exists("f", "v").await);
    }

    #[tokio::test]
    async fn materialize_runner_fails_without_registration() {
        let catalog = Arc::new(LocalCatalog::new());
        let runner =
            LocalMaterializeRunner::new(materialize_config(false), catalog as _);
        let watcher = runner.run().await.unwrap();
        assert!(watcher.wait().await.is_err());
    }

    #[tokio::test]
    async fn local_factories_wrap_updates_in_cron_runners() {
        let registry = RunnerRegistry::new();
        let catalog = Arc::new(LocalCatalog::new());
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        register_local_runners(&registry, catalog, store).unwrap();

        let plain = registry
            .create(
                RunnerName::Materialize,
                &serde_json::to_vec(&materialize_config(false)).unwrap(),
            )
            .unwrap();
        assert!(plain.as_cron().is_none());

        let update = registry
            .create(
                RunnerName::Materialize,
                &serde_json::to_vec(&materialize_config(true)).unwrap(),
            )
            .unwrap();
        assert!(update.as_cron().is_some());
        assert!(update.is_update_job());
    }

    #[tokio::test]
    async fn fire_update_writes_the_event_key() {
        let catalog = Arc::new(LocalCatalog::new());
        register_feature(&catalog).await;
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let resource = ResourceId::new("f", "v", ResourceType::FeatureVariant);

        let runner: Arc<dyn Runner> = Arc::new(LocalMaterializeRunner::new(
            materialize_config(true),
            catalog as _,
        ));
        fire_update(runner, store.clone(), resource.clone())
            .await
            .unwrap();

        let events = store.get_prefix("UPDATE_EVENT_").await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].key.starts_with("UPDATE_EVENT_f__v__FEATURE_VARIANT__"));
        let event: ResourceUpdatedEvent = serde_json::from_slice(&events[0].value).unwrap();
        assert_eq!(event.resource_id, resource);
    }
}
