//! Shared harness for the end-to-end suites.
//!
//! Wires the in-memory state store, the in-process metadata server, the
//! local provider catalog, and the in-process runner factories, then runs
//! a real coordinator over them. Tests drive the system exactly like a
//! client would: create resources through metadata, then watch statuses
//! converge.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use syncstore::{MemoryStore, StateStore};

use coordinator_core::common::resource::ResourceId;
use coordinator_core::common::types::{ScalarType, ValueType};
use coordinator_core::common::Result;
use coordinator_core::config::Config;
use coordinator_core::kernel::metadata::resources::{
    FeatureLocation, FeatureVariant, LabelVariant, PrimaryData, ResourceColumns,
    ResourceStatus, SourceDefinition, SourceVariant, Status, TrainingSetVariant, Transformation,
};
use coordinator_core::kernel::metadata::{InProcessMetadata, MetadataServer};
use coordinator_core::kernel::providers::{ProviderDef, ProviderType};
use coordinator_core::kernel::runners::{
    register_local_runners, LocalScheduleReconciler, RunnerRegistry, TrainingSetDef,
    TransformationConfig,
};
use coordinator_core::kernel::stores::{
    LocalCatalog, MemoryOfflineStore, OfflineStore, OnlineStore, ProviderCatalog,
    ResourceOption, ResourceSchema,
};
use coordinator_core::common::NameVariant;
use coordinator_core::kernel::{Coordinator, CoordinatorDeps};

const WAIT_DEADLINE: Duration = Duration::from_secs(5);
const WAIT_POLL: Duration = Duration::from_millis(10);

pub struct TestHarness {
    pub store: MemoryStore,
    pub metadata: Arc<InProcessMetadata>,
    pub catalog: Arc<LocalCatalog>,
    pub schedules: Arc<LocalScheduleReconciler>,
    pub deps: Arc<CoordinatorDeps>,
    shutdown: CancellationToken,
}

impl TestHarness {
    pub async fn start() -> Self {
        let catalog = Arc::new(LocalCatalog::new());
        Self::start_with(catalog.clone(), catalog).await
    }

    /// Harness whose materializations always fail, for attempt-exhaustion
    /// scenarios.
    pub async fn start_failing_materialize() -> Self {
        let local = Arc::new(LocalCatalog::new());
        let failing = Arc::new(FailingMaterializeCatalog::new(local.clone()));
        Self::start_with(failing, local).await
    }

    async fn start_with(catalog: Arc<dyn ProviderCatalog>, local: Arc<LocalCatalog>) -> Self {
        let store = MemoryStore::new();
        let shared: Arc<dyn StateStore> = Arc::new(store.clone());
        let metadata = Arc::new(InProcessMetadata::new(shared.clone()));
        let registry = Arc::new(RunnerRegistry::new());
        register_local_runners(&registry, catalog.clone(), shared.clone()).unwrap();
        let schedules = LocalScheduleReconciler::new();

        let deps = Arc::new(CoordinatorDeps {
            store: shared,
            metadata: metadata.clone(),
            catalog,
            runners: registry,
            schedules: schedules.clone(),
            scheduled_runners: Default::default(),
            config: Config::local(),
        });

        let shutdown = CancellationToken::new();
        tokio::spawn(Coordinator::new(deps.clone()).run(shutdown.clone()));

        Self {
            store,
            metadata,
            catalog: local,
            schedules,
            deps,
            shutdown,
        }
    }

    /// One owner, one entity, an offline and an online provider.
    pub async fn seed(&self) {
        self.metadata.create_user("alice").await.unwrap();
        self.metadata
            .create_entity("user", "an end user")
            .await
            .unwrap();
        self.metadata
            .create_provider(ProviderDef::new(
                "offline-pg",
                ProviderType::Postgres,
                json!({"Host": "db", "Port": "5432"}),
            ))
            .await
            .unwrap();
        self.metadata
            .create_provider(ProviderDef::new(
                "redis-1",
                ProviderType::Redis,
                json!({"Addr": "redis:6379"}),
            ))
            .await
            .unwrap();
    }

    /// Poll until the resource reaches `expected`, panicking on timeout.
    pub async fn await_status(&self, id: &ResourceId, expected: Status) -> ResourceStatus {
        let deadline = tokio::time::Instant::now() + WAIT_DEADLINE;
        let mut last = None;
        while tokio::time::Instant::now() < deadline {
            if let Ok(status) = self.metadata.get_status(id).await {
                if status.status == expected {
                    return status;
                }
                last = Some(status);
            }
            tokio::time::sleep(WAIT_POLL).await;
        }
        panic!("{id} never reached {expected:?}; last seen {last:?}");
    }

    /// Poll until `key` disappears from the store.
    pub async fn await_key_absent(&self, key: &str) {
        let deadline = tokio::time::Instant::now() + WAIT_DEADLINE;
        while tokio::time::Instant::now() < deadline {
            if self.store.get(key).await.unwrap().is_none() {
                return;
            }
            tokio::time::sleep(WAIT_POLL).await;
        }
        panic!("key {key} never deleted");
    }

    pub fn stop(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// ============================================================================
// Variant builders
// ============================================================================

pub fn primary_source(name: &str, variant: &str, table: &str) -> SourceVariant {
    SourceVariant::builder()
        .name(name)
        .variant(variant)
        .definition(SourceDefinition::Primary(PrimaryData::SqlTable {
            name: table.to_string(),
        }))
        .owner("alice")
        .provider("offline-pg")
        .build()
}

pub fn sql_transformation(
    name: &str,
    variant: &str,
    query: &str,
    sources: Vec<NameVariant>,
) -> SourceVariant {
    SourceVariant::builder()
        .name(name)
        .variant(variant)
        .definition(SourceDefinition::Transformation(Transformation::Sql {
            query: query.to_string(),
            sources,
        }))
        .owner("alice")
        .provider("offline-pg")
        .build()
}

pub fn feature(name: &str, variant: &str, source: NameVariant) -> FeatureVariant {
    FeatureVariant::builder()
        .name(name)
        .variant(variant)
        .source(source)
        .entity("user")
        .owner("alice")
        .provider(Some("redis-1".to_string()))
        .value_type(ValueType::scalar(ScalarType::Float32))
        .location(FeatureLocation::Columns(
            ResourceColumns::builder()
                .entity("user_id")
                .value("amount")
                .ts("event_ts")
                .build(),
        ))
        .build()
}

pub fn label(name: &str, variant: &str, source: NameVariant) -> LabelVariant {
    LabelVariant::builder()
        .name(name)
        .variant(variant)
        .source(source)
        .entity("user")
        .owner("alice")
        .provider("offline-pg")
        .value_type(ValueType::scalar(ScalarType::Bool))
        .columns(
            ResourceColumns::builder()
                .entity("user_id")
                .value("churned")
                .ts("event_ts")
                .build(),
        )
        .build()
}

pub fn training_set(
    name: &str,
    variant: &str,
    label: NameVariant,
    features: Vec<NameVariant>,
) -> TrainingSetVariant {
    TrainingSetVariant::builder()
        .name(name)
        .variant(variant)
        .owner("alice")
        .provider("offline-pg")
        .label(label)
        .features(features)
        .build()
}

// ============================================================================
// Failure injection
// ============================================================================

/// Catalog whose offline stores refuse to materialize.
pub struct FailingMaterializeCatalog {
    inner: Arc<LocalCatalog>,
    offline: Arc<FailingOfflineStore>,
}

impl FailingMaterializeCatalog {
    pub fn new(inner: Arc<LocalCatalog>) -> Self {
        let offline = Arc::new(FailingOfflineStore {
            inner: inner.offline(),
        });
        Self { inner, offline }
    }
}

#[async_trait]
impl ProviderCatalog for FailingMaterializeCatalog {
    async fn offline_store(
        &self,
        _provider_type: ProviderType,
        _config: &Value,
    ) -> Result<Arc<dyn OfflineStore>> {
        Ok(self.offline.clone())
    }

    async fn online_store(
        &self,
        provider_type: ProviderType,
        config: &Value,
    ) -> Result<Arc<dyn OnlineStore>> {
        self.inner.online_store(provider_type, config).await
    }
}

struct FailingOfflineStore {
    inner: Arc<MemoryOfflineStore>,
}

#[async_trait]
impl OfflineStore for FailingOfflineStore {
    fn provider_type(&self) -> ProviderType {
        self.inner.provider_type()
    }

    async fn register_primary_from_source_table(
        &self,
        id: &ResourceId,
        table_name: &str,
    ) -> Result<()> {
        self.inner
            .register_primary_from_source_table(id, table_name)
            .await
    }

    async fn register_resource_from_source_table(
        &self,
        id: &ResourceId,
        schema: ResourceSchema,
        value_type: ValueType,
        opts: &[ResourceOption],
    ) -> Result<()> {
        self.inner
            .register_resource_from_source_table(id, schema, value_type, opts)
            .await
    }

    async fn create_transformation(&self, config: &TransformationConfig) -> Result<()> {
        self.inner.create_transformation(config).await
    }

    async fn update_transformation(&self, config: &TransformationConfig) -> Result<()> {
        self.inner.update_transformation(config).await
    }

    async fn materialize(&self, _id: &ResourceId) -> Result<String> {
        Err(coordinator_core::Error::internal(
            "injected materialize failure",
        ))
    }

    async fn get_training_set(&self, id: &ResourceId) -> Result<()> {
        self.inner.get_training_set(id).await
    }

    async fn create_training_set(&self, def: &TrainingSetDef) -> Result<()> {
        self.inner.create_training_set(def).await
    }

    async fn delete(&self, location: &str) -> Result<()> {
        self.inner.delete(location).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}
