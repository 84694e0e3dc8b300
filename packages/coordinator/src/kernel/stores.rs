//! Provider store interfaces.
//!
//! The coordinator never executes SQL or shuffles data itself; it drives
//! these narrow traits and lets the provider do the work. Stores are
//! opened per handler invocation through the [`ProviderCatalog`] and
//! closed on exit.
//!
//! The in-memory implementations are the local-mode providers and the
//! substrate for every end-to-end test: they track registrations and
//! produced artifacts with real idempotence semantics, minus the data.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::common::error::{Error, Result};
use crate::common::resource::ResourceId;
use crate::common::types::ValueType;
use crate::kernel::metadata::resources::SnowflakeDynamicTableConfig;
use crate::kernel::providers::ProviderType;
use crate::kernel::runners::configs::{TrainingSetDef, TransformationConfig};

// ============================================================================
// Shared vocabulary
// ============================================================================

/// Which canonical table family a name belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceTableKind {
    Primary,
    Transformation,
    Feature,
    Label,
    TrainingSet,
}

impl ResourceTableKind {
    fn prefix(&self) -> &'static str {
        match self {
            ResourceTableKind::Primary => "primary",
            ResourceTableKind::Transformation => "transformation",
            ResourceTableKind::Feature => "feature",
            ResourceTableKind::Label => "label",
            ResourceTableKind::TrainingSet => "training_set",
        }
    }
}

/// Canonical provider-side table name for a variant. Names cannot contain
/// `__`, so the encoding is reversible.
pub fn resource_to_table_name(kind: ResourceTableKind, name: &str, variant: &str) -> String {
    format!("{}__{}__{}", kind.prefix(), name, variant)
}

/// Column bindings for registering a feature or label against a source
/// table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceSchema {
    pub entity: String,
    pub value: String,
    #[serde(rename = "TS")]
    pub ts: String,
    pub source_table: String,
}

/// Provider-specific options for resource registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceOption {
    SnowflakeDynamicTable(SnowflakeDynamicTableConfig),
}

// ============================================================================
// Store traits
// ============================================================================

/// A batch provider that produces durable tables.
#[async_trait]
pub trait OfflineStore: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    /// Bind a primary table to an existing table in the store. Idempotent
    /// per `(name, variant)`; re-binding to a different table fails with
    /// `DatasetAlreadyExists`.
    async fn register_primary_from_source_table(
        &self,
        id: &ResourceId,
        table_name: &str,
    ) -> Result<()>;

    /// Produce the canonical resource table for a feature or label.
    /// Idempotent per `(name, variant)` under an unchanged schema.
    async fn register_resource_from_source_table(
        &self,
        id: &ResourceId,
        schema: ResourceSchema,
        value_type: ValueType,
        opts: &[ResourceOption],
    ) -> Result<()>;

    async fn create_transformation(&self, config: &TransformationConfig) -> Result<()>;
    async fn update_transformation(&self, config: &TransformationConfig) -> Result<()>;

    /// Materialize a registered feature into keyed rows; returns the
    /// materialization id.
    async fn materialize(&self, id: &ResourceId) -> Result<String>;

    /// Succeeds iff the training set has already been produced.
    async fn get_training_set(&self, id: &ResourceId) -> Result<()>;
    async fn create_training_set(&self, def: &TrainingSetDef) -> Result<()>;

    /// Drop the table at `location`. Missing tables fail with
    /// `DatasetNotFound`; delete paths treat that as success.
    async fn delete(&self, location: &str) -> Result<()>;

    /// Release the connection. Every handler exit path runs this.
    async fn close(&self) -> Result<()>;
}

/// A low-latency store serving materialized features.
#[async_trait]
pub trait OnlineStore: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    async fn create_table(&self, name: &str, variant: &str, value_type: ValueType) -> Result<()>;
    async fn delete_table(&self, name: &str, variant: &str) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Opens stores from provider documents.
#[async_trait]
pub trait ProviderCatalog: Send + Sync {
    async fn offline_store(
        &self,
        provider_type: ProviderType,
        config: &Value,
    ) -> Result<Arc<dyn OfflineStore>>;

    async fn online_store(
        &self,
        provider_type: ProviderType,
        config: &Value,
    ) -> Result<Arc<dyn OnlineStore>>;
}

// ============================================================================
// In-memory offline store
// ============================================================================

#[derive(Default)]
struct OfflineState {
    /// table name -> backing source table
    primaries: HashMap<String, String>,
    /// table name -> (schema, value type)
    resources: HashMap<String, (ResourceSchema, ValueType)>,
    /// table name -> query text
    transformations: HashMap<String, String>,
    /// table name -> def
    training_sets: HashMap<String, TrainingSetDef>,
    /// materialization id -> resource table
    materializations: HashMap<String, String>,
}

/// Offline store that tracks artifacts without holding data.
#[derive(Default)]
pub struct MemoryOfflineStore {
    state: Mutex<OfflineState>,
}

impl MemoryOfflineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a transformation table exists for the variant. Test hook.
    pub async fn transformation_query(&self, id: &ResourceId) -> Option<String> {
        let table = resource_to_table_name(ResourceTableKind::Transformation, &id.name, &id.variant);
        self.state.lock().await.transformations.get(&table).cloned()
    }

    /// Whether a materialization has been produced for the variant. Test hook.
    pub async fn materialization_exists(&self, id: &ResourceId) -> bool {
        let table = resource_to_table_name(ResourceTableKind::Feature, &id.name, &id.variant);
        self.state
            .lock()
            .await
            .materializations
            .values()
            .any(|t| t == &table)
    }
}

#[async_trait]
impl OfflineStore for MemoryOfflineStore {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Memory
    }

    async fn register_primary_from_source_table(
        &self,
        id: &ResourceId,
        table_name: &str,
    ) -> Result<()> {
        let table = resource_to_table_name(ResourceTableKind::Primary, &id.name, &id.variant);
        let mut state = self.state.lock().await;
        match state.primaries.get(&table) {
            Some(existing) if existing == table_name => Ok(()),
            Some(_) => Err(Error::DatasetAlreadyExists(table)),
            None => {
                state.primaries.insert(table, table_name.to_string());
                Ok(())
            }
        }
    }

    async fn register_resource_from_source_table(
        &self,
        id: &ResourceId,
        schema: ResourceSchema,
        value_type: ValueType,
        _opts: &[ResourceOption],
    ) -> Result<()> {
        let kind = match id.resource_type {
            crate::common::resource::ResourceType::LabelVariant => ResourceTableKind::Label,
            _ => ResourceTableKind::Feature,
        };
        let table = resource_to_table_name(kind, &id.name, &id.variant);
        let mut state = self.state.lock().await;
        match state.resources.get(&table) {
            Some((existing, existing_type))
                if existing == &schema && existing_type == &value_type =>
            {
                Ok(())
            }
            Some(_) => Err(Error::DatasetAlreadyExists(table)),
            None => {
                state.resources.insert(table, (schema, value_type));
                Ok(())
            }
        }
    }

    async fn create_transformation(&self, config: &TransformationConfig) -> Result<()> {
        let target = &config.target;
        let table = resource_to_table_name(
            ResourceTableKind::Transformation,
            &target.name,
            &target.variant,
        );
        let mut state = self.state.lock().await;
        if state.transformations.contains_key(&table) {
            return Err(Error::DatasetAlreadyExists(table));
        }
        state.transformations.insert(table, config.query.clone());
        Ok(())
    }

    async fn update_transformation(&self, config: &TransformationConfig) -> Result<()> {
        let target = &config.target;
        let table = resource_to_table_name(
            ResourceTableKind::Transformation,
            &target.name,
            &target.variant,
        );
        let mut state = self.state.lock().await;
        if !state.transformations.contains_key(&table) {
            return Err(Error::DatasetNotFound(table));
        }
        state.transformations.insert(table, config.query.clone());
        Ok(())
    }

    async fn materialize(&self, id: &ResourceId) -> Result<String> {
        let table = resource_to_table_name(ResourceTableKind::Feature, &id.name, &id.variant);
        let mut state = self.state.lock().await;
        if !state.resources.contains_key(&table) {
            return Err(Error::DatasetNotFound(table));
        }
        let materialization_id = format!("materialization__{}__{}", id.name, id.variant);
        state
            .materializations
            .insert(materialization_id.clone(), table);
        Ok(materialization_id)
    }

    async fn get_training_set(&self, id: &ResourceId) -> Result<()> {
        let table = resource_to_table_name(ResourceTableKind::TrainingSet, &id.name, &id.variant);
        if self.state.lock().await.training_sets.contains_key(&table) {
            Ok(())
        } else {
            Err(Error::DatasetNotFound(table))
        }
    }

    async fn create_training_set(&self, def: &TrainingSetDef) -> Result<()> {
        let table =
            resource_to_table_name(ResourceTableKind::TrainingSet, &def.id.name, &def.id.variant);
        let mut state = self.state.lock().await;
        if state.training_sets.contains_key(&table) {
            return Err(Error::DatasetAlreadyExists(table));
        }
        state.training_sets.insert(table, def.clone());
        Ok(())
    }

    async fn delete(&self, location: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let removed = state.primaries.remove(location).is_some()
            | state.resources.remove(location).is_some()
            | state.transformations.remove(location).is_some()
            | state.training_sets.remove(location).is_some();
        if removed {
            Ok(())
        } else {
            Err(Error::DatasetNotFound(location.to_string()))
        }
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// In-memory online store
// ============================================================================

/// Online store that tracks which feature tables exist.
#[derive(Default)]
pub struct MemoryOnlineStore {
    tables: Mutex<HashMap<(String, String), ValueType>>,
}

impl MemoryOnlineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn table_exists(&self, name: &str, variant: &str) -> bool {
        self.tables
            .lock()
            .await
            .contains_key(&(name.to_string(), variant.to_string()))
    }
}

#[async_trait]
impl OnlineStore for MemoryOnlineStore {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Memory
    }

    async fn create_table(&self, name: &str, variant: &str, value_type: ValueType) -> Result<()> {
        self.tables
            .lock()
            .await
            .insert((name.to_string(), variant.to_string()), value_type);
        Ok(())
    }

    async fn delete_table(&self, name: &str, variant: &str) -> Result<()> {
        self.tables
            .lock()
            .await
            .remove(&(name.to_string(), variant.to_string()));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Local catalog
// ============================================================================

/// Catalog for local mode: every provider document resolves to the shared
/// in-memory stores, so artifacts registered by one handler are visible to
/// the next.
pub struct LocalCatalog {
    offline: Arc<MemoryOfflineStore>,
    online: Arc<MemoryOnlineStore>,
}

impl Default for LocalCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalCatalog {
    pub fn new() -> Self {
        Self {
            offline: Arc::new(MemoryOfflineStore::new()),
            online: Arc::new(MemoryOnlineStore::new()),
        }
    }

    pub fn offline(&self) -> Arc<MemoryOfflineStore> {
        self.offline.clone()
    }

    pub fn online(&self) -> Arc<MemoryOnlineStore> {
        self.online.clone()
    }
}

#[async_trait]
impl ProviderCatalog for LocalCatalog {
    async fn offline_store(
        &self,
        provider_type: ProviderType,
        _config: &Value,
    ) -> Result<Arc<dyn OfflineStore>> {
        if !provider_type.is_offline() {
            return Err(Error::invalid_argument(format!(
                "{provider_type} is not an offline provider"
            )));
        }
        debug!(%provider_type, "opened local offline store");
        Ok(self.offline.clone())
    }

    async fn online_store(
        &self,
        provider_type: ProviderType,
        _config: &Value,
    ) -> Result<Arc<dyn OnlineStore>> {
        debug!(%provider_type, "opened local online store");
        Ok(self.online.clone())
    }
}
