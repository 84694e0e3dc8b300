//! The metadata facade.
//!
//! The coordinator only ever talks to [`MetadataServer`]; the trait is the
//! contract with the external metadata RPC. [`InProcessMetadata`] is the
//! shipped implementation over the in-memory [`ResourceGraph`]: it backs
//! local mode and the test suites, and it plays the metadata-writer role
//! on the job channel by putting a `JOB_…` key whenever a create actually
//! inserts a new variant.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use syncstore::StateStore;

use crate::common::error::Result;
use crate::common::resource::{NameVariant, ResourceId, ResourceType};
use crate::kernel::coordinator::jobs::JobRecord;
use crate::kernel::metadata::graph::{CreateOutcome, ResourceGraph};
use crate::kernel::metadata::resources::{
    FeatureVariant, LabelVariant, Model, ResourceStatus, SourceVariant, Status,
    TrainingSetVariant,
};
use crate::kernel::providers::ProviderDef;

/// Typed read/write access to the resource graph.
#[async_trait]
pub trait MetadataServer: Send + Sync {
    async fn get_source_variant(&self, nv: &NameVariant) -> Result<SourceVariant>;
    async fn get_feature_variant(&self, nv: &NameVariant) -> Result<FeatureVariant>;
    async fn get_label_variant(&self, nv: &NameVariant) -> Result<LabelVariant>;
    async fn get_training_set_variant(&self, nv: &NameVariant) -> Result<TrainingSetVariant>;

    async fn get_status(&self, id: &ResourceId) -> Result<ResourceStatus>;
    async fn set_status(
        &self,
        id: &ResourceId,
        status: Status,
        error_message: Option<String>,
    ) -> Result<()>;
    async fn set_schedule(&self, id: &ResourceId, schedule: &str) -> Result<()>;

    async fn fetch_provider(&self, name: &str) -> Result<ProviderDef>;
    /// Apply a provider update subject to the mutability policy.
    async fn update_provider(&self, def: ProviderDef) -> Result<()>;

    async fn create_provider(&self, def: ProviderDef) -> Result<()>;
    async fn create_entity(&self, name: &str, description: &str) -> Result<()>;
    async fn create_user(&self, name: &str) -> Result<()>;
    async fn create_model(&self, model: Model) -> Result<()>;

    async fn create_source_variant(&self, variant: SourceVariant) -> Result<CreateOutcome>;
    async fn create_feature_variant(&self, variant: FeatureVariant) -> Result<CreateOutcome>;
    async fn create_label_variant(&self, variant: LabelVariant) -> Result<CreateOutcome>;
    async fn create_training_set_variant(
        &self,
        variant: TrainingSetVariant,
    ) -> Result<CreateOutcome>;

    async fn list_variants(&self, resource_type: ResourceType) -> Result<Vec<ResourceId>>;

    async fn staged_for_deletion(&self, id: &ResourceId) -> Result<bool>;
    async fn stage_label_deletion(&self, id: &ResourceId) -> Result<()>;
    async fn finalize_delete(&self, id: &ResourceId) -> Result<()>;
}

/// In-process metadata server over the shared state store.
pub struct InProcessMetadata {
    graph: RwLock<ResourceGraph>,
    store: Arc<dyn StateStore>,
}

impl InProcessMetadata {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            graph: RwLock::new(ResourceGraph::new()),
            store,
        }
    }

    /// Queue the lifecycle job for a freshly created variant.
    async fn enqueue_job(&self, id: &ResourceId, schedule: &str) -> Result<()> {
        let record = JobRecord::new(id.clone(), schedule);
        self.store
            .put(&id.job_key(), serde_json::to_vec(&record)?)
            .await?;
        info!(resource = %id, "queued lifecycle job");
        Ok(())
    }
}

#[async_trait]
impl MetadataServer for InProcessMetadata {
    async fn get_source_variant(&self, nv: &NameVariant) -> Result<SourceVariant> {
        Ok(self.graph.read().await.source_variant(nv)?.clone())
    }

    async fn get_feature_variant(&self, nv: &NameVariant) -> Result<FeatureVariant> {
        Ok(self.graph.read().await.feature_variant(nv)?.clone())
    }

    async fn get_label_variant(&self, nv: &NameVariant) -> Result<LabelVariant> {
        Ok(self.graph.read().await.label_variant(nv)?.clone())
    }

    async fn get_training_set_variant(&self, nv: &NameVariant) -> Result<TrainingSetVariant> {
        Ok(self.graph.read().await.training_set_variant(nv)?.clone())
    }

    async fn get_status(&self, id: &ResourceId) -> Result<ResourceStatus> {
        self.graph.read().await.status_of(id)
    }

    async fn set_status(
        &self,
        id: &ResourceId,
        status: Status,
        error_message: Option<String>,
    ) -> Result<()> {
        self.graph.write().await.set_status(
            id,
            ResourceStatus {
                status,
                error_message,
            },
        )
    }

    async fn set_schedule(&self, id: &ResourceId, schedule: &str) -> Result<()> {
        self.graph.write().await.set_schedule(id, schedule)
    }

    async fn fetch_provider(&self, name: &str) -> Result<ProviderDef> {
        Ok(self.graph.read().await.provider(name)?.clone())
    }

    async fn update_provider(&self, def: ProviderDef) -> Result<()> {
        self.graph.write().await.upsert_provider(def)
    }

    async fn create_provider(&self, def: ProviderDef) -> Result<()> {
        self.graph.write().await.upsert_provider(def)
    }

    async fn create_entity(&self, name: &str, description: &str) -> Result<()> {
        self.graph.write().await.upsert_entity(name, description)
    }

    async fn create_user(&self, name: &str) -> Result<()> {
        self.graph.write().await.upsert_user(name)
    }

    async fn create_model(&self, model: Model) -> Result<()> {
        self.graph.write().await.upsert_model(model)
    }

    async fn create_source_variant(&self, variant: SourceVariant) -> Result<CreateOutcome> {
        let id = ResourceId::new(&variant.name, &variant.variant, ResourceType::SourceVariant);
        let schedule = variant.schedule.clone();
        let outcome = self.graph.write().await.create_source_variant(variant)?;
        if outcome == CreateOutcome::Created {
            self.enqueue_job(&id, &schedule).await?;
        }
        Ok(outcome)
    }

    async fn create_feature_variant(&self, variant: FeatureVariant) -> Result<CreateOutcome> {
        let id = ResourceId::new(&variant.name, &variant.variant, ResourceType::FeatureVariant);
        let schedule = variant.schedule.clone();
        let outcome = self.graph.write().await.create_feature_variant(variant)?;
        if outcome == CreateOutcome::Created {
            self.enqueue_job(&id, &schedule).await?;
        }
        Ok(outcome)
    }

    async fn create_label_variant(&self, variant: LabelVariant) -> Result<CreateOutcome> {
        let id = ResourceId::new(&variant.name, &variant.variant, ResourceType::LabelVariant);
        let outcome = self.graph.write().await.create_label_variant(variant)?;
        if outcome == CreateOutcome::Created {
            self.enqueue_job(&id, "").await?;
        }
        Ok(outcome)
    }

    async fn create_training_set_variant(
        &self,
        variant: TrainingSetVariant,
    ) -> Result<CreateOutcome> {
        let id = ResourceId::new(
            &variant.name,
            &variant.variant,
            ResourceType::TrainingSetVariant,
        );
        let schedule = variant.schedule.clone();
        let outcome = self
            .graph
            .write()
            .await
            .create_training_set_variant(variant)?;
        if outcome == CreateOutcome::Created {
            self.enqueue_job(&id, &schedule).await?;
        }
        Ok(outcome)
    }

    async fn list_variants(&self, resource_type: ResourceType) -> Result<Vec<ResourceId>> {
        Ok(self.graph.read().await.variants_of(resource_type))
    }

    async fn staged_for_deletion(&self, id: &ResourceId) -> Result<bool> {
        Ok(self.graph.read().await.is_staged_for_deletion(id))
    }

    async fn stage_label_deletion(&self, id: &ResourceId) -> Result<()> {
        self.graph.write().await.stage_delete(id)?;
        // Re-queue the label's job so the coordinator picks up the delete.
        self.enqueue_job(id, "").await
    }

    async fn finalize_delete(&self, id: &ResourceId) -> Result<()> {
        self.graph.write().await.finalize_delete(id)
    }
}
