//! Label registration and staged deletion.

use tracing::info;

use crate::common::error::{Error, Result};
use crate::common::resource::ResourceId;
use crate::domains::{await_ready_source, set_pending, source_table_name};
use crate::kernel::deps::CoordinatorDeps;
use crate::kernel::metadata::resources::{LabelVariant, Status};
use crate::kernel::providers::{ProviderDef, ProviderType};
use crate::kernel::stores::{
    resource_to_table_name, OfflineStore, ResourceOption, ResourceSchema, ResourceTableKind,
};

pub async fn run_register_label_job(deps: &CoordinatorDeps, id: &ResourceId) -> Result<()> {
    let label = deps.metadata.get_label_variant(&id.name_variant()).await?;
    set_pending(deps, id).await?;

    let source = await_ready_source(deps, &label.source).await?;
    // The resource table lives next to its source data.
    let provider = deps.metadata.fetch_provider(&source.provider).await?;
    let offline = deps
        .catalog
        .offline_store(provider.provider_type, &provider.serialized_config)
        .await?;

    let source_table = source_table_name(&source);
    let result = register(id, &label, source_table, &provider, offline.as_ref()).await;
    offline.close().await?;
    result?;

    deps.metadata.set_status(id, Status::Ready, None).await
}

async fn register(
    id: &ResourceId,
    label: &LabelVariant,
    source_table: String,
    provider: &ProviderDef,
    offline: &dyn OfflineStore,
) -> Result<()> {
    let schema = ResourceSchema {
        entity: label.columns.entity.clone(),
        value: label.columns.value.clone(),
        ts: label.columns.ts.clone(),
        source_table,
    };
    let mut opts = Vec::new();
    if provider.provider_type == ProviderType::Snowflake {
        opts.push(ResourceOption::SnowflakeDynamicTable(
            label.snowflake_config.clone().unwrap_or_default(),
        ));
    }
    offline
        .register_resource_from_source_table(id, schema, label.value_type, &opts)
        .await?;
    info!(resource = %id, "registered label resource table");
    Ok(())
}

/// Delete path for a label staged for deletion: drop the provider table
/// (a missing table counts as already deleted), then finalize.
pub async fn run_delete_label_job(deps: &CoordinatorDeps, id: &ResourceId) -> Result<()> {
    let label = deps.metadata.get_label_variant(&id.name_variant()).await?;
    let provider = deps.metadata.fetch_provider(&label.provider).await?;
    let offline = deps
        .catalog
        .offline_store(provider.provider_type, &provider.serialized_config)
        .await?;

    let location = resource_to_table_name(ResourceTableKind::Label, &id.name, &id.variant);
    let dropped = match offline.delete(&location).await {
        Ok(()) => Ok(()),
        Err(Error::DatasetNotFound(_)) => {
            info!(resource = %id, location, "label table already gone");
            Ok(())
        }
        Err(err) => Err(err),
    };
    offline.close().await?;
    dropped?;

    deps.metadata.finalize_delete(id).await?;
    info!(resource = %id, "label deleted");
    Ok(())
}
