//! Source registration: primary tables and transformations.

use std::collections::HashMap;
use std::time::Duration;

use tracing::info;

use crate::common::error::Result;
use crate::common::resource::{NameVariant, ResourceId, ResourceType};
use crate::common::retry::retry_with_delays;
use crate::domains::sources::template::{self, SqlIdentifierQuoting};
use crate::domains::{await_ready, install_update_schedule, set_pending, source_table_name};
use crate::kernel::deps::CoordinatorDeps;
use crate::kernel::metadata::resources::{
    PrimaryData, SourceDefinition, Status, Transformation,
};
use crate::kernel::providers::ProviderDef;
use crate::kernel::runners::{
    CreateTransformationConfig, RunnerName, SourceMapping, TransformationConfig,
    TransformationKind,
};
use crate::kernel::stores::OfflineStore;

/// Attempts for the ready-status write after a transformation completes.
/// Tolerates transient metadata-server errors.
const READY_WRITE_ATTEMPTS: usize = 5;
const READY_WRITE_DELAY: Duration = Duration::from_millis(10);

pub async fn run_register_source_job(
    deps: &CoordinatorDeps,
    id: &ResourceId,
    schedule: &str,
) -> Result<()> {
    let source = deps.metadata.get_source_variant(&id.name_variant()).await?;
    set_pending(deps, id).await?;

    let provider = deps.metadata.fetch_provider(&source.provider).await?;
    let offline = deps
        .catalog
        .offline_store(provider.provider_type, &provider.serialized_config)
        .await?;

    let result = match &source.definition {
        SourceDefinition::Primary(data) => {
            run_primary_table_job(deps, id, data, offline.as_ref()).await
        }
        SourceDefinition::Transformation(transformation) => {
            run_transformation(deps, id, transformation, &provider, schedule).await
        }
    };

    offline.close().await?;
    result
}

/// Bind the primary table and mark it ready. Idempotent per
/// `(name, variant)`: a replayed job re-binds to the same table.
async fn run_primary_table_job(
    deps: &CoordinatorDeps,
    id: &ResourceId,
    data: &PrimaryData,
    offline: &dyn OfflineStore,
) -> Result<()> {
    let table = match data {
        PrimaryData::SqlTable { name } => name.clone(),
        PrimaryData::File { path, .. } => path.clone(),
    };
    offline
        .register_primary_from_source_table(id, &table)
        .await?;
    info!(resource = %id, table, "registered primary table");
    deps.metadata.set_status(id, Status::Ready, None).await
}

async fn run_transformation(
    deps: &CoordinatorDeps,
    id: &ResourceId,
    transformation: &Transformation,
    provider: &ProviderDef,
    schedule: &str,
) -> Result<()> {
    let refs = transformation.dependencies();
    verify_completion_of_sources(deps, refs).await?;
    let (source_map, source_mapping) = map_name_variants_to_tables(deps, refs).await?;

    let (kind, query, args) = match transformation {
        Transformation::Sql { query, .. } => {
            let quoting = SqlIdentifierQuoting::for_provider(provider);
            let substituted = template::replace(query, &source_map, &quoting)?;
            (TransformationKind::Sql, substituted, None)
        }
        // Dataframe code is opaque; inputs are passed positionally through
        // the source mapping.
        Transformation::Dataframe { query, args, .. } => {
            (TransformationKind::Dataframe, query.clone(), args.clone())
        }
    };

    let config = TransformationConfig {
        kind,
        target: id.clone(),
        query,
        source_mapping,
        args,
    };
    run_transformation_job(deps, id, config, provider, schedule).await
}

/// Wait until every referenced source variant is `READY`.
async fn verify_completion_of_sources(
    deps: &CoordinatorDeps,
    refs: &[NameVariant],
) -> Result<()> {
    for nv in refs {
        await_ready(deps, &nv.id(ResourceType::SourceVariant)).await?;
    }
    Ok(())
}

/// Resolve each reference to its materialized table, in declaration
/// order. The map keys are the template keys (`name.variant`).
async fn map_name_variants_to_tables(
    deps: &CoordinatorDeps,
    refs: &[NameVariant],
) -> Result<(HashMap<String, String>, Vec<SourceMapping>)> {
    let mut source_map = HashMap::new();
    let mut source_mapping = Vec::with_capacity(refs.len());
    for nv in refs {
        let source = deps.metadata.get_source_variant(nv).await?;
        let table = source_table_name(&source);
        let key = format!("{}.{}", nv.name, nv.variant);
        source_map.insert(key.clone(), table.clone());
        source_mapping.push(SourceMapping { source: key, table });
    }
    Ok((source_map, source_mapping))
}

/// Common tail for transformations: run the runner, tolerate a flaky
/// metadata server on the ready write, and install the update schedule
/// when one is declared.
pub(crate) async fn run_transformation_job(
    deps: &CoordinatorDeps,
    id: &ResourceId,
    transformation_config: TransformationConfig,
    provider: &ProviderDef,
    schedule: &str,
) -> Result<()> {
    let config = CreateTransformationConfig {
        offline_type: provider.provider_type,
        offline_config: provider.serialized_config.clone(),
        transformation_config,
        is_update: false,
    };
    let payload = serde_json::to_vec(&config)?;
    let runner = deps
        .runners
        .create(RunnerName::CreateTransformation, &payload)?;
    let watcher = runner.run().await?;
    watcher.wait().await?;

    let metadata = deps.metadata.clone();
    let ready_id = id.clone();
    retry_with_delays(
        "set transformation ready",
        READY_WRITE_ATTEMPTS,
        READY_WRITE_DELAY,
        move || {
            let metadata = metadata.clone();
            let id = ready_id.clone();
            async move { metadata.set_status(&id, Status::Ready, None).await }
        },
    )
    .await?;
    info!(resource = %id, "transformation ready");

    if !schedule.is_empty() {
        let update = CreateTransformationConfig {
            is_update: true,
            ..config
        };
        install_update_schedule(
            deps,
            RunnerName::CreateTransformation,
            &serde_json::to_vec(&update)?,
            schedule,
        )
        .await?;
    }
    Ok(())
}
