//! Training set builds.
//!
//! Awaits every constituent - each feature's source and the feature
//! itself, then the label's source and the label - before handing the
//! join to the `CREATE_TRAINING_SET` runner. Lag features ride through
//! the def untouched; the offline store owns the lag join semantics.

use tracing::info;

use crate::common::error::Result;
use crate::common::resource::{ResourceId, ResourceType};
use crate::domains::{await_ready, install_update_schedule, set_pending};
use crate::kernel::deps::CoordinatorDeps;
use crate::kernel::metadata::resources::Status;
use crate::kernel::runners::{RunnerName, TrainingSetDef, TrainingSetRunnerConfig};

pub async fn run_training_set_job(
    deps: &CoordinatorDeps,
    id: &ResourceId,
    schedule: &str,
) -> Result<()> {
    let training_set = deps
        .metadata
        .get_training_set_variant(&id.name_variant())
        .await?;
    set_pending(deps, id).await?;

    let provider = deps.metadata.fetch_provider(&training_set.provider).await?;
    let offline = deps
        .catalog
        .offline_store(provider.provider_type, &provider.serialized_config)
        .await?;

    // A replayed job may find the artifact already built; that is
    // success, not an error.
    let already_built = offline.get_training_set(id).await.is_ok();
    offline.close().await?;
    if already_built {
        info!(resource = %id, "training set already exists");
        return deps.metadata.set_status(id, Status::Ready, None).await;
    }

    for feature_nv in &training_set.features {
        let feature = deps.metadata.get_feature_variant(feature_nv).await?;
        if !feature.is_on_demand() {
            await_ready(deps, &feature.source.id(ResourceType::SourceVariant)).await?;
        }
        await_ready(deps, &feature_nv.id(ResourceType::FeatureVariant)).await?;
    }
    let label = deps.metadata.get_label_variant(&training_set.label).await?;
    await_ready(deps, &label.source.id(ResourceType::SourceVariant)).await?;
    await_ready(
        deps,
        &training_set.label.id(ResourceType::LabelVariant),
    )
    .await?;

    let def = TrainingSetDef {
        id: id.clone(),
        label: training_set.label.clone(),
        features: training_set.features.clone(),
        lag_features: training_set.lag_features.clone(),
    };
    let config = TrainingSetRunnerConfig {
        offline_type: provider.provider_type,
        offline_config: provider.serialized_config.clone(),
        def,
        is_update: false,
    };
    let runner = deps
        .runners
        .create(RunnerName::CreateTrainingSet, &serde_json::to_vec(&config)?)?;
    let watcher = runner.run().await?;
    watcher.wait().await?;
    info!(resource = %id, "training set built");

    deps.metadata.set_status(id, Status::Ready, None).await?;

    if !schedule.is_empty() {
        let update = TrainingSetRunnerConfig {
            is_update: true,
            ..config
        };
        install_update_schedule(
            deps,
            RunnerName::CreateTrainingSet,
            &serde_json::to_vec(&update)?,
            schedule,
        )
        .await?;
    }
    Ok(())
}
