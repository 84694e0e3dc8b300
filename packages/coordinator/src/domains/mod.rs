//! Per-resource-type job pipelines.
//!
//! The coordinator dispatches here by the job's resource type; everything
//! domain-specific (what "register a source" means, how a feature gets
//! materialized) lives in these modules, never in the kernel.

pub mod features;
pub mod labels;
pub mod sources;
pub mod training_sets;

use tracing::info;

use crate::common::error::{Error, Result};
use crate::common::resource::{NameVariant, ResourceId, ResourceType};
use crate::kernel::coordinator::jobs::JobRecord;
use crate::kernel::deps::CoordinatorDeps;
use crate::kernel::metadata::resources::{PrimaryData, SourceDefinition, SourceVariant, Status};
use crate::kernel::runners::RunnerName;
use crate::kernel::stores::{resource_to_table_name, ResourceTableKind};

/// Dispatch a job to its handler.
pub async fn handle(deps: &CoordinatorDeps, job: &JobRecord) -> Result<()> {
    let id = &job.resource;
    match id.resource_type {
        ResourceType::SourceVariant => {
            sources::run_register_source_job(deps, id, &job.schedule).await
        }
        ResourceType::LabelVariant => {
            if deps.metadata.staged_for_deletion(id).await? {
                labels::run_delete_label_job(deps, id).await
            } else {
                labels::run_register_label_job(deps, id).await
            }
        }
        ResourceType::FeatureVariant => {
            features::run_materialize_job(deps, id, &job.schedule).await
        }
        ResourceType::TrainingSetVariant => {
            training_sets::run_training_set_job(deps, id, &job.schedule).await
        }
        other => Err(Error::InvalidResourceType(other.to_string())),
    }
}

/// Common handler preamble: refuse terminal states, then mark `PENDING`.
pub(crate) async fn set_pending(deps: &CoordinatorDeps, id: &ResourceId) -> Result<()> {
    let current = deps.metadata.get_status(id).await?;
    match current.status {
        Status::Ready => Err(Error::ResourceAlreadyComplete(id.clone())),
        Status::Failed => Err(Error::ResourceAlreadyFailed(id.clone())),
        _ => {
            deps.metadata
                .set_status(id, Status::Pending, None)
                .await
        }
    }
}

/// Poll a dependency until it is `READY`. A `FAILED` dependency aborts
/// with `ResourceFailed`; anything else keeps waiting. There is no upper
/// bound here - the job's attempt counter is the effective deadline.
pub(crate) async fn await_ready(deps: &CoordinatorDeps, id: &ResourceId) -> Result<()> {
    loop {
        let status = deps.metadata.get_status(id).await?;
        match status.status {
            Status::Ready => return Ok(()),
            Status::Failed => return Err(Error::ResourceFailed(id.clone())),
            _ => tokio::time::sleep(deps.config.dependency_poll_interval).await,
        }
    }
}

/// Wait for a source variant to be `READY` and fetch it.
pub(crate) async fn await_ready_source(
    deps: &CoordinatorDeps,
    nv: &NameVariant,
) -> Result<SourceVariant> {
    await_ready(deps, &nv.id(ResourceType::SourceVariant)).await?;
    deps.metadata.get_source_variant(nv).await
}

/// The physical table behind a source variant: the canonical
/// transformation table for transformations, the user's own table (or
/// file path) for primaries.
pub(crate) fn source_table_name(source: &SourceVariant) -> String {
    match &source.definition {
        SourceDefinition::Primary(PrimaryData::SqlTable { name }) => name.clone(),
        SourceDefinition::Primary(PrimaryData::File { path, .. }) => path.clone(),
        SourceDefinition::Transformation(_) => resource_to_table_name(
            ResourceTableKind::Transformation,
            &source.name,
            &source.variant,
        ),
    }
}

/// Build an update runner from `payload` and install it on `schedule`.
/// The runner must be cron-capable.
pub(crate) async fn install_update_schedule(
    deps: &CoordinatorDeps,
    runner_name: RunnerName,
    payload: &[u8],
    schedule: &str,
) -> Result<()> {
    let runner = deps.runners.create(runner_name, payload)?;
    let cron = runner.as_cron().ok_or_else(|| {
        Error::internal(format!("runner {runner_name} does not support schedules"))
    })?;
    cron.schedule_job(schedule).await?;
    deps.retain_scheduled(runner.clone());
    info!(runner = %runner_name, schedule, "installed update schedule");
    Ok(())
}
