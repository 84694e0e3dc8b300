//! Feature materialization.
//!
//! Registers the feature's resource table against its source, then takes
//! one of three paths: install a cron-driven update job, run the S3 to
//! DynamoDB bulk import, or run the default materialization.

use serde_json::Value;
use tracing::info;

use crate::common::error::{Error, Result};
use crate::common::resource::ResourceId;
use crate::domains::{await_ready_source, install_update_schedule, set_pending, source_table_name};
use crate::kernel::deps::CoordinatorDeps;
use crate::kernel::metadata::resources::{FeatureLocation, FeatureVariant, Status};
use crate::kernel::providers::{ProviderDef, ProviderType};
use crate::kernel::runners::{CloudProvider, MaterializedRunnerConfig, RunnerName};
use crate::kernel::stores::{OfflineStore, ResourceSchema};

pub async fn run_materialize_job(
    deps: &CoordinatorDeps,
    id: &ResourceId,
    schedule: &str,
) -> Result<()> {
    let feature = deps.metadata.get_feature_variant(&id.name_variant()).await?;
    set_pending(deps, id).await?;

    // On-demand features have nothing to materialize; they are computed
    // at request time.
    if feature.is_on_demand() {
        return deps.metadata.set_status(id, Status::Ready, None).await;
    }

    let source = await_ready_source(deps, &feature.source).await?;
    let offline_provider = deps.metadata.fetch_provider(&source.provider).await?;
    let offline = deps
        .catalog
        .offline_store(
            offline_provider.provider_type,
            &offline_provider.serialized_config,
        )
        .await?;
    let registered = register_feature_table(
        id,
        &feature,
        source_table_name(&source),
        offline.as_ref(),
    )
    .await;
    offline.close().await?;
    registered?;

    let online_provider = match &feature.provider {
        Some(name) => Some(deps.metadata.fetch_provider(name).await?),
        None => None,
    };
    let config = MaterializedRunnerConfig {
        offline_type: offline_provider.provider_type,
        offline_config: offline_provider.serialized_config.clone(),
        online_type: online_provider
            .as_ref()
            .map(|p| p.provider_type)
            .unwrap_or(ProviderType::None),
        online_config: online_provider
            .as_ref()
            .map(|p| p.serialized_config.clone())
            .unwrap_or(Value::Null),
        resource_id: id.clone(),
        vtype: feature.value_type,
        cloud: CloudProvider::Local,
        is_update: false,
    };

    // Scheduled updates install the cron and report ready immediately;
    // each later firing emits an update event.
    if !schedule.is_empty() {
        let update = MaterializedRunnerConfig {
            is_update: true,
            ..config
        };
        install_update_schedule(
            deps,
            RunnerName::Materialize,
            &serde_json::to_vec(&update)?,
            schedule,
        )
        .await?;
        return deps.metadata.set_status(id, Status::Ready, None).await;
    }

    let runner_name = materialize_runner_name(&offline_provider, online_provider.as_ref())?;
    let runner = deps
        .runners
        .create(runner_name, &serde_json::to_vec(&config)?)?;
    let watcher = runner.run().await?;
    watcher.wait().await?;
    info!(resource = %id, runner = %runner_name, "feature materialized");

    deps.metadata.set_status(id, Status::Ready, None).await
}

async fn register_feature_table(
    id: &ResourceId,
    feature: &FeatureVariant,
    source_table: String,
    offline: &dyn OfflineStore,
) -> Result<()> {
    let FeatureLocation::Columns(columns) = &feature.location else {
        return Err(Error::internal("on-demand feature reached registration"));
    };
    let schema = ResourceSchema {
        entity: columns.entity.clone(),
        value: columns.value.clone(),
        ts: columns.ts.clone(),
        source_table,
    };
    offline
        .register_resource_from_source_table(id, schema, feature.value_type, &[])
        .await?;
    info!(resource = %id, "registered feature resource table");
    Ok(())
}

/// Pick the materialization path. The S3 import fires only for DynamoDB
/// online stores that ask for it, and demands a Spark offline store over
/// S3; asking for it without that pairing is an invalid argument.
fn materialize_runner_name(
    offline: &ProviderDef,
    online: Option<&ProviderDef>,
) -> Result<RunnerName> {
    let wants_import = online
        .map(|p| p.provider_type == ProviderType::Dynamodb && p.config_flag("ImportFromS3"))
        .unwrap_or(false);
    if !wants_import {
        return Ok(RunnerName::Materialize);
    }

    let offline_is_spark_s3 = offline.provider_type == ProviderType::Spark
        && offline
            .config_field("StoreType")
            .and_then(|v| v.as_str())
            .map(|s| s.eq_ignore_ascii_case("S3"))
            .unwrap_or(false);
    if !offline_is_spark_s3 {
        return Err(Error::invalid_argument(
            "S3 import to DynamoDB requires a Spark offline store over S3",
        ));
    }
    Ok(RunnerName::S3ImportDynamodb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spark_s3() -> ProviderDef {
        ProviderDef::new(
            "spark-1",
            ProviderType::Spark,
            json!({"StoreType": "S3", "Bucket": "features"}),
        )
    }

    fn dynamo(import: bool) -> ProviderDef {
        ProviderDef::new(
            "dynamo-1",
            ProviderType::Dynamodb,
            json!({"Region": "us-east-1", "ImportFromS3": import}),
        )
    }

    #[test]
    fn default_path_without_online_store() {
        let name = materialize_runner_name(&spark_s3(), None).unwrap();
        assert_eq!(name, RunnerName::Materialize);
    }

    #[test]
    fn import_path_for_dynamo_over_spark_s3() {
        let name = materialize_runner_name(&spark_s3(), Some(&dynamo(true))).unwrap();
        assert_eq!(name, RunnerName::S3ImportDynamodb);
    }

    #[test]
    fn dynamo_without_import_uses_default() {
        let name = materialize_runner_name(&spark_s3(), Some(&dynamo(false))).unwrap();
        assert_eq!(name, RunnerName::Materialize);
    }

    #[test]
    fn import_without_spark_s3_is_invalid() {
        let postgres = ProviderDef::new("pg", ProviderType::Postgres, json!({"Host": "db"}));
        let err = materialize_runner_name(&postgres, Some(&dynamo(true))).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
