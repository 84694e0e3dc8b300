//! Serialized runner configurations.
//!
//! These are the wire formats handed to runners: in-process runners parse
//! them from bytes, and the Kubernetes runner ships them to the worker
//! container through the `CONFIG` env var. Field names are part of the
//! contract; keep the serde renames stable.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::resource::{NameVariant, ResourceId};
use crate::common::types::ValueType;
use crate::kernel::metadata::resources::{KubernetesArgs, LagFeature};
use crate::kernel::providers::ProviderType;

/// Registered runner names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunnerName {
    #[serde(rename = "MATERIALIZE")]
    Materialize,
    #[serde(rename = "CREATE_TRAINING_SET")]
    CreateTrainingSet,
    #[serde(rename = "CREATE_TRANSFORMATION")]
    CreateTransformation,
    #[serde(rename = "COPY_TO_ONLINE")]
    CopyToOnline,
    #[serde(rename = "S3_IMPORT_DYNAMODB")]
    S3ImportDynamodb,
}

impl RunnerName {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerName::Materialize => "MATERIALIZE",
            RunnerName::CreateTrainingSet => "CREATE_TRAINING_SET",
            RunnerName::CreateTransformation => "CREATE_TRANSFORMATION",
            RunnerName::CopyToOnline => "COPY_TO_ONLINE",
            RunnerName::S3ImportDynamodb => "S3_IMPORT_DYNAMODB",
        }
    }
}

impl fmt::Display for RunnerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunnerName {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "MATERIALIZE" => Ok(RunnerName::Materialize),
            "CREATE_TRAINING_SET" => Ok(RunnerName::CreateTrainingSet),
            "CREATE_TRANSFORMATION" => Ok(RunnerName::CreateTransformation),
            "COPY_TO_ONLINE" => Ok(RunnerName::CopyToOnline),
            "S3_IMPORT_DYNAMODB" => Ok(RunnerName::S3ImportDynamodb),
            other => Err(format!("unknown runner name {other}")),
        }
    }
}

/// SQL versus dataframe transformations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransformationKind {
    #[serde(rename = "SQL")]
    Sql,
    #[serde(rename = "DF")]
    Dataframe,
}

/// One resolved source reference, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SourceMapping {
    /// The template key, `name.variant`.
    pub source: String,
    /// The materialized table backing it.
    pub table: String,
}

/// What the transformation worker executes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransformationConfig {
    #[serde(rename = "Type")]
    pub kind: TransformationKind,
    pub target: ResourceId,
    /// Fully substituted SQL, or opaque dataframe code.
    pub query: String,
    pub source_mapping: Vec<SourceMapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<KubernetesArgs>,
}

/// Runner config for `CREATE_TRANSFORMATION`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateTransformationConfig {
    pub offline_type: ProviderType,
    pub offline_config: Value,
    pub transformation_config: TransformationConfig,
    pub is_update: bool,
}

/// Which cloud the materialization writes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloudProvider {
    #[default]
    Local,
    Aws,
}

/// Runner config for `MATERIALIZE`, `COPY_TO_ONLINE`, and
/// `S3_IMPORT_DYNAMODB`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MaterializedRunnerConfig {
    pub offline_type: ProviderType,
    pub offline_config: Value,
    /// `NONE` when the feature has no online store.
    pub online_type: ProviderType,
    pub online_config: Value,
    #[serde(rename = "ResourceID")]
    pub resource_id: ResourceId,
    #[serde(rename = "VType")]
    pub vtype: ValueType,
    pub cloud: CloudProvider,
    pub is_update: bool,
}

/// The training set to build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TrainingSetDef {
    #[serde(rename = "ID")]
    pub id: ResourceId,
    pub label: NameVariant,
    pub features: Vec<NameVariant>,
    pub lag_features: Vec<LagFeature>,
}

/// Runner config for `CREATE_TRAINING_SET`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TrainingSetRunnerConfig {
    pub offline_type: ProviderType,
    pub offline_config: Value,
    pub def: TrainingSetDef,
    pub is_update: bool,
}
