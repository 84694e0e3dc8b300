//! Typed definitions for the resource graph.
//!
//! A non-variant parent owns an ordered set of variant names plus a
//! default; each variant carries its own definition, owner, provider
//! pointer, status, schedule, tags, properties, and timestamps. Variants
//! are immutable once `READY`; re-creation goes through the equivalence
//! rules in [`super::equivalence`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use typed_builder::TypedBuilder;

use crate::common::error::{Error, Result};
use crate::common::resource::NameVariant;
use crate::common::types::ValueType;

// ============================================================================
// Status
// ============================================================================

/// Lifecycle of every variant and provider:
/// `NO_STATUS -> CREATED -> PENDING -> {READY | FAILED}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    #[default]
    NoStatus,
    Created,
    Pending,
    Ready,
    Failed,
}

impl Status {
    /// Terminal for the job; update jobs may still re-run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Ready | Status::Failed)
    }
}

/// Status plus the error string recorded on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ResourceStatus {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ResourceStatus {
    pub fn ready() -> Self {
        Self {
            status: Status::Ready,
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Status::Failed,
            error_message: Some(message.into()),
        }
    }
}

// ============================================================================
// Tags & properties
// ============================================================================

/// Ordered, deduplicated tag set. Merging is a union that preserves the
/// existing order and appends unseen tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Tags(pub Vec<String>);

impl Tags {
    pub fn merge(&mut self, other: &Tags) {
        for tag in &other.0 {
            if !self.0.contains(tag) {
                self.0.push(tag.clone());
            }
        }
    }
}

impl<S: Into<String>> FromIterator<S> for Tags {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut tags = Tags::default();
        for tag in iter {
            let tag = tag.into();
            if !tags.0.contains(&tag) {
                tags.0.push(tag);
            }
        }
        tags
    }
}

/// String properties. Merging is last-wins per key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Properties(pub BTreeMap<String, String>);

impl Properties {
    pub fn merge(&mut self, other: &Properties) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }
}

// ============================================================================
// Source definitions
// ============================================================================

/// File formats accepted for file-backed primary tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Csv,
    Parquet,
}

impl FileType {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(FileType::Csv),
            "parquet" => Ok(FileType::Parquet),
            other => Err(Error::InvalidFileType(other.to_string())),
        }
    }
}

/// Where a primary table's rows come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrimaryData {
    /// An existing table in the offline store.
    SqlTable { name: String },
    /// A file (or file prefix) in the store's backing filesystem.
    File { path: String, file_type: FileType },
}

/// Container resource requests for transformations that run on Kubernetes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
pub struct KubernetesArgs {
    pub docker_image: String,
    pub cpu_request: Option<String>,
    pub cpu_limit: Option<String>,
    pub memory_request: Option<String>,
    pub memory_limit: Option<String>,
}

/// A derived table definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transformation {
    /// SQL text with `{{ name.variant }}` placeholders; `sources` lists the
    /// referenced variants in declaration order.
    Sql {
        query: String,
        sources: Vec<NameVariant>,
    },
    /// Opaque dataframe code; inputs are positional.
    Dataframe {
        query: String,
        inputs: Vec<NameVariant>,
        args: Option<KubernetesArgs>,
    },
}

impl Transformation {
    /// The referenced source variants, in declaration order.
    pub fn dependencies(&self) -> &[NameVariant] {
        match self {
            Transformation::Sql { sources, .. } => sources,
            Transformation::Dataframe { inputs, .. } => inputs,
        }
    }
}

/// A source variant is either a registered primary table or a
/// transformation over other sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceDefinition {
    Primary(PrimaryData),
    Transformation(Transformation),
}

impl SourceDefinition {
    pub fn is_transformation(&self) -> bool {
        matches!(self, SourceDefinition::Transformation(_))
    }
}

// ============================================================================
// Variants
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct SourceVariant {
    pub name: String,
    pub variant: String,
    pub definition: SourceDefinition,
    pub owner: String,
    pub provider: String,
    #[builder(default)]
    pub schedule: String,
    #[builder(default)]
    pub tags: Tags,
    #[builder(default)]
    pub properties: Properties,
    #[builder(default)]
    pub status: ResourceStatus,
    #[builder(default = Utc::now())]
    pub created: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub last_updated: DateTime<Utc>,
    /// Reverse references, append-only and deduplicated.
    #[builder(default)]
    pub trainingsets: Vec<NameVariant>,
    #[builder(default)]
    pub features: Vec<NameVariant>,
    #[builder(default)]
    pub labels: Vec<NameVariant>,
}

impl SourceVariant {
    pub fn name_variant(&self) -> NameVariant {
        NameVariant::new(&self.name, &self.variant)
    }
}

/// Column bindings for a precomputed feature or a label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
pub struct ResourceColumns {
    pub entity: String,
    pub value: String,
    /// Timestamp column; empty for unordered resources.
    pub ts: String,
}

/// Where a feature's values come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureLocation {
    /// Precomputed from source columns.
    Columns(ResourceColumns),
    /// Computed at request time from serialized client code; on-demand
    /// features have no source, entity, or provider edges.
    OnDemand { function: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct FeatureVariant {
    pub name: String,
    pub variant: String,
    pub source: NameVariant,
    pub entity: String,
    pub owner: String,
    /// Online (inference) store; absent for offline-only features.
    #[builder(default)]
    pub provider: Option<String>,
    pub value_type: ValueType,
    pub location: FeatureLocation,
    #[builder(default)]
    pub schedule: String,
    #[builder(default)]
    pub tags: Tags,
    #[builder(default)]
    pub properties: Properties,
    #[builder(default)]
    pub status: ResourceStatus,
    #[builder(default = Utc::now())]
    pub created: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub last_updated: DateTime<Utc>,
    #[builder(default)]
    pub trainingsets: Vec<NameVariant>,
}

impl FeatureVariant {
    pub fn name_variant(&self) -> NameVariant {
        NameVariant::new(&self.name, &self.variant)
    }

    pub fn is_on_demand(&self) -> bool {
        matches!(self.location, FeatureLocation::OnDemand { .. })
    }
}

/// Snowflake-specific table options carried by labels and features
/// registered against a Snowflake provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
pub struct SnowflakeDynamicTableConfig {
    pub warehouse: String,
    pub target_lag: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct LabelVariant {
    pub name: String,
    pub variant: String,
    pub source: NameVariant,
    pub entity: String,
    pub owner: String,
    pub provider: String,
    pub value_type: ValueType,
    pub columns: ResourceColumns,
    #[builder(default)]
    pub snowflake_config: Option<SnowflakeDynamicTableConfig>,
    #[builder(default)]
    pub tags: Tags,
    #[builder(default)]
    pub properties: Properties,
    #[builder(default)]
    pub status: ResourceStatus,
    #[builder(default = Utc::now())]
    pub created: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub last_updated: DateTime<Utc>,
    #[builder(default)]
    pub trainingsets: Vec<NameVariant>,
}

impl LabelVariant {
    pub fn name_variant(&self) -> NameVariant {
        NameVariant::new(&self.name, &self.variant)
    }
}

/// A feature joined at an offset from the observation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LagFeature {
    pub name: String,
    pub variant: String,
    pub lag_name: String,
    pub lag_delta: std::time::Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct TrainingSetVariant {
    pub name: String,
    pub variant: String,
    pub owner: String,
    pub provider: String,
    pub label: NameVariant,
    pub features: Vec<NameVariant>,
    #[builder(default)]
    pub lag_features: Vec<LagFeature>,
    #[builder(default)]
    pub schedule: String,
    #[builder(default)]
    pub tags: Tags,
    #[builder(default)]
    pub properties: Properties,
    #[builder(default)]
    pub status: ResourceStatus,
    #[builder(default = Utc::now())]
    pub created: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub last_updated: DateTime<Utc>,
}

impl TrainingSetVariant {
    pub fn name_variant(&self) -> NameVariant {
        NameVariant::new(&self.name, &self.variant)
    }
}

// ============================================================================
// Parents and first-class nodes
// ============================================================================

/// A non-variant parent: ordered variant names plus the default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ResourceParent {
    pub name: String,
    pub default_variant: String,
    pub variants: Vec<String>,
}

impl ResourceParent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Record a variant, making it the default. Variant order is creation
    /// order, deduplicated.
    pub fn add_variant(&mut self, variant: &str) {
        if !self.variants.iter().any(|v| v == variant) {
            self.variants.push(variant.to_string());
        }
        self.default_variant = variant.to_string();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Entity {
    pub name: String,
    pub description: String,
    pub features: Vec<NameVariant>,
    pub labels: Vec<NameVariant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct User {
    pub name: String,
    pub features: Vec<NameVariant>,
    pub labels: Vec<NameVariant>,
    pub sources: Vec<NameVariant>,
    pub trainingsets: Vec<NameVariant>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Model {
    pub name: String,
    pub features: Vec<NameVariant>,
    pub labels: Vec<NameVariant>,
    pub trainingsets: Vec<NameVariant>,
}

/// Append a reverse reference, preserving the append-only dedup rule.
pub fn append_ref(list: &mut Vec<NameVariant>, nv: NameVariant) {
    if !list.contains(&nv) {
        list.push(nv);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_merge_is_union_in_order() {
        let mut a: Tags = ["one", "two"].into_iter().collect();
        let b: Tags = ["two", "three"].into_iter().collect();
        a.merge(&b);
        assert_eq!(a.0, vec!["one", "two", "three"]);
    }

    #[test]
    fn properties_merge_is_last_wins() {
        let mut a = Properties(
            [("k".to_string(), "old".to_string())]
                .into_iter()
                .collect(),
        );
        let b = Properties(
            [
                ("k".to_string(), "new".to_string()),
                ("extra".to_string(), "1".to_string()),
            ]
            .into_iter()
            .collect(),
        );
        a.merge(&b);
        assert_eq!(a.0.get("k").unwrap(), "new");
        assert_eq!(a.0.get("extra").unwrap(), "1");
    }

    #[test]
    fn parent_tracks_variants_and_default() {
        let mut parent = ResourceParent::new("txns");
        parent.add_variant("v1");
        parent.add_variant("v2");
        parent.add_variant("v1");
        assert_eq!(parent.variants, vec!["v1", "v2"]);
        assert_eq!(parent.default_variant, "v1");
    }

    #[test]
    fn append_ref_deduplicates() {
        let mut refs = Vec::new();
        append_ref(&mut refs, NameVariant::new("ts", "v1"));
        append_ref(&mut refs, NameVariant::new("ts", "v1"));
        append_ref(&mut refs, NameVariant::new("ts", "v2"));
        assert_eq!(refs.len(), 2);
    }

    #[test]
    fn file_type_parsing() {
        assert_eq!(FileType::parse("CSV").unwrap(), FileType::Csv);
        assert_eq!(FileType::parse("parquet").unwrap(), FileType::Parquet);
        assert!(matches!(
            FileType::parse("avro").unwrap_err(),
            Error::InvalidFileType(_)
        ));
    }

    #[test]
    fn status_terminality() {
        assert!(Status::Ready.is_terminal());
        assert!(Status::Failed.is_terminal());
        assert!(!Status::Pending.is_terminal());
    }
}
