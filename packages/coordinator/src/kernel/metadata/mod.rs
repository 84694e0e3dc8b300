//! The typed resource graph and its facade.
//!
//! - [`resources`] - Variant definitions, statuses, tags, parents
//! - [`equivalence`] - Re-create comparison and merge rules
//! - [`graph`] - The in-memory graph with propagation
//! - [`client`] - The `MetadataServer` facade and in-process impl

pub mod client;
pub mod equivalence;
pub mod graph;
pub mod resources;

pub use client::{InProcessMetadata, MetadataServer};
pub use graph::{CreateOutcome, ResourceGraph};
pub use resources::{
    Entity, FeatureLocation, FeatureVariant, FileType, KubernetesArgs, LabelVariant, LagFeature,
    Model, PrimaryData, Properties, ResourceColumns, ResourceParent, ResourceStatus,
    SnowflakeDynamicTableConfig, SourceDefinition, SourceVariant, Status, Tags,
    TrainingSetVariant, Transformation, User,
};
