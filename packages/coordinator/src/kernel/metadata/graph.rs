//! The in-memory resource graph.
//!
//! Owns creation semantics: naming rules, the equivalence/merge decision on
//! re-creates, default-variant maintenance on parents, and the
//! reverse-reference propagation walk. The in-process metadata server is a
//! thin async shell over this; the graph itself is synchronous and holds no
//! locks.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Utc;
use tracing::debug;

use crate::common::error::{Error, Result};
use crate::common::resource::{validate_name, NameVariant, ResourceId, ResourceType};
use crate::kernel::metadata::equivalence;
use crate::kernel::metadata::resources::{
    append_ref, Entity, FeatureVariant, LabelVariant, Model, ResourceParent, ResourceStatus,
    SourceVariant, Status, TrainingSetVariant, User,
};
use crate::kernel::providers::ProviderDef;

/// What a create call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// A new variant was inserted; a job should be scheduled for it.
    Created,
    /// An existing variant absorbed the create (tags union, properties
    /// last-wins); no new job.
    Merged,
}

/// Nodes reachable by the propagation walk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Node {
    Source(NameVariant),
    Feature(NameVariant),
    Label(NameVariant),
    TrainingSet(NameVariant),
    Entity(String),
    User(String),
    Provider(String),
}

#[derive(Default)]
pub struct ResourceGraph {
    source_parents: HashMap<String, ResourceParent>,
    feature_parents: HashMap<String, ResourceParent>,
    label_parents: HashMap<String, ResourceParent>,
    training_set_parents: HashMap<String, ResourceParent>,

    sources: HashMap<NameVariant, SourceVariant>,
    features: HashMap<NameVariant, FeatureVariant>,
    labels: HashMap<NameVariant, LabelVariant>,
    training_sets: HashMap<NameVariant, TrainingSetVariant>,

    providers: HashMap<String, ProviderDef>,
    entities: HashMap<String, Entity>,
    users: HashMap<String, User>,
    models: HashMap<String, Model>,

    staged_deletions: HashSet<ResourceId>,
}

impl ResourceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // First-class nodes
    // ------------------------------------------------------------------

    /// Register a provider, or apply an update to an existing one subject
    /// to the mutability policy.
    pub fn upsert_provider(&mut self, mut def: ProviderDef) -> Result<()> {
        validate_name(&def.name)?;
        if let Some(existing) = self.providers.get(&def.name) {
            existing.check_update(&def)?;
        }
        if def.status.status == Status::NoStatus {
            def.status.status = Status::Created;
        }
        self.providers.insert(def.name.clone(), def);
        Ok(())
    }

    pub fn upsert_entity(&mut self, name: &str, description: &str) -> Result<()> {
        validate_name(name)?;
        self.entities
            .entry(name.to_string())
            .or_insert_with(|| Entity {
                name: name.to_string(),
                ..Default::default()
            })
            .description = description.to_string();
        Ok(())
    }

    pub fn upsert_user(&mut self, name: &str) -> Result<()> {
        validate_name(name)?;
        self.users.entry(name.to_string()).or_insert_with(|| User {
            name: name.to_string(),
            ..Default::default()
        });
        Ok(())
    }

    pub fn upsert_model(&mut self, model: Model) -> Result<()> {
        validate_name(&model.name)?;
        let name = model.name.clone();
        let entry = self.models.entry(name).or_insert_with(|| Model {
            name: model.name.clone(),
            ..Default::default()
        });
        for nv in model.features {
            append_ref(&mut entry.features, nv);
        }
        for nv in model.labels {
            append_ref(&mut entry.labels, nv);
        }
        for nv in model.trainingsets {
            append_ref(&mut entry.trainingsets, nv);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Variant creation
    // ------------------------------------------------------------------

    pub fn create_source_variant(&mut self, incoming: SourceVariant) -> Result<CreateOutcome> {
        let nv = incoming.name_variant();
        self.check_variant_names(&nv)?;
        self.require_user(&incoming.owner)?;
        self.require_provider(&incoming.provider)?;

        if let Some(existing) = self.sources.get_mut(&nv) {
            return merge_or_reject(
                ResourceId::new(&nv.name, &nv.variant, ResourceType::SourceVariant),
                existing.status.status,
                equivalence::source_variant(existing, &incoming),
            )
            .map(|outcome| {
                existing.tags.merge(&incoming.tags);
                existing.properties.merge(&incoming.properties);
                existing.last_updated = Utc::now();
                outcome
            });
        }

        let mut created = incoming;
        created.status = ResourceStatus {
            status: Status::Created,
            error_message: None,
        };
        self.sources.insert(nv.clone(), created);
        self.source_parents
            .entry(nv.name.clone())
            .or_insert_with(|| ResourceParent::new(&nv.name))
            .add_variant(&nv.variant);
        self.propagate(Node::Source(nv));
        Ok(CreateOutcome::Created)
    }

    pub fn create_feature_variant(&mut self, incoming: FeatureVariant) -> Result<CreateOutcome> {
        let nv = incoming.name_variant();
        self.check_variant_names(&nv)?;
        self.require_user(&incoming.owner)?;
        if !incoming.is_on_demand() {
            self.require_source(&incoming.source)?;
            self.require_entity(&incoming.entity)?;
            if let Some(provider) = &incoming.provider {
                self.require_provider(provider)?;
            }
        }

        if let Some(existing) = self.features.get_mut(&nv) {
            return merge_or_reject(
                ResourceId::new(&nv.name, &nv.variant, ResourceType::FeatureVariant),
                existing.status.status,
                equivalence::feature_variant(existing, &incoming),
            )
            .map(|outcome| {
                existing.tags.merge(&incoming.tags);
                existing.properties.merge(&incoming.properties);
                existing.last_updated = Utc::now();
                outcome
            });
        }

        let mut created = incoming;
        created.status = ResourceStatus {
            status: Status::Created,
            error_message: None,
        };
        self.features.insert(nv.clone(), created);
        self.feature_parents
            .entry(nv.name.clone())
            .or_insert_with(|| ResourceParent::new(&nv.name))
            .add_variant(&nv.variant);
        self.propagate(Node::Feature(nv));
        Ok(CreateOutcome::Created)
    }

    pub fn create_label_variant(&mut self, incoming: LabelVariant) -> Result<CreateOutcome> {
        let nv = incoming.name_variant();
        self.check_variant_names(&nv)?;
        self.require_user(&incoming.owner)?;
        self.require_source(&incoming.source)?;
        self.require_entity(&incoming.entity)?;
        self.require_provider(&incoming.provider)?;

        if let Some(existing) = self.labels.get_mut(&nv) {
            return merge_or_reject(
                ResourceId::new(&nv.name, &nv.variant, ResourceType::LabelVariant),
                existing.status.status,
                equivalence::label_variant(existing, &incoming),
            )
            .map(|outcome| {
                existing.tags.merge(&incoming.tags);
                existing.properties.merge(&incoming.properties);
                existing.last_updated = Utc::now();
                outcome
            });
        }

        let mut created = incoming;
        created.status = ResourceStatus {
            status: Status::Created,
            error_message: None,
        };
        self.labels.insert(nv.clone(), created);
        self.label_parents
            .entry(nv.name.clone())
            .or_insert_with(|| ResourceParent::new(&nv.name))
            .add_variant(&nv.variant);
        self.propagate(Node::Label(nv));
        Ok(CreateOutcome::Created)
    }

    pub fn create_training_set_variant(
        &mut self,
        incoming: TrainingSetVariant,
    ) -> Result<CreateOutcome> {
        let nv = incoming.name_variant();
        self.check_variant_names(&nv)?;
        self.require_user(&incoming.owner)?;
        self.require_provider(&incoming.provider)?;
        self.require_label(&incoming.label)?;
        for feature in &incoming.features {
            self.require_feature(feature)?;
        }

        if let Some(existing) = self.training_sets.get_mut(&nv) {
            return merge_or_reject(
                ResourceId::new(&nv.name, &nv.variant, ResourceType::TrainingSetVariant),
                existing.status.status,
                equivalence::training_set_variant(existing, &incoming),
            )
            .map(|outcome| {
                existing.tags.merge(&incoming.tags);
                existing.properties.merge(&incoming.properties);
                existing.last_updated = Utc::now();
                outcome
            });
        }

        let mut created = incoming;
        created.status = ResourceStatus {
            status: Status::Created,
            error_message: None,
        };
        self.training_sets.insert(nv.clone(), created);
        self.training_set_parents
            .entry(nv.name.clone())
            .or_insert_with(|| ResourceParent::new(&nv.name))
            .add_variant(&nv.variant);
        self.propagate(Node::TrainingSet(nv));
        Ok(CreateOutcome::Created)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn source_variant(&self, nv: &NameVariant) -> Result<&SourceVariant> {
        self.sources
            .get(nv)
            .ok_or_else(|| Error::KeyNotFound(format!("source variant {nv}")))
    }

    pub fn feature_variant(&self, nv: &NameVariant) -> Result<&FeatureVariant> {
        self.features
            .get(nv)
            .ok_or_else(|| Error::KeyNotFound(format!("feature variant {nv}")))
    }

    pub fn label_variant(&self, nv: &NameVariant) -> Result<&LabelVariant> {
        self.labels
            .get(nv)
            .ok_or_else(|| Error::KeyNotFound(format!("label variant {nv}")))
    }

    pub fn training_set_variant(&self, nv: &NameVariant) -> Result<&TrainingSetVariant> {
        self.training_sets
            .get(nv)
            .ok_or_else(|| Error::KeyNotFound(format!("training set variant {nv}")))
    }

    pub fn provider(&self, name: &str) -> Result<&ProviderDef> {
        self.providers
            .get(name)
            .ok_or_else(|| Error::KeyNotFound(format!("provider {name}")))
    }

    pub fn entity(&self, name: &str) -> Result<&Entity> {
        self.entities
            .get(name)
            .ok_or_else(|| Error::KeyNotFound(format!("entity {name}")))
    }

    pub fn user(&self, name: &str) -> Result<&User> {
        self.users
            .get(name)
            .ok_or_else(|| Error::KeyNotFound(format!("user {name}")))
    }

    pub fn parent(&self, resource_type: ResourceType, name: &str) -> Result<&ResourceParent> {
        let map = match resource_type {
            ResourceType::Source => &self.source_parents,
            ResourceType::Feature => &self.feature_parents,
            ResourceType::Label => &self.label_parents,
            ResourceType::TrainingSet => &self.training_set_parents,
            other => {
                return Err(Error::InvalidResourceType(other.to_string()));
            }
        };
        map.get(name)
            .ok_or_else(|| Error::KeyNotFound(format!("{resource_type} {name}")))
    }

    pub fn variants_of(&self, resource_type: ResourceType) -> Vec<ResourceId> {
        match resource_type {
            ResourceType::SourceVariant => self
                .sources
                .keys()
                .map(|nv| nv.id(ResourceType::SourceVariant))
                .collect(),
            ResourceType::FeatureVariant => self
                .features
                .keys()
                .map(|nv| nv.id(ResourceType::FeatureVariant))
                .collect(),
            ResourceType::LabelVariant => self
                .labels
                .keys()
                .map(|nv| nv.id(ResourceType::LabelVariant))
                .collect(),
            ResourceType::TrainingSetVariant => self
                .training_sets
                .keys()
                .map(|nv| nv.id(ResourceType::TrainingSetVariant))
                .collect(),
            _ => Vec::new(),
        }
    }

    // ------------------------------------------------------------------
    // Status, schedule, deletion
    // ------------------------------------------------------------------

    pub fn status_of(&self, id: &ResourceId) -> Result<ResourceStatus> {
        let nv = id.name_variant();
        let status = match id.resource_type {
            ResourceType::SourceVariant => self.source_variant(&nv)?.status.clone(),
            ResourceType::FeatureVariant => self.feature_variant(&nv)?.status.clone(),
            ResourceType::LabelVariant => self.label_variant(&nv)?.status.clone(),
            ResourceType::TrainingSetVariant => self.training_set_variant(&nv)?.status.clone(),
            ResourceType::Provider => self.provider(&id.name)?.status.clone(),
            other => return Err(Error::InvalidResourceType(other.to_string())),
        };
        Ok(status)
    }

    pub fn set_status(&mut self, id: &ResourceId, status: ResourceStatus) -> Result<()> {
        let nv = id.name_variant();
        match id.resource_type {
            ResourceType::SourceVariant => {
                let v = self
                    .sources
                    .get_mut(&nv)
                    .ok_or_else(|| Error::KeyNotFound(format!("source variant {nv}")))?;
                v.status = status;
                v.last_updated = Utc::now();
            }
            ResourceType::FeatureVariant => {
                let v = self
                    .features
                    .get_mut(&nv)
                    .ok_or_else(|| Error::KeyNotFound(format!("feature variant {nv}")))?;
                v.status = status;
                v.last_updated = Utc::now();
            }
            ResourceType::LabelVariant => {
                let v = self
                    .labels
                    .get_mut(&nv)
                    .ok_or_else(|| Error::KeyNotFound(format!("label variant {nv}")))?;
                v.status = status;
                v.last_updated = Utc::now();
            }
            ResourceType::TrainingSetVariant => {
                let v = self
                    .training_sets
                    .get_mut(&nv)
                    .ok_or_else(|| Error::KeyNotFound(format!("training set variant {nv}")))?;
                v.status = status;
                v.last_updated = Utc::now();
            }
            ResourceType::Provider => {
                let p = self
                    .providers
                    .get_mut(&id.name)
                    .ok_or_else(|| Error::KeyNotFound(format!("provider {}", id.name)))?;
                p.status = status;
            }
            other => return Err(Error::InvalidResourceType(other.to_string())),
        }
        Ok(())
    }

    pub fn set_schedule(&mut self, id: &ResourceId, schedule: &str) -> Result<()> {
        let nv = id.name_variant();
        match id.resource_type {
            ResourceType::SourceVariant => {
                self.sources
                    .get_mut(&nv)
                    .ok_or_else(|| Error::KeyNotFound(format!("source variant {nv}")))?
                    .schedule = schedule.to_string();
            }
            ResourceType::FeatureVariant => {
                self.features
                    .get_mut(&nv)
                    .ok_or_else(|| Error::KeyNotFound(format!("feature variant {nv}")))?
                    .schedule = schedule.to_string();
            }
            ResourceType::TrainingSetVariant => {
                self.training_sets
                    .get_mut(&nv)
                    .ok_or_else(|| Error::KeyNotFound(format!("training set variant {nv}")))?
                    .schedule = schedule.to_string();
            }
            other => return Err(Error::InvalidResourceType(other.to_string())),
        }
        Ok(())
    }

    pub fn stage_delete(&mut self, id: &ResourceId) -> Result<()> {
        // Only labels go through staged deletion today.
        if id.resource_type != ResourceType::LabelVariant {
            return Err(Error::InvalidResourceType(id.resource_type.to_string()));
        }
        self.label_variant(&id.name_variant())?;
        self.staged_deletions.insert(id.clone());
        Ok(())
    }

    pub fn is_staged_for_deletion(&self, id: &ResourceId) -> bool {
        self.staged_deletions.contains(id)
    }

    pub fn finalize_delete(&mut self, id: &ResourceId) -> Result<()> {
        if id.resource_type != ResourceType::LabelVariant {
            return Err(Error::InvalidResourceType(id.resource_type.to_string()));
        }
        let nv = id.name_variant();
        self.labels
            .remove(&nv)
            .ok_or_else(|| Error::KeyNotFound(format!("label variant {nv}")))?;
        if let Some(parent) = self.label_parents.get_mut(&nv.name) {
            parent.variants.retain(|v| v != &nv.variant);
            if parent.default_variant == nv.variant {
                parent.default_variant = parent.variants.last().cloned().unwrap_or_default();
            }
        }
        self.staged_deletions.remove(id);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Propagation
    // ------------------------------------------------------------------

    /// Breadth-first walk from a newly created variant across its declared
    /// dependencies; every visited neighbor appends a reverse reference to
    /// the origin. Back-edges are set-valued, so partial propagation and
    /// replays are harmless.
    fn propagate(&mut self, origin: Node) {
        let mut visited: HashSet<Node> = HashSet::new();
        let mut queue: VecDeque<Node> = VecDeque::new();
        visited.insert(origin.clone());
        queue.push_back(origin.clone());

        while let Some(node) = queue.pop_front() {
            for dep in self.dependencies_of(&node) {
                if visited.contains(&dep) {
                    continue;
                }
                visited.insert(dep.clone());
                self.append_reverse(&dep, &origin);
                queue.push_back(dep);
            }
        }
    }

    fn dependencies_of(&self, node: &Node) -> Vec<Node> {
        match node {
            Node::Source(nv) => match self.sources.get(nv) {
                Some(s) => vec![
                    Node::User(s.owner.clone()),
                    Node::Provider(s.provider.clone()),
                ],
                None => Vec::new(),
            },
            Node::Feature(nv) => match self.features.get(nv) {
                Some(f) if f.is_on_demand() => vec![Node::User(f.owner.clone())],
                Some(f) => {
                    let mut deps = vec![
                        Node::User(f.owner.clone()),
                        Node::Source(f.source.clone()),
                        Node::Entity(f.entity.clone()),
                    ];
                    if let Some(provider) = &f.provider {
                        deps.push(Node::Provider(provider.clone()));
                    }
                    deps
                }
                None => Vec::new(),
            },
            Node::Label(nv) => match self.labels.get(nv) {
                Some(l) => vec![
                    Node::Source(l.source.clone()),
                    Node::Entity(l.entity.clone()),
                    Node::User(l.owner.clone()),
                    Node::Provider(l.provider.clone()),
                ],
                None => Vec::new(),
            },
            Node::TrainingSet(nv) => match self.training_sets.get(nv) {
                Some(t) => {
                    let mut deps = vec![
                        Node::User(t.owner.clone()),
                        Node::Provider(t.provider.clone()),
                        Node::Label(t.label.clone()),
                    ];
                    deps.extend(t.features.iter().cloned().map(Node::Feature));
                    deps
                }
                None => Vec::new(),
            },
            Node::Entity(_) | Node::User(_) | Node::Provider(_) => Vec::new(),
        }
    }

    fn append_reverse(&mut self, target: &Node, origin: &Node) {
        let (origin_nv, origin_kind) = match origin {
            Node::Source(nv) => (nv.clone(), ResourceType::SourceVariant),
            Node::Feature(nv) => (nv.clone(), ResourceType::FeatureVariant),
            Node::Label(nv) => (nv.clone(), ResourceType::LabelVariant),
            Node::TrainingSet(nv) => (nv.clone(), ResourceType::TrainingSetVariant),
            _ => return,
        };
        match target {
            Node::Source(nv) => {
                if let Some(source) = self.sources.get_mut(nv) {
                    match origin_kind {
                        ResourceType::FeatureVariant => append_ref(&mut source.features, origin_nv),
                        ResourceType::LabelVariant => append_ref(&mut source.labels, origin_nv),
                        ResourceType::TrainingSetVariant => {
                            append_ref(&mut source.trainingsets, origin_nv)
                        }
                        _ => {}
                    }
                }
            }
            Node::Feature(nv) => {
                if let Some(feature) = self.features.get_mut(nv) {
                    if origin_kind == ResourceType::TrainingSetVariant {
                        append_ref(&mut feature.trainingsets, origin_nv);
                    }
                }
            }
            Node::Label(nv) => {
                if let Some(label) = self.labels.get_mut(nv) {
                    if origin_kind == ResourceType::TrainingSetVariant {
                        append_ref(&mut label.trainingsets, origin_nv);
                    }
                }
            }
            Node::Entity(name) => {
                if let Some(entity) = self.entities.get_mut(name) {
                    match origin_kind {
                        ResourceType::FeatureVariant => append_ref(&mut entity.features, origin_nv),
                        ResourceType::LabelVariant => append_ref(&mut entity.labels, origin_nv),
                        _ => {}
                    }
                }
            }
            Node::User(name) => {
                if let Some(user) = self.users.get_mut(name) {
                    match origin_kind {
                        ResourceType::SourceVariant => append_ref(&mut user.sources, origin_nv),
                        ResourceType::FeatureVariant => append_ref(&mut user.features, origin_nv),
                        ResourceType::LabelVariant => append_ref(&mut user.labels, origin_nv),
                        ResourceType::TrainingSetVariant => {
                            append_ref(&mut user.trainingsets, origin_nv)
                        }
                        _ => {}
                    }
                }
            }
            Node::Provider(_) | Node::TrainingSet(_) => {}
        }
    }

    // ------------------------------------------------------------------
    // Checks
    // ------------------------------------------------------------------

    fn check_variant_names(&self, nv: &NameVariant) -> Result<()> {
        validate_name(&nv.name)?;
        validate_name(&nv.variant)?;
        Ok(())
    }

    fn require_user(&self, name: &str) -> Result<()> {
        self.user(name).map(|_| ())
    }

    fn require_provider(&self, name: &str) -> Result<()> {
        self.provider(name).map(|_| ())
    }

    fn require_entity(&self, name: &str) -> Result<()> {
        self.entity(name).map(|_| ())
    }

    fn require_source(&self, nv: &NameVariant) -> Result<()> {
        self.source_variant(nv).map(|_| ())
    }

    fn require_feature(&self, nv: &NameVariant) -> Result<()> {
        self.feature_variant(nv).map(|_| ())
    }

    fn require_label(&self, nv: &NameVariant) -> Result<()> {
        self.label_variant(nv).map(|_| ())
    }
}

/// The re-create decision: below `READY` any create is absorbed; at
/// `READY` only an equivalent definition is.
fn merge_or_reject(
    id: ResourceId,
    prior_status: Status,
    equivalent: equivalence::Equivalence,
) -> Result<CreateOutcome> {
    if prior_status != Status::Ready {
        debug!(resource = %id, "re-create absorbed before READY");
        return Ok(CreateOutcome::Merged);
    }
    match equivalent {
        Ok(()) => {
            debug!(resource = %id, "equivalent re-create merged");
            Ok(CreateOutcome::Merged)
        }
        Err(reason) => Err(Error::ResourceChanged { id, reason }),
    }
}
