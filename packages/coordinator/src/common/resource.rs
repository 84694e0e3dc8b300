//! Resource identities and the persisted key namespaces built from them.
//!
//! Every coordination channel is a key prefix over the state store:
//!
//! ```text
//! JOB_<type>/<name>/<variant>                      job records
//! LOCK_<job key>                                   lease-bound job locks
//! UPDATE_EVENT_<name>__<variant>__<type>__<uuid>   update completions
//! SCHEDULEJOB_<name>__<variant>__<type>            schedule changes
//! ```
//!
//! Names never contain `__`, so the double-underscore keys parse
//! unambiguously.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{Error, Result};

pub const JOB_PREFIX: &str = "JOB_";
pub const LOCK_PREFIX: &str = "LOCK_";
pub const UPDATE_EVENT_PREFIX: &str = "UPDATE_EVENT_";
pub const SCHEDULE_JOB_PREFIX: &str = "SCHEDULEJOB_";

/// Node kinds of the resource graph. The wire encoding is the integer
/// tag; the display form is the screaming-snake name used in keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum ResourceType {
    Feature,
    FeatureVariant,
    Label,
    LabelVariant,
    TrainingSet,
    TrainingSetVariant,
    Source,
    SourceVariant,
    Provider,
    Entity,
    Model,
    User,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Feature => "FEATURE",
            ResourceType::FeatureVariant => "FEATURE_VARIANT",
            ResourceType::Label => "LABEL",
            ResourceType::LabelVariant => "LABEL_VARIANT",
            ResourceType::TrainingSet => "TRAINING_SET",
            ResourceType::TrainingSetVariant => "TRAINING_SET_VARIANT",
            ResourceType::Source => "SOURCE",
            ResourceType::SourceVariant => "SOURCE_VARIANT",
            ResourceType::Provider => "PROVIDER",
            ResourceType::Entity => "ENTITY",
            ResourceType::Model => "MODEL",
            ResourceType::User => "USER",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "FEATURE" => Ok(ResourceType::Feature),
            "FEATURE_VARIANT" => Ok(ResourceType::FeatureVariant),
            "LABEL" => Ok(ResourceType::Label),
            "LABEL_VARIANT" => Ok(ResourceType::LabelVariant),
            "TRAINING_SET" => Ok(ResourceType::TrainingSet),
            "TRAINING_SET_VARIANT" => Ok(ResourceType::TrainingSetVariant),
            "SOURCE" => Ok(ResourceType::Source),
            "SOURCE_VARIANT" => Ok(ResourceType::SourceVariant),
            "PROVIDER" => Ok(ResourceType::Provider),
            "ENTITY" => Ok(ResourceType::Entity),
            "MODEL" => Ok(ResourceType::Model),
            "USER" => Ok(ResourceType::User),
            other => Err(Error::InvalidResourceType(other.to_string())),
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ResourceType> for i32 {
    fn from(t: ResourceType) -> i32 {
        match t {
            ResourceType::Feature => 0,
            ResourceType::FeatureVariant => 1,
            ResourceType::Label => 2,
            ResourceType::LabelVariant => 3,
            ResourceType::TrainingSet => 4,
            ResourceType::TrainingSetVariant => 5,
            ResourceType::Source => 6,
            ResourceType::SourceVariant => 7,
            ResourceType::Provider => 8,
            ResourceType::Entity => 9,
            ResourceType::Model => 10,
            ResourceType::User => 11,
        }
    }
}

impl TryFrom<i32> for ResourceType {
    type Error = String;

    fn try_from(value: i32) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(ResourceType::Feature),
            1 => Ok(ResourceType::FeatureVariant),
            2 => Ok(ResourceType::Label),
            3 => Ok(ResourceType::LabelVariant),
            4 => Ok(ResourceType::TrainingSet),
            5 => Ok(ResourceType::TrainingSetVariant),
            6 => Ok(ResourceType::Source),
            7 => Ok(ResourceType::SourceVariant),
            8 => Ok(ResourceType::Provider),
            9 => Ok(ResourceType::Entity),
            10 => Ok(ResourceType::Model),
            11 => Ok(ResourceType::User),
            other => Err(format!("unknown resource type tag {other}")),
        }
    }
}

/// A `(name, variant)` reference to another resource, as written in
/// definitions (transformation inputs, a feature's source, and so on).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NameVariant {
    pub name: String,
    pub variant: String,
}

impl NameVariant {
    pub fn new(name: impl Into<String>, variant: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variant: variant.into(),
        }
    }

    pub fn id(&self, resource_type: ResourceType) -> ResourceId {
        ResourceId::new(&self.name, &self.variant, resource_type)
    }
}

impl fmt::Display for NameVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.variant)
    }
}

/// Fully qualified resource identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResourceId {
    pub name: String,
    pub variant: String,
    #[serde(rename = "Type")]
    pub resource_type: ResourceType,
}

impl ResourceId {
    pub fn new(name: impl Into<String>, variant: impl Into<String>, t: ResourceType) -> Self {
        Self {
            name: name.into(),
            variant: variant.into(),
            resource_type: t,
        }
    }

    pub fn name_variant(&self) -> NameVariant {
        NameVariant::new(&self.name, &self.variant)
    }

    /// `JOB_<type>/<name>/<variant>`
    pub fn job_key(&self) -> String {
        format!(
            "{JOB_PREFIX}{}/{}/{}",
            self.resource_type, self.name, self.variant
        )
    }

    /// `UPDATE_EVENT_<name>__<variant>__<type>__<uuid>`
    pub fn update_event_key(&self, event_id: uuid::Uuid) -> String {
        format!(
            "{UPDATE_EVENT_PREFIX}{}__{}__{}__{}",
            self.name, self.variant, self.resource_type, event_id
        )
    }

    /// `SCHEDULEJOB_<name>__<variant>__<type>`
    pub fn schedule_job_key(&self) -> String {
        format!(
            "{SCHEDULE_JOB_PREFIX}{}__{}__{}",
            self.name, self.variant, self.resource_type
        )
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.variant.is_empty() {
            write!(f, "{} ({})", self.name, self.resource_type)
        } else {
            write!(f, "{}.{} ({})", self.name, self.variant, self.resource_type)
        }
    }
}

/// `LOCK_<job key>`
pub fn lock_key(job_key: &str) -> String {
    format!("{LOCK_PREFIX}{job_key}")
}

/// Parse `JOB_<type>/<name>/<variant>` back into a [`ResourceId`].
pub fn parse_job_key(key: &str) -> Result<ResourceId> {
    let rest = key
        .strip_prefix(JOB_PREFIX)
        .ok_or_else(|| Error::invalid_argument(format!("not a job key: {key}")))?;
    let mut parts = rest.splitn(3, '/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(t), Some(name), Some(variant)) => {
            Ok(ResourceId::new(name, variant, ResourceType::parse(t)?))
        }
        _ => Err(Error::invalid_argument(format!("malformed job key: {key}"))),
    }
}

/// Parse the `<name>__<variant>__<type>` core shared by the event keys.
/// Trailing segments (the event uuid) are ignored.
fn parse_double_underscore(rest: &str, key: &str) -> Result<ResourceId> {
    let parts: Vec<&str> = rest.split("__").collect();
    if parts.len() < 3 {
        return Err(Error::invalid_argument(format!("malformed key: {key}")));
    }
    Ok(ResourceId::new(
        parts[0],
        parts[1],
        ResourceType::parse(parts[2])?,
    ))
}

/// Parse an `UPDATE_EVENT_…` key into the resource it concerns.
pub fn parse_update_event_key(key: &str) -> Result<ResourceId> {
    let rest = key
        .strip_prefix(UPDATE_EVENT_PREFIX)
        .ok_or_else(|| Error::invalid_argument(format!("not an update event key: {key}")))?;
    parse_double_underscore(rest, key)
}

/// Parse a `SCHEDULEJOB_…` key into the resource it concerns.
pub fn parse_schedule_job_key(key: &str) -> Result<ResourceId> {
    let rest = key
        .strip_prefix(SCHEDULE_JOB_PREFIX)
        .ok_or_else(|| Error::invalid_argument(format!("not a schedule job key: {key}")))?;
    parse_double_underscore(rest, key)
}

/// Naming rule for resources and variants: no `__` anywhere, no leading or
/// trailing `_`. Keeps every key namespace parseable.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.contains("__")
        || name.starts_with('_')
        || name.ends_with('_')
    {
        return Err(Error::InvalidResourceVariantName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_key_roundtrip() {
        let id = ResourceId::new("avg_amt", "v1", ResourceType::FeatureVariant);
        let key = id.job_key();
        assert_eq!(key, "JOB_FEATURE_VARIANT/avg_amt/v1");
        assert_eq!(parse_job_key(&key).unwrap(), id);
    }

    #[test]
    fn lock_key_wraps_job_key() {
        assert_eq!(
            lock_key("JOB_SOURCE_VARIANT/s/v"),
            "LOCK_JOB_SOURCE_VARIANT/s/v"
        );
    }

    #[test]
    fn update_event_key_roundtrip() {
        let id = ResourceId::new("f", "v", ResourceType::FeatureVariant);
        let key = id.update_event_key(uuid::Uuid::new_v4());
        assert!(key.starts_with("UPDATE_EVENT_f__v__FEATURE_VARIANT__"));
        assert_eq!(parse_update_event_key(&key).unwrap(), id);
    }

    #[test]
    fn schedule_job_key_roundtrip() {
        let id = ResourceId::new("f", "v", ResourceType::FeatureVariant);
        let key = id.schedule_job_key();
        assert_eq!(key, "SCHEDULEJOB_f__v__FEATURE_VARIANT");
        assert_eq!(parse_schedule_job_key(&key).unwrap(), id);
    }

    #[test]
    fn malformed_keys_are_rejected() {
        assert!(parse_job_key("JOB_FEATURE_VARIANT/only-name").is_err());
        assert!(parse_job_key("NOT_A_JOB/x/y").is_err());
        assert!(parse_update_event_key("UPDATE_EVENT_f__v").is_err());
        assert!(parse_update_event_key("UPDATE_EVENT_f__v__NO_SUCH_TYPE__x").is_err());
    }

    #[test]
    fn resource_type_tag_roundtrip() {
        for tag in 0..=11 {
            let t = ResourceType::try_from(tag).unwrap();
            assert_eq!(i32::from(t), tag);
            assert_eq!(ResourceType::parse(t.as_str()).unwrap(), t);
        }
        assert!(ResourceType::try_from(12).is_err());
    }

    #[test]
    fn resource_id_serializes_with_integer_type() {
        let id = ResourceId::new("txns", "v1", ResourceType::SourceVariant);
        let json = serde_json::to_value(&id).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"Name": "txns", "Variant": "v1", "Type": 7})
        );
        let back: ResourceId = serde_json::from_value(json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn naming_rules() {
        assert!(validate_name("avg_amt").is_ok());
        assert!(validate_name("a").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("bad__name").is_err());
        assert!(validate_name("_leading").is_err());
        assert!(validate_name("trailing_").is_err());
    }
}
