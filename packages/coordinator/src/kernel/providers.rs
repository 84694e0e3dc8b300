//! Provider documents and their update policy.
//!
//! Mutability is data, not control flow: each provider kind maps to the
//! set of config fields an update may change. Differing fields are
//! computed structurally over the serialized config objects, and an update
//! is accepted only when every differing field is mutable. Unknown
//! provider kinds reject all updates.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::error::{Error, Result};
use crate::kernel::metadata::resources::{Properties, ResourceStatus, Tags};

/// Provider families the control plane knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderType {
    None,
    Postgres,
    Snowflake,
    Bigquery,
    Redshift,
    Spark,
    Kubernetes,
    Redis,
    Dynamodb,
    Memory,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::None => "NONE",
            ProviderType::Postgres => "POSTGRES",
            ProviderType::Snowflake => "SNOWFLAKE",
            ProviderType::Bigquery => "BIGQUERY",
            ProviderType::Redshift => "REDSHIFT",
            ProviderType::Spark => "SPARK",
            ProviderType::Kubernetes => "KUBERNETES",
            ProviderType::Redis => "REDIS",
            ProviderType::Dynamodb => "DYNAMODB",
            ProviderType::Memory => "MEMORY",
        }
    }

    pub fn is_offline(&self) -> bool {
        matches!(
            self,
            ProviderType::Postgres
                | ProviderType::Snowflake
                | ProviderType::Bigquery
                | ProviderType::Redshift
                | ProviderType::Spark
                | ProviderType::Kubernetes
                | ProviderType::Memory
        )
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Config fields an update may change, per provider kind. Everything not
/// listed is immutable; kinds not listed reject all updates.
fn mutable_fields(provider_type: ProviderType) -> &'static [&'static str] {
    match provider_type {
        ProviderType::Postgres | ProviderType::Redshift => {
            &["Username", "Password", "Port", "SSLMode"]
        }
        ProviderType::Snowflake => &["Username", "Password", "Role", "Warehouse"],
        ProviderType::Bigquery => &["Credentials"],
        ProviderType::Spark => &["ExecutorConfig", "StoreCredentials"],
        ProviderType::Redis => &["Password"],
        ProviderType::Dynamodb => &["AccessKey", "SecretKey", "ImportFromS3"],
        ProviderType::Memory => &[],
        _ => &[],
    }
}

/// A provider document in the metadata graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDef {
    pub name: String,
    pub description: String,
    pub provider_type: ProviderType,
    /// Provider-specific connection config as a JSON object.
    pub serialized_config: Value,
    pub tags: Tags,
    pub properties: Properties,
    pub status: ResourceStatus,
}

impl ProviderDef {
    pub fn new(name: impl Into<String>, provider_type: ProviderType, config: Value) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            provider_type,
            serialized_config: config,
            tags: Tags::default(),
            properties: Properties::default(),
            status: ResourceStatus::default(),
        }
    }

    /// A named config field, when the config is an object carrying it.
    pub fn config_field(&self, field: &str) -> Option<&Value> {
        self.serialized_config.as_object().and_then(|m| m.get(field))
    }

    /// True boolean config flag.
    pub fn config_flag(&self, field: &str) -> bool {
        self.config_field(field)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Config fields whose values differ between the two documents: the
    /// union of both key sets, keeping keys absent on either side.
    pub fn differing_fields(&self, other: &ProviderDef) -> Result<Vec<String>> {
        let a = self
            .serialized_config
            .as_object()
            .ok_or_else(|| Error::internal(format!("provider {} config is not an object", self.name)))?;
        let b = other
            .serialized_config
            .as_object()
            .ok_or_else(|| Error::internal(format!("provider {} config is not an object", other.name)))?;

        let mut fields: Vec<String> = Vec::new();
        for (key, value) in a {
            if b.get(key) != Some(value) {
                fields.push(key.clone());
            }
        }
        for key in b.keys() {
            if !a.contains_key(key) && !fields.contains(key) {
                fields.push(key.clone());
            }
        }
        fields.sort();
        Ok(fields)
    }

    /// Accept `update` only if every differing field is mutable for this
    /// provider kind.
    pub fn check_update(&self, update: &ProviderDef) -> Result<()> {
        if update.provider_type != self.provider_type {
            return Err(Error::internal(format!(
                "provider {} cannot change type from {} to {}",
                self.name, self.provider_type, update.provider_type
            )));
        }
        let allowed = mutable_fields(self.provider_type);
        let differing = self.differing_fields(update)?;
        let frozen: Vec<&String> = differing
            .iter()
            .filter(|field| !allowed.contains(&field.as_str()))
            .collect();
        if !frozen.is_empty() {
            return Err(Error::internal(format!(
                "provider {} update touches immutable fields: {}",
                self.name,
                frozen
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn postgres(config: Value) -> ProviderDef {
        ProviderDef::new("offline-pg", ProviderType::Postgres, config)
    }

    #[test]
    fn differing_fields_is_symmetric_union() {
        let a = postgres(json!({"Host": "db", "Port": "5432", "Password": "old"}));
        let b = postgres(json!({"Host": "db", "Port": "5433", "Username": "svc"}));
        let diff = a.differing_fields(&b).unwrap();
        assert_eq!(diff, vec!["Password", "Port", "Username"]);
    }

    #[test]
    fn mutable_update_accepted() {
        let prior = postgres(json!({"Host": "db", "Password": "old"}));
        let update = postgres(json!({"Host": "db", "Password": "new"}));
        assert!(prior.check_update(&update).is_ok());
    }

    #[test]
    fn immutable_update_rejected() {
        let prior = postgres(json!({"Host": "db", "Password": "old"}));
        let update = postgres(json!({"Host": "other-db", "Password": "old"}));
        let err = prior.check_update(&update).unwrap_err();
        assert!(err.to_string().contains("Host"));
    }

    #[test]
    fn unknown_kind_rejects_all_updates() {
        let prior = ProviderDef::new("x", ProviderType::None, json!({"A": 1}));
        let update = ProviderDef::new("x", ProviderType::None, json!({"A": 2}));
        assert!(prior.check_update(&update).is_err());
    }

    #[test]
    fn type_change_rejected() {
        let prior = postgres(json!({}));
        let update = ProviderDef::new("offline-pg", ProviderType::Snowflake, json!({}));
        assert!(prior.check_update(&update).is_err());
    }

    #[test]
    fn config_flag_reads_booleans() {
        let dynamo = ProviderDef::new(
            "dynamo-1",
            ProviderType::Dynamodb,
            json!({"Region": "us-east-1", "ImportFromS3": true}),
        );
        assert!(dynamo.config_flag("ImportFromS3"));
        assert!(!dynamo.config_flag("Missing"));
    }
}
