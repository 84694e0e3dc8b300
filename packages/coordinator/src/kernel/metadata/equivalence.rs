//! Definition-level equivalence for re-registered variants.
//!
//! When a `(name, variant)` pair is re-created over a `READY` prior, the
//! pair of definitions decides the outcome: equivalent means the create is
//! a merge of tags and properties; anything else is a `ResourceChanged`
//! rejection. Comparators are explicit per variant kind - no reflection -
//! and collection-valued fields compare as multisets where the original
//! declaration order is immaterial.

use crate::common::resource::NameVariant;
use crate::kernel::metadata::resources::{
    FeatureVariant, LabelVariant, SourceDefinition, SourceVariant, TrainingSetVariant,
    Transformation,
};

/// `Ok(())` when equivalent; `Err(reason)` naming the first difference.
pub type Equivalence = std::result::Result<(), String>;

fn differs(field: &str) -> Equivalence {
    Err(format!("{field} differs"))
}

/// Order-insensitive comparison of reference lists (duplicates counted).
fn same_multiset(a: &[NameVariant], b: &[NameVariant]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a_sorted = a.to_vec();
    let mut b_sorted = b.to_vec();
    a_sorted.sort();
    b_sorted.sort();
    a_sorted == b_sorted
}

pub fn source_variant(prior: &SourceVariant, incoming: &SourceVariant) -> Equivalence {
    if prior.name != incoming.name {
        return differs("name");
    }
    if prior.owner != incoming.owner {
        return differs("owner");
    }
    if prior.provider != incoming.provider {
        return differs("provider");
    }
    source_definition(&prior.definition, &incoming.definition)
}

fn source_definition(prior: &SourceDefinition, incoming: &SourceDefinition) -> Equivalence {
    match (prior, incoming) {
        (SourceDefinition::Primary(a), SourceDefinition::Primary(b)) => {
            if a == b {
                Ok(())
            } else {
                differs("primary data")
            }
        }
        (SourceDefinition::Transformation(a), SourceDefinition::Transformation(b)) => {
            transformation(a, b)
        }
        _ => differs("definition kind"),
    }
}

fn transformation(prior: &Transformation, incoming: &Transformation) -> Equivalence {
    match (prior, incoming) {
        (
            Transformation::Sql { query: a, .. },
            Transformation::Sql { query: b, .. },
        ) => {
            if a == b {
                Ok(())
            } else {
                differs("sql query")
            }
        }
        (
            Transformation::Dataframe {
                query: qa,
                inputs: ia,
                args: aa,
            },
            Transformation::Dataframe {
                query: qb,
                inputs: ib,
                args: ab,
            },
        ) => {
            if qa != qb {
                return differs("dataframe source text");
            }
            if !same_multiset(ia, ib) {
                return differs("dataframe inputs");
            }
            if aa != ab {
                return differs("kubernetes args");
            }
            Ok(())
        }
        _ => differs("transformation kind"),
    }
}

pub fn feature_variant(prior: &FeatureVariant, incoming: &FeatureVariant) -> Equivalence {
    if prior.name != incoming.name {
        return differs("name");
    }
    if prior.source != incoming.source {
        return differs("source");
    }
    if prior.provider != incoming.provider {
        return differs("provider");
    }
    if prior.entity != incoming.entity {
        return differs("entity");
    }
    if prior.value_type != incoming.value_type {
        return differs("value type");
    }
    if prior.owner != incoming.owner {
        return differs("owner");
    }
    if prior.location != incoming.location {
        return differs("location");
    }
    Ok(())
}

pub fn label_variant(prior: &LabelVariant, incoming: &LabelVariant) -> Equivalence {
    if prior.name != incoming.name {
        return differs("name");
    }
    if prior.source != incoming.source {
        return differs("source");
    }
    if prior.columns != incoming.columns {
        return differs("columns");
    }
    if prior.entity != incoming.entity {
        return differs("entity");
    }
    if prior.value_type != incoming.value_type {
        return differs("value type");
    }
    if prior.owner != incoming.owner {
        return differs("owner");
    }
    Ok(())
}

pub fn training_set_variant(
    prior: &TrainingSetVariant,
    incoming: &TrainingSetVariant,
) -> Equivalence {
    if prior.name != incoming.name {
        return differs("name");
    }
    if prior.label != incoming.label {
        return differs("label");
    }
    if !same_multiset(&prior.features, &incoming.features) {
        return differs("features");
    }
    if prior.lag_features != incoming.lag_features {
        return differs("lag features");
    }
    if prior.owner != incoming.owner {
        return differs("owner");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{ScalarType, ValueType};
    use crate::kernel::metadata::resources::{FeatureLocation, PrimaryData, ResourceColumns};

    fn sql_source(query: &str) -> SourceVariant {
        SourceVariant::builder()
            .name("s")
            .variant("v")
            .definition(SourceDefinition::Transformation(Transformation::Sql {
                query: query.to_string(),
                sources: vec![NameVariant::new("txns", "v1")],
            }))
            .owner("alice")
            .provider("offline-pg")
            .build()
    }

    #[test]
    fn identical_sql_sources_are_equivalent() {
        assert!(source_variant(&sql_source("SELECT 1"), &sql_source("SELECT 1")).is_ok());
    }

    #[test]
    fn changed_sql_query_is_not_equivalent() {
        let err = source_variant(&sql_source("SELECT 1"), &sql_source("SELECT 2")).unwrap_err();
        assert!(err.contains("sql query"));
    }

    #[test]
    fn primary_vs_transformation_is_not_equivalent() {
        let primary = SourceVariant::builder()
            .name("s")
            .variant("v")
            .definition(SourceDefinition::Primary(PrimaryData::SqlTable {
                name: "Transactions".into(),
            }))
            .owner("alice")
            .provider("offline-pg")
            .build();
        assert!(source_variant(&primary, &sql_source("SELECT 1")).is_err());
    }

    #[test]
    fn dataframe_inputs_compare_as_multiset() {
        let make = |inputs: Vec<NameVariant>| SourceVariant {
            definition: SourceDefinition::Transformation(Transformation::Dataframe {
                query: "def transform(df): return df".into(),
                inputs,
                args: None,
            }),
            ..sql_source("")
        };
        let a = make(vec![NameVariant::new("x", "1"), NameVariant::new("y", "1")]);
        let b = make(vec![NameVariant::new("y", "1"), NameVariant::new("x", "1")]);
        assert!(source_variant(&a, &b).is_ok());

        let c = make(vec![NameVariant::new("x", "1")]);
        assert!(source_variant(&a, &c).is_err());
    }

    fn feature() -> FeatureVariant {
        FeatureVariant::builder()
            .name("f")
            .variant("v")
            .source(NameVariant::new("s", "v"))
            .entity("user")
            .owner("alice")
            .provider(Some("redis-1".to_string()))
            .value_type(ValueType::scalar(ScalarType::Float32))
            .location(FeatureLocation::Columns(ResourceColumns::builder().build()))
            .build()
    }

    #[test]
    fn feature_value_type_mismatch() {
        let prior = feature();
        let incoming = FeatureVariant {
            value_type: ValueType::scalar(ScalarType::Int64),
            ..feature()
        };
        assert!(feature_variant(&prior, &incoming).unwrap_err().contains("value type"));
        assert!(feature_variant(&prior, &feature()).is_ok());
    }

    #[test]
    fn training_set_features_order_insensitive() {
        let make = |features: Vec<NameVariant>| {
            TrainingSetVariant::builder()
                .name("t")
                .variant("v")
                .owner("alice")
                .provider("offline-pg")
                .label(NameVariant::new("l", "v"))
                .features(features)
                .build()
        };
        let a = make(vec![NameVariant::new("f1", "v"), NameVariant::new("f2", "v")]);
        let b = make(vec![NameVariant::new("f2", "v"), NameVariant::new("f1", "v")]);
        assert!(training_set_variant(&a, &b).is_ok());

        let c = make(vec![NameVariant::new("f1", "v")]);
        assert!(training_set_variant(&a, &c).unwrap_err().contains("features"));
    }
}
