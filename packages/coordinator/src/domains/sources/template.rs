//! Placeholder substitution for SQL transformations.
//!
//! Transformation text references its inputs as `{{ name.variant }}`.
//! Replacement resolves each key through the source map and quotes the
//! table for the target store: double-quoted identifiers everywhere
//! except BigQuery, which expands to a backticked
//! `project.dataset.table` path.

use std::collections::HashMap;

use crate::common::error::{Error, Result};
use crate::kernel::providers::{ProviderDef, ProviderType};

/// How resolved table names are written into the SQL text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlIdentifierQuoting {
    /// Standard double-quoted identifier.
    Standard,
    /// BigQuery backtick path with the project and dataset prefix.
    BigQuery { project: String, dataset: String },
}

impl SqlIdentifierQuoting {
    /// Pick the quoting style for a provider document.
    pub fn for_provider(provider: &ProviderDef) -> Self {
        if provider.provider_type == ProviderType::Bigquery {
            let field = |name: &str| {
                provider
                    .config_field(name)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string()
            };
            SqlIdentifierQuoting::BigQuery {
                project: field("ProjectID"),
                dataset: field("DatasetID"),
            }
        } else {
            SqlIdentifierQuoting::Standard
        }
    }

    fn quote(&self, table: &str) -> String {
        match self {
            SqlIdentifierQuoting::Standard => {
                format!("\"{}\"", table.replace('"', "\"\""))
            }
            SqlIdentifierQuoting::BigQuery { project, dataset } => {
                format!("`{project}.{dataset}.{table}`")
            }
        }
    }
}

/// Replace every `{{ key }}` in `template` via `sources`. Whitespace
/// inside the braces is trimmed; an unknown or unclosed placeholder is an
/// invalid argument.
pub fn replace(
    template: &str,
    sources: &HashMap<String, String>,
    quoting: &SqlIdentifierQuoting,
) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or_else(|| Error::invalid_argument("unclosed template placeholder"))?;
        let key = after[..end].trim();
        let table = sources.get(key).ok_or_else(|| {
            Error::InvalidArgument(format!("template key {key} does not match any source"))
        })?;
        out.push_str(&quoting.quote(table));
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sources() -> HashMap<String, String> {
        [("txns.v1".to_string(), "Transactions".to_string())]
            .into_iter()
            .collect()
    }

    #[test]
    fn replaces_with_quoted_identifier() {
        let out = replace(
            "SELECT id, avg(x) FROM {{ txns.v1 }}",
            &sources(),
            &SqlIdentifierQuoting::Standard,
        )
        .unwrap();
        assert_eq!(out, "SELECT id, avg(x) FROM \"Transactions\"");
    }

    #[test]
    fn whitespace_inside_braces_is_trimmed() {
        let out = replace(
            "SELECT * FROM {{txns.v1}} JOIN {{  txns.v1  }}",
            &sources(),
            &SqlIdentifierQuoting::Standard,
        )
        .unwrap();
        assert_eq!(out, "SELECT * FROM \"Transactions\" JOIN \"Transactions\"");
    }

    #[test]
    fn bigquery_expands_to_backticked_path() {
        let quoting = SqlIdentifierQuoting::BigQuery {
            project: "analytics".into(),
            dataset: "features".into(),
        };
        let out = replace("SELECT * FROM {{ txns.v1 }}", &sources(), &quoting).unwrap();
        assert_eq!(out, "SELECT * FROM `analytics.features.Transactions`");
    }

    #[test]
    fn bigquery_quoting_reads_provider_config() {
        let provider = ProviderDef::new(
            "bq-1",
            ProviderType::Bigquery,
            json!({"ProjectID": "analytics", "DatasetID": "features"}),
        );
        assert_eq!(
            SqlIdentifierQuoting::for_provider(&provider),
            SqlIdentifierQuoting::BigQuery {
                project: "analytics".into(),
                dataset: "features".into()
            }
        );
    }

    #[test]
    fn unknown_key_is_invalid_argument() {
        let err = replace(
            "SELECT * FROM {{ missing.v1 }}",
            &sources(),
            &SqlIdentifierQuoting::Standard,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert!(err.to_string().contains("missing.v1"));
    }

    #[test]
    fn unclosed_placeholder_is_invalid_argument() {
        let err = replace(
            "SELECT * FROM {{ txns.v1",
            &sources(),
            &SqlIdentifierQuoting::Standard,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn text_without_placeholders_is_unchanged() {
        let out = replace("SELECT 1", &sources(), &SqlIdentifierQuoting::Standard).unwrap();
        assert_eq!(out, "SELECT 1");
    }

    #[test]
    fn embedded_quotes_are_escaped() {
        let sources: HashMap<String, String> = [("s.v".to_string(), "we\"ird".to_string())]
            .into_iter()
            .collect();
        let out = replace("{{ s.v }}", &sources, &SqlIdentifierQuoting::Standard).unwrap();
        assert_eq!(out, "\"we\"\"ird\"");
    }
}
