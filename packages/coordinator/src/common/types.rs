//! Value types carried by features and labels.

use serde::{Deserialize, Serialize};

/// Primitive column types understood by every provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    Int,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Bool,
    Timestamp,
}

/// A feature or label value type. Vectors carry their dimension and
/// whether they are embeddings (which drives vector-store indexing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueType {
    Scalar(ScalarType),
    Vector {
        #[serde(rename = "ScalarType")]
        scalar: ScalarType,
        #[serde(rename = "Dimension")]
        dimension: u32,
        #[serde(rename = "IsEmbedding")]
        is_embedding: bool,
    },
}

impl ValueType {
    pub fn scalar(t: ScalarType) -> Self {
        ValueType::Scalar(t)
    }

    pub fn embedding(scalar: ScalarType, dimension: u32) -> Self {
        ValueType::Vector {
            scalar,
            dimension,
            is_embedding: true,
        }
    }

    pub fn is_embedding(&self) -> bool {
        matches!(
            self,
            ValueType::Vector {
                is_embedding: true,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_serializes_as_bare_string() {
        let v = ValueType::scalar(ScalarType::Float32);
        assert_eq!(serde_json::to_value(&v).unwrap(), serde_json::json!("float32"));
    }

    #[test]
    fn vector_roundtrip() {
        let v = ValueType::embedding(ScalarType::Float32, 384);
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"ScalarType": "float32", "Dimension": 384, "IsEmbedding": true})
        );
        let back: ValueType = serde_json::from_value(json).unwrap();
        assert_eq!(back, v);
        assert!(back.is_embedding());
    }
}
