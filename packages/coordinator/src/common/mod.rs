//! Shared vocabulary: errors, resource identities, value types, retry.

pub mod error;
pub mod resource;
pub mod retry;
pub mod types;

pub use error::{Error, Result};
pub use resource::{NameVariant, ResourceId, ResourceType};
pub use types::{ScalarType, ValueType};
