//! The coordinator's error vocabulary.
//!
//! A closed tag set, not a hierarchy: every failure the coordinator reacts
//! to is one of these variants, and policy decisions (retry, delete the
//! job, leave status untouched) pattern-match on them. `anyhow` never
//! crosses these boundaries; it exists only in the binary's bootstrap.

use thiserror::Error;

use super::resource::ResourceId;

/// Result alias used throughout the coordinator.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while driving a resource to `READY`.
#[derive(Debug, Error)]
pub enum Error {
    /// The job key vanished between the watch event and the read. Benign:
    /// another worker already finished it.
    #[error("job does not exist: {0}")]
    JobDoesNotExist(String),

    /// The resource was already `READY` when the handler started.
    #[error("resource already complete: {0}")]
    ResourceAlreadyComplete(ResourceId),

    /// The resource was already `FAILED` when the handler started.
    #[error("resource already failed: {0}")]
    ResourceAlreadyFailed(ResourceId),

    /// A referenced dependency is not yet `READY`. Internal to waits;
    /// never surfaced as a job failure.
    #[error("resource not ready: {0}")]
    ResourceNotReady(ResourceId),

    /// A required dependency is `FAILED`; the job cannot ever succeed.
    #[error("required dependency failed: {0}")]
    ResourceFailed(ResourceId),

    /// Re-creation with a definition that is not equivalent to the ready
    /// one.
    #[error("resource {id} has changed: {reason}")]
    ResourceChanged { id: ResourceId, reason: String },

    #[error("invalid resource type: {0}")]
    InvalidResourceType(String),

    #[error("invalid resource variant name: {0}")]
    InvalidResourceVariantName(String),

    #[error("invalid file type: {0}")]
    InvalidFileType(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A metadata object the handler needs is missing.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Double-register of an immutable dataset.
    #[error("dataset already exists: {0}")]
    DatasetAlreadyExists(String),

    /// The provider has no table at the expected location. In delete
    /// paths this is treated as success.
    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    /// KV, runner, or provider failure. The job stays queued and retries
    /// up to the attempt limit.
    #[error("internal error: {0}")]
    Internal(String),

    /// The lock was lost mid-transaction; the work aborts and the watch
    /// stream re-delivers the job.
    #[error("lock lost mid-transaction")]
    NotOwner,
}

impl Error {
    pub fn internal(msg: impl std::fmt::Display) -> Self {
        Error::Internal(msg.to_string())
    }

    pub fn invalid_argument(msg: impl std::fmt::Display) -> Self {
        Error::InvalidArgument(msg.to_string())
    }

    /// Whether the coordinator should leave the variant's status untouched
    /// when this error surfaces from a handler.
    pub fn preserves_status(&self) -> bool {
        matches!(self, Error::ResourceAlreadyFailed(_))
    }
}

impl From<syncstore::StoreError> for Error {
    fn from(err: syncstore::StoreError) -> Self {
        use syncstore::StoreError;
        match err {
            StoreError::NotOwner | StoreError::SessionExpired(_) => Error::NotOwner,
            StoreError::KeyNotFound(key) => Error::KeyNotFound(key),
            other => Error::Internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(format!("serialization: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::resource::ResourceType;

    fn id() -> ResourceId {
        ResourceId::new("f", "v", ResourceType::FeatureVariant)
    }

    #[test]
    fn store_not_owner_maps_to_not_owner() {
        let err: Error = syncstore::StoreError::NotOwner.into();
        assert!(matches!(err, Error::NotOwner));

        let err: Error = syncstore::StoreError::SessionExpired(7).into();
        assert!(matches!(err, Error::NotOwner));
    }

    #[test]
    fn already_failed_preserves_status() {
        assert!(Error::ResourceAlreadyFailed(id()).preserves_status());
        assert!(!Error::ResourceFailed(id()).preserves_status());
        assert!(!Error::internal("boom").preserves_status());
    }

    #[test]
    fn display_mentions_the_kind() {
        let err = Error::ResourceFailed(id());
        assert!(err.to_string().contains("dependency failed"));
    }
}
