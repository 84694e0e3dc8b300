//! Structured error types for store operations.
//!
//! `StoreError` is pattern-matchable: callers distinguish losing a lock
//! (`NotOwner`) from backend unavailability (`Backend`) because the two
//! demand opposite reactions - abandon the work versus retry it.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Failure modes of the coordination substrate.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An empty key was passed to a store or lock operation.
    #[error("key must not be empty")]
    EmptyKey,

    /// The requested key does not exist.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Lock acquisition failed outright (as opposed to blocking).
    #[error("failed to acquire lock {name}: {reason}")]
    LockAcquisitionFailed {
        /// The logical lock name.
        name: String,
        /// Backend-provided reason.
        reason: String,
    },

    /// The caller no longer holds the lock guarding this operation.
    #[error("caller does not own the lock")]
    NotOwner,

    /// The session's lease has expired or was revoked.
    #[error("session {0} has expired")]
    SessionExpired(i64),

    /// Backend failure (connection loss, RPC error, corrupt payload).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<etcd_client::Error> for StoreError {
    fn from(err: etcd_client::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_lock_name() {
        let err = StoreError::LockAcquisitionFailed {
            name: "LOCK_JOB/a/b".into(),
            reason: "lease revoked".into(),
        };
        assert!(err.to_string().contains("LOCK_JOB/a/b"));
        assert!(err.to_string().contains("lease revoked"));
    }

    #[test]
    fn not_owner_is_pattern_matchable() {
        let err = StoreError::NotOwner;
        assert!(matches!(err, StoreError::NotOwner));
    }
}
