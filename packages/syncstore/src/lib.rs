//! Coordination substrate for the feature store control plane.
//!
//! This crate owns interfaces and backends only. Policy decisions (what a
//! job is, when to retry, how long to wait on a dependency) belong to the
//! application sitting on top.
//!
//! - [`StateStore`] - Ordered KV with prefix scans, prefix watches,
//!   TTL-leased sessions, lease-bound locks, and owner-guarded transactions
//! - [`MemoryStore`] - In-process backend for tests and local mode
//! - [`EtcdStore`] - etcd-backed production backend
//! - [`OrderedIdGenerator`] - Strictly increasing per-namespace counter
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use syncstore::{MemoryStore, StateStore, TxnOp};
//!
//! let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
//! let session = store.new_session(Duration::from_secs(10)).await?;
//! let lock = store.lock(&session, "LOCK_JOB_FEATURE_VARIANT/f/v").await?;
//!
//! // All mutations go through the owner guard: if the lease is lost the
//! // write fails with NotOwner instead of corrupting another holder's work.
//! store
//!     .guarded_txn(&lock, vec![TxnOp::put("JOB_FEATURE_VARIANT/f/v", payload)])
//!     .await?;
//! store.unlock(&lock).await?;
//! ```

mod counter;
mod error;
mod etcd;
mod memory;
mod store;

pub use counter::OrderedIdGenerator;
pub use error::{Result, StoreError};
pub use etcd::EtcdStore;
pub use memory::MemoryStore;
pub use store::{KeyValue, LockGuard, Session, StateStore, TxnOp, WatchEvent, WatchStream};
