//! The `StateStore` contract and its supporting types.
//!
//! The store is the single coordination point of the control plane: job
//! records, lock ownership, update events, and counters all live behind
//! this trait. Implementations must provide linearizable reads of
//! committed values; the owner-guarded transaction is the only mutation
//! primitive workers may use while holding a lock.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// A key together with its stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
}

/// A single change observed by a prefix watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A key under the watched prefix was created or overwritten.
    Put(KeyValue),
    /// A key under the watched prefix was deleted.
    Delete(String),
}

impl WatchEvent {
    /// The key this event concerns.
    pub fn key(&self) -> &str {
        match self {
            WatchEvent::Put(kv) => &kv.key,
            WatchEvent::Delete(key) => key,
        }
    }
}

/// Stream of watch events. Ends when the backend drops the watch; callers
/// that need durability must re-establish the watch and re-scan the prefix.
pub type WatchStream = Pin<Box<dyn Stream<Item = Result<WatchEvent>> + Send>>;

/// A TTL-leased session.
///
/// Locks are fenced by the session lease: when the lease expires every lock
/// held under it is released and every owner-guarded write fails with
/// `NotOwner`. Backends keep the lease alive in the background until the
/// session is ended (or the process dies, which is the point).
#[derive(Debug, Clone)]
pub struct Session {
    /// Backend lease identifier.
    pub id: i64,
    keepalive: CancellationToken,
}

impl Session {
    pub(crate) fn new(id: i64) -> Self {
        Self {
            id,
            keepalive: CancellationToken::new(),
        }
    }

    /// Token cancelled when the session ends; backends stop refreshing the
    /// lease once it fires.
    pub(crate) fn keepalive_token(&self) -> CancellationToken {
        self.keepalive.clone()
    }

    pub(crate) fn stop_keepalive(&self) {
        self.keepalive.cancel();
    }
}

/// Proof of lock ownership.
///
/// `owner_key` exists in the store only while the lock is held; guarded
/// transactions compare against it, so a lapsed holder cannot write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGuard {
    /// The logical lock name passed to [`StateStore::lock`].
    pub name: String,
    /// Backend ownership key, unique to this acquisition.
    pub owner_key: String,
    /// The session whose lease fences this lock.
    pub session_id: i64,
}

/// A mutation inside an owner-guarded transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOp {
    Put { key: String, value: Vec<u8> },
    Delete { key: String },
}

impl TxnOp {
    pub fn put(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        TxnOp::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        TxnOp::Delete { key: key.into() }
    }
}

/// Ordered KV with watches, sessions, and lease-fenced locks.
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    /// Read a single key. `Ok(None)` when absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a single key unconditionally.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Delete a single key unconditionally. Deleting an absent key is not
    /// an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// All key-value pairs whose key starts with `prefix`, in key order.
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>>;

    /// Watch for changes under `prefix`, starting from now. The stream
    /// carries no history; callers pair it with an initial `get_prefix`.
    async fn watch_prefix(&self, prefix: &str) -> Result<WatchStream>;

    /// Open a session with the given lease TTL. The backend renews the
    /// lease until [`StateStore::end_session`] is called.
    async fn new_session(&self, ttl: Duration) -> Result<Session>;

    /// End a session, revoking its lease and releasing its locks.
    async fn end_session(&self, session: &Session) -> Result<()>;

    /// Whether the session's lease is still live.
    async fn session_alive(&self, session: &Session) -> Result<bool>;

    /// Acquire the named lock, blocking until it is granted. The lock is
    /// bound to the session's lease.
    async fn lock(&self, session: &Session, name: &str) -> Result<LockGuard>;

    /// Release a held lock. Fails with `NotOwner` if the guard is stale.
    async fn unlock(&self, lock: &LockGuard) -> Result<()>;

    /// Read `key`, but only if `owner` still holds its lock. Fails with
    /// `NotOwner` otherwise.
    async fn guarded_get(&self, owner: &LockGuard, key: &str) -> Result<Option<Vec<u8>>>;

    /// Apply `ops` atomically iff `owner` still holds its lock. Fails with
    /// `NotOwner` otherwise; on failure nothing is written.
    async fn guarded_txn(&self, owner: &LockGuard, ops: Vec<TxnOp>) -> Result<()>;
}
