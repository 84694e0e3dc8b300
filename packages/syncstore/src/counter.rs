//! Monotonic per-namespace counters.
//!
//! `next_id` reads `FFSync/ID/<namespace>`, adds one, and writes it back,
//! all under the namespace lock, so ids are strictly increasing across
//! restarts and across processes sharing the store.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, StoreError};
use crate::store::{Session, StateStore, TxnOp};

const ID_PREFIX: &str = "FFSync/ID/";
const LOCK_PREFIX: &str = "FFSync/LOCK/";

/// Strictly increasing id generator over any [`StateStore`].
pub struct OrderedIdGenerator {
    store: Arc<dyn StateStore>,
    session: Session,
}

impl OrderedIdGenerator {
    /// Open a generator with its own session. The session's lease only
    /// fences the short counter critical section, so a modest TTL is fine.
    pub async fn new(store: Arc<dyn StateStore>, session_ttl: Duration) -> Result<Self> {
        let session = store.new_session(session_ttl).await?;
        Ok(Self { store, session })
    }

    /// Next id for `namespace`, starting at 1 for a fresh namespace.
    pub async fn next_id(&self, namespace: &str) -> Result<u64> {
        if namespace.is_empty() {
            return Err(StoreError::EmptyKey);
        }
        let key = format!("{ID_PREFIX}{namespace}");
        let lock_name = format!("{LOCK_PREFIX}{namespace}");

        let guard = self.store.lock(&self.session, &lock_name).await?;
        let result = self.bump(&guard, &key).await;
        // Release before surfacing any error so a failed parse doesn't
        // wedge the namespace.
        let unlocked = self.store.unlock(&guard).await;
        let id = result?;
        unlocked?;
        Ok(id)
    }

    async fn bump(&self, guard: &crate::store::LockGuard, key: &str) -> Result<u64> {
        let current = match self.store.guarded_get(guard, key).await? {
            Some(raw) => String::from_utf8(raw)
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| StoreError::Backend(format!("corrupt counter at {key}")))?,
            None => 0,
        };
        let next = current + 1;
        self.store
            .guarded_txn(guard, vec![TxnOp::put(key, next.to_string().into_bytes())])
            .await?;
        Ok(next)
    }

    /// Close the generator's session.
    pub async fn close(self) -> Result<()> {
        self.store.end_session(&self.session).await
    }
}
