//! In-process `StateStore` backend.
//!
//! Backs local mode and the test suites. Semantics mirror the etcd
//! backend: ordered keys, prefix watches that begin at the moment of
//! registration, sessions with TTL leases refreshed in the background, and
//! locks that are released the instant their session lapses.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::store::{KeyValue, LockGuard, Session, StateStore, TxnOp, WatchEvent, WatchStream};

/// How often the sweeper looks for lapsed sessions.
const SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// How often a session's deadline is pushed forward while it is alive.
fn refresh_interval(ttl: Duration) -> Duration {
    (ttl / 3).max(Duration::from_millis(50))
}

struct PrefixWatcher {
    prefix: String,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

struct SessionState {
    deadline: Instant,
    ttl: Duration,
}

struct HeldLock {
    owner_key: String,
    session_id: i64,
}

#[derive(Default)]
struct State {
    data: BTreeMap<String, Vec<u8>>,
    watchers: Vec<PrefixWatcher>,
    sessions: HashMap<i64, SessionState>,
    locks: HashMap<String, HeldLock>,
    next_session_id: i64,
    next_acquisition: u64,
}

impl State {
    fn session_live(&self, session_id: i64, now: Instant) -> bool {
        self.sessions
            .get(&session_id)
            .map(|s| s.deadline > now)
            .unwrap_or(false)
    }

    fn owner_holds(&self, guard: &LockGuard, now: Instant) -> bool {
        self.session_live(guard.session_id, now)
            && self
                .locks
                .get(&guard.name)
                .map(|held| held.owner_key == guard.owner_key)
                .unwrap_or(false)
    }

    fn broadcast(&mut self, event: WatchEvent) {
        self.watchers
            .retain(|w| !event.key().starts_with(&w.prefix) || w.tx.send(event.clone()).is_ok());
    }

    fn apply(&mut self, op: TxnOp) {
        match op {
            TxnOp::Put { key, value } => {
                self.data.insert(key.clone(), value.clone());
                self.broadcast(WatchEvent::Put(KeyValue { key, value }));
            }
            TxnOp::Delete { key } => {
                if self.data.remove(&key).is_some() {
                    self.broadcast(WatchEvent::Delete(key));
                }
            }
        }
    }

    /// Drop every lock held under `session_id`. Returns how many were freed.
    fn release_session_locks(&mut self, session_id: i64) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, held| held.session_id != session_id);
        before - self.locks.len()
    }
}

struct Inner {
    state: Mutex<State>,
    lock_released: Notify,
    sweeper_started: AtomicBool,
}

/// In-memory store.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                lock_released: Notify::new(),
                sweeper_started: AtomicBool::new(false),
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Forcibly lapse a session, releasing its locks immediately.
    ///
    /// Test hook: this is how suites simulate a worker losing its lease
    /// mid-flight without waiting out a TTL.
    pub fn expire_session(&self, session_id: i64) {
        let released = {
            let mut st = self.state();
            st.sessions.remove(&session_id);
            st.release_session_locks(session_id)
        };
        if released > 0 {
            self.inner.lock_released.notify_waiters();
        }
        debug!(session_id, released, "session expired");
    }

    /// Spawn the sweeper on first use. Holds only a weak reference so the
    /// task ends when the store is dropped.
    fn ensure_sweeper(&self) {
        if self
            .inner
            .sweeper_started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(SWEEP_INTERVAL).await;
                let Some(inner) = weak.upgrade() else { break };
                let released = {
                    let mut st = inner.state.lock().unwrap_or_else(|e| e.into_inner());
                    let now = Instant::now();
                    let expired: Vec<i64> = st
                        .sessions
                        .iter()
                        .filter(|(_, s)| s.deadline <= now)
                        .map(|(id, _)| *id)
                        .collect();
                    let mut released = 0;
                    for id in expired {
                        st.sessions.remove(&id);
                        released += st.release_session_locks(id);
                        debug!(session_id = id, "lease lapsed");
                    }
                    released
                };
                if released > 0 {
                    inner.lock_released.notify_waiters();
                }
            }
        });
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if key.is_empty() {
            return Err(StoreError::EmptyKey);
        }
        Ok(self.state().data.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        if key.is_empty() {
            return Err(StoreError::EmptyKey);
        }
        self.state().apply(TxnOp::put(key, value));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(StoreError::EmptyKey);
        }
        self.state().apply(TxnOp::delete(key));
        Ok(())
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        let st = self.state();
        Ok(st
            .data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| KeyValue {
                key: k.clone(),
                value: v.clone(),
            })
            .collect())
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<WatchStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state().watchers.push(PrefixWatcher {
            prefix: prefix.to_string(),
            tx,
        });
        Ok(Box::pin(UnboundedReceiverStream::new(rx).map(Ok)))
    }

    async fn new_session(&self, ttl: Duration) -> Result<Session> {
        self.ensure_sweeper();
        let id = {
            let mut st = self.state();
            st.next_session_id += 1;
            let id = st.next_session_id;
            st.sessions.insert(
                id,
                SessionState {
                    deadline: Instant::now() + ttl,
                    ttl,
                },
            );
            id
        };
        let session = Session::new(id);

        // Background refresh stands in for the holder's liveness: it stops
        // when the session is ended or the session entry disappears.
        let token = session.keepalive_token();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let interval = refresh_interval(ttl);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                let Some(inner) = weak.upgrade() else { break };
                let mut st = inner.state.lock().unwrap_or_else(|e| e.into_inner());
                match st.sessions.get_mut(&id) {
                    Some(s) => s.deadline = Instant::now() + s.ttl,
                    None => break,
                }
            }
        });
        Ok(session)
    }

    async fn end_session(&self, session: &Session) -> Result<()> {
        session.stop_keepalive();
        self.expire_session(session.id);
        Ok(())
    }

    async fn session_alive(&self, session: &Session) -> Result<bool> {
        Ok(self.state().session_live(session.id, Instant::now()))
    }

    async fn lock(&self, session: &Session, name: &str) -> Result<LockGuard> {
        if name.is_empty() {
            return Err(StoreError::EmptyKey);
        }
        loop {
            let released = self.inner.lock_released.notified();
            {
                let mut st = self.state();
                let now = Instant::now();
                if !st.session_live(session.id, now) {
                    return Err(StoreError::SessionExpired(session.id));
                }
                if !st.locks.contains_key(name) {
                    st.next_acquisition += 1;
                    let owner_key = format!("{}/{:x}/{:x}", name, session.id, st.next_acquisition);
                    st.locks.insert(
                        name.to_string(),
                        HeldLock {
                            owner_key: owner_key.clone(),
                            session_id: session.id,
                        },
                    );
                    return Ok(LockGuard {
                        name: name.to_string(),
                        owner_key,
                        session_id: session.id,
                    });
                }
            }
            // The timeout covers notifications that fire before this future
            // is first polled; progress never depends on the wakeup alone.
            let _ = tokio::time::timeout(Duration::from_millis(50), released).await;
        }
    }

    async fn unlock(&self, lock: &LockGuard) -> Result<()> {
        {
            let mut st = self.state();
            let holds = st
                .locks
                .get(&lock.name)
                .map(|held| held.owner_key == lock.owner_key)
                .unwrap_or(false);
            if !holds {
                return Err(StoreError::NotOwner);
            }
            st.locks.remove(&lock.name);
        }
        self.inner.lock_released.notify_waiters();
        Ok(())
    }

    async fn guarded_get(&self, owner: &LockGuard, key: &str) -> Result<Option<Vec<u8>>> {
        if key.is_empty() {
            return Err(StoreError::EmptyKey);
        }
        let st = self.state();
        if !st.owner_holds(owner, Instant::now()) {
            return Err(StoreError::NotOwner);
        }
        Ok(st.data.get(key).cloned())
    }

    async fn guarded_txn(&self, owner: &LockGuard, ops: Vec<TxnOp>) -> Result<()> {
        let mut st = self.state();
        if !st.owner_holds(owner, Instant::now()) {
            return Err(StoreError::NotOwner);
        }
        for op in ops {
            st.apply(op);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn ttl() -> Duration {
        Duration::from_secs(10)
    }

    #[tokio::test]
    async fn get_put_delete_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.get("k").await.unwrap().is_none());

        store.put("k", b"v".to_vec()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));

        store.delete("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_key_rejected() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get("").await.unwrap_err(),
            StoreError::EmptyKey
        ));
        assert!(matches!(
            store.put("", vec![]).await.unwrap_err(),
            StoreError::EmptyKey
        ));
    }

    #[tokio::test]
    async fn prefix_scan_is_ordered_and_bounded() {
        let store = MemoryStore::new();
        store.put("JOB_B/x/y", b"2".to_vec()).await.unwrap();
        store.put("JOB_A/x/y", b"1".to_vec()).await.unwrap();
        store.put("LOCK_JOB_A/x/y", b"3".to_vec()).await.unwrap();

        let jobs = store.get_prefix("JOB_").await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].key, "JOB_A/x/y");
        assert_eq!(jobs[1].key, "JOB_B/x/y");
    }

    #[tokio::test]
    async fn watch_sees_puts_and_deletes_under_prefix() {
        let store = MemoryStore::new();
        let mut watch = store.watch_prefix("JOB_").await.unwrap();

        store.put("JOB_A/x/y", b"1".to_vec()).await.unwrap();
        store.put("OTHER/x", b"ignored".to_vec()).await.unwrap();
        store.delete("JOB_A/x/y").await.unwrap();

        let first = watch.next().await.unwrap().unwrap();
        assert!(matches!(first, WatchEvent::Put(ref kv) if kv.key == "JOB_A/x/y"));
        let second = watch.next().await.unwrap().unwrap();
        assert_eq!(second, WatchEvent::Delete("JOB_A/x/y".into()));
    }

    #[tokio::test]
    async fn lock_excludes_second_holder_until_unlock() {
        let store = MemoryStore::new();
        let s1 = store.new_session(ttl()).await.unwrap();
        let s2 = store.new_session(ttl()).await.unwrap();

        let guard = store.lock(&s1, "L").await.unwrap();

        let store2 = store.clone();
        let s2c = s2.clone();
        let contender = tokio::spawn(async move { store2.lock(&s2c, "L").await });

        // The contender must still be blocked.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!contender.is_finished());

        store.unlock(&guard).await.unwrap();
        let second = contender.await.unwrap().unwrap();
        assert_eq!(second.session_id, s2.id);
    }

    #[tokio::test]
    async fn unlock_with_stale_guard_fails() {
        let store = MemoryStore::new();
        let session = store.new_session(ttl()).await.unwrap();
        let guard = store.lock(&session, "L").await.unwrap();
        store.unlock(&guard).await.unwrap();

        assert!(matches!(
            store.unlock(&guard).await.unwrap_err(),
            StoreError::NotOwner
        ));
    }

    #[tokio::test]
    async fn guarded_txn_fails_after_session_expiry() {
        let store = MemoryStore::new();
        let session = store.new_session(ttl()).await.unwrap();
        let guard = store.lock(&session, "L").await.unwrap();

        store
            .guarded_txn(&guard, vec![TxnOp::put("k", b"v".to_vec())])
            .await
            .unwrap();

        store.expire_session(session.id);

        let err = store
            .guarded_txn(&guard, vec![TxnOp::put("k", b"w".to_vec())])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotOwner));
        // The first write survives, the second never landed.
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn expiry_releases_lock_to_waiters() {
        let store = MemoryStore::new();
        let s1 = store.new_session(ttl()).await.unwrap();
        let s2 = store.new_session(ttl()).await.unwrap();
        let _guard = store.lock(&s1, "L").await.unwrap();

        store.expire_session(s1.id);
        let reacquired = store.lock(&s2, "L").await.unwrap();
        assert_eq!(reacquired.session_id, s2.id);
    }

    /// Mutual exclusion under contention: many tasks take turns on one
    /// lock; at no instant do two of them believe they hold it.
    #[tokio::test]
    async fn lock_stress_single_holder() {
        const CONTENDERS: usize = 1000;

        let store = MemoryStore::new();
        let holders = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::with_capacity(CONTENDERS);
        for _ in 0..CONTENDERS {
            let store = store.clone();
            let holders = holders.clone();
            let completed = completed.clone();
            handles.push(tokio::spawn(async move {
                let session = store.new_session(Duration::from_secs(30)).await.unwrap();
                let guard = store.lock(&session, "STRESS").await.unwrap();

                assert_eq!(holders.fetch_add(1, Ordering::SeqCst), 0);
                tokio::task::yield_now().await;
                assert_eq!(holders.fetch_sub(1, Ordering::SeqCst), 1);

                store.unlock(&guard).await.unwrap();
                // A second unlock on the same guard must not succeed.
                assert!(store.unlock(&guard).await.is_err());
                store.end_session(&session).await.unwrap();
                completed.fetch_add(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(completed.load(Ordering::SeqCst), CONTENDERS);
    }
}
