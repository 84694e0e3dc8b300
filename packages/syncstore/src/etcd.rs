//! etcd-backed `StateStore`.
//!
//! The production backend. Sessions are etcd leases kept alive by a
//! background task; locks go through etcd's lock RPC with the lease
//! attached, so a lapsed lease releases the lock server-side; guarded
//! transactions compare on the lock ownership key's create revision.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{
    Client, Compare, CompareOp, EventType, GetOptions, LockOptions, Txn, TxnOp as EtcdTxnOp,
    TxnOpResponse, WatchOptions,
};
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::store::{KeyValue, LockGuard, Session, StateStore, TxnOp, WatchEvent, WatchStream};

/// etcd-backed store.
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
}

impl EtcdStore {
    /// Wrap an already-connected client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect to the given endpoints.
    pub async fn connect(endpoints: &[String]) -> Result<Self> {
        let client = Client::connect(endpoints, None).await?;
        Ok(Self::new(client))
    }

    /// The ownership guard used by every fenced write: the lock key exists
    /// only while the caller holds the lock.
    fn owner_compare(owner: &LockGuard) -> Compare {
        Compare::create_revision(owner.owner_key.as_str(), CompareOp::Greater, 0)
    }
}

#[async_trait]
impl StateStore for EtcdStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        if key.is_empty() {
            return Err(StoreError::EmptyKey);
        }
        let mut kv = self.client.kv_client();
        let resp = kv.get(key, None).await?;
        Ok(resp.kvs().first().map(|kv| kv.value().to_vec()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        if key.is_empty() {
            return Err(StoreError::EmptyKey);
        }
        let mut kv = self.client.kv_client();
        kv.put(key, value, None).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(StoreError::EmptyKey);
        }
        let mut kv = self.client.kv_client();
        kv.delete(key, None).await?;
        Ok(())
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        let mut kv = self.client.kv_client();
        let resp = kv
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await?;
        Ok(resp
            .kvs()
            .iter()
            .map(|kv| KeyValue {
                key: String::from_utf8_lossy(kv.key()).into_owned(),
                value: kv.value().to_vec(),
            })
            .collect())
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<WatchStream> {
        let mut watch_client = self.client.watch_client();
        let (watcher, stream) = watch_client
            .watch(prefix, Some(WatchOptions::new().with_prefix()))
            .await?;

        struct WatchState {
            // Dropping the watcher cancels the server-side watch, so it
            // rides along with the stream.
            _watcher: etcd_client::Watcher,
            stream: etcd_client::WatchStream,
            pending: VecDeque<WatchEvent>,
        }

        let state = WatchState {
            _watcher: watcher,
            stream,
            pending: VecDeque::new(),
        };

        Ok(Box::pin(futures::stream::unfold(state, |mut st| async move {
            loop {
                if let Some(event) = st.pending.pop_front() {
                    return Some((Ok(event), st));
                }
                match st.stream.message().await {
                    Ok(Some(resp)) => {
                        for event in resp.events() {
                            let Some(kv) = event.kv() else { continue };
                            let key = String::from_utf8_lossy(kv.key()).into_owned();
                            let mapped = match event.event_type() {
                                EventType::Put => WatchEvent::Put(KeyValue {
                                    key,
                                    value: kv.value().to_vec(),
                                }),
                                EventType::Delete => WatchEvent::Delete(key),
                            };
                            st.pending.push_back(mapped);
                        }
                    }
                    Ok(None) => return None,
                    Err(err) => return Some((Err(err.into()), st)),
                }
            }
        })))
    }

    async fn new_session(&self, ttl: Duration) -> Result<Session> {
        let ttl_secs = ttl.as_secs().max(1) as i64;
        let mut lease = self.client.lease_client();
        let granted = lease.grant(ttl_secs, None).await?;
        let id = granted.id();
        let session = Session::new(id);

        let (mut keeper, mut responses) = lease.keep_alive(id).await?;
        let token = session.keepalive_token();
        let interval = Duration::from_secs((ttl_secs as u64 / 3).max(1));
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                if let Err(err) = keeper.keep_alive().await {
                    warn!(lease = id, error = %err, "lease keepalive send failed");
                    break;
                }
                match responses.message().await {
                    Ok(Some(resp)) if resp.ttl() > 0 => {}
                    Ok(_) => {
                        warn!(lease = id, "lease no longer renewable");
                        break;
                    }
                    Err(err) => {
                        warn!(lease = id, error = %err, "lease keepalive stream failed");
                        break;
                    }
                }
            }
            debug!(lease = id, "keepalive stopped");
        });

        Ok(session)
    }

    async fn end_session(&self, session: &Session) -> Result<()> {
        session.stop_keepalive();
        let mut lease = self.client.lease_client();
        lease.revoke(session.id).await?;
        Ok(())
    }

    async fn session_alive(&self, session: &Session) -> Result<bool> {
        let mut lease = self.client.lease_client();
        let resp = lease.time_to_live(session.id, None).await?;
        Ok(resp.ttl() > 0)
    }

    async fn lock(&self, session: &Session, name: &str) -> Result<LockGuard> {
        if name.is_empty() {
            return Err(StoreError::EmptyKey);
        }
        let mut lock_client = self.client.lock_client();
        let resp = lock_client
            .lock(name, Some(LockOptions::new().with_lease(session.id)))
            .await
            .map_err(|err| StoreError::LockAcquisitionFailed {
                name: name.to_string(),
                reason: err.to_string(),
            })?;
        Ok(LockGuard {
            name: name.to_string(),
            owner_key: String::from_utf8_lossy(resp.key()).into_owned(),
            session_id: session.id,
        })
    }

    async fn unlock(&self, lock: &LockGuard) -> Result<()> {
        let mut kv = self.client.kv_client();
        let held = kv.get(lock.owner_key.as_str(), None).await?;
        if held.kvs().is_empty() {
            return Err(StoreError::NotOwner);
        }
        let mut lock_client = self.client.lock_client();
        lock_client.unlock(lock.owner_key.as_str()).await?;
        Ok(())
    }

    async fn guarded_get(&self, owner: &LockGuard, key: &str) -> Result<Option<Vec<u8>>> {
        if key.is_empty() {
            return Err(StoreError::EmptyKey);
        }
        let mut kv = self.client.kv_client();
        let txn = Txn::new()
            .when(vec![Self::owner_compare(owner)])
            .and_then(vec![EtcdTxnOp::get(key, None)]);
        let resp = kv.txn(txn).await?;
        if !resp.succeeded() {
            return Err(StoreError::NotOwner);
        }
        for op in resp.op_responses() {
            if let TxnOpResponse::Get(get) = op {
                return Ok(get.kvs().first().map(|kv| kv.value().to_vec()));
            }
        }
        Ok(None)
    }

    async fn guarded_txn(&self, owner: &LockGuard, ops: Vec<TxnOp>) -> Result<()> {
        let mapped: Vec<EtcdTxnOp> = ops
            .into_iter()
            .map(|op| match op {
                TxnOp::Put { key, value } => EtcdTxnOp::put(key, value, None),
                TxnOp::Delete { key } => EtcdTxnOp::delete(key, None),
            })
            .collect();
        let mut kv = self.client.kv_client();
        let txn = Txn::new()
            .when(vec![Self::owner_compare(owner)])
            .and_then(mapped);
        let resp = kv.txn(txn).await?;
        if !resp.succeeded() {
            return Err(StoreError::NotOwner);
        }
        Ok(())
    }
}
