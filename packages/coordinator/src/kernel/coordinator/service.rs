//! The coordinator service.
//!
//! Three long-lived prefix watchers, each in its own task:
//!
//! ```text
//! Coordinator
//!     ├─► watch JOB_           new-job handler (execute_job)
//!     ├─► watch UPDATE_EVENT_  update-completion handler
//!     └─► watch SCHEDULEJOB_   schedule-change handler
//! ```
//!
//! Every received event spawns an independent task; isolation between
//! jobs comes from the per-job locks, not from the watcher. Watch streams
//! auto-reconnect with capped backoff, and every (re)connect starts with a
//! prefix re-scan so events missed during a gap are replayed. Re-delivery
//! is safe everywhere: handlers are idempotent under their locks.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use syncstore::{KeyValue, WatchEvent};

use crate::common::error::{Error, Result};
use crate::common::resource::{JOB_PREFIX, SCHEDULE_JOB_PREFIX, UPDATE_EVENT_PREFIX};
use crate::kernel::coordinator::{events, execute};
use crate::kernel::deps::CoordinatorDeps;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Long-running control loop over the three coordination channels.
pub struct Coordinator {
    deps: Arc<CoordinatorDeps>,
}

impl Coordinator {
    pub fn new(deps: Arc<CoordinatorDeps>) -> Self {
        Self { deps }
    }

    /// Run all three watchers until the token fires.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!("coordinator starting");

        let jobs = tokio::spawn(watch_channel(
            self.deps.clone(),
            JOB_PREFIX,
            shutdown.clone(),
            on_job_event,
        ));
        let updates = tokio::spawn(watch_channel(
            self.deps.clone(),
            UPDATE_EVENT_PREFIX,
            shutdown.clone(),
            on_update_event,
        ));
        let schedules = tokio::spawn(watch_channel(
            self.deps.clone(),
            SCHEDULE_JOB_PREFIX,
            shutdown.clone(),
            on_schedule_event,
        ));

        for handle in [jobs, updates, schedules] {
            if let Err(err) = handle.await {
                error!(error = %err, "watcher task panicked");
            }
        }
        info!("coordinator stopped");
        Ok(())
    }

    /// Run until ctrl-c.
    pub async fn run_until_shutdown(self) -> Result<()> {
        let shutdown = CancellationToken::new();
        let signal_token = shutdown.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("received shutdown signal");
            signal_token.cancel();
        });
        self.run(shutdown).await
    }
}

/// Watch one prefix channel forever: scan, then stream, then on any error
/// back off, re-scan, and re-watch.
async fn watch_channel<H, Fut>(
    deps: Arc<CoordinatorDeps>,
    prefix: &'static str,
    shutdown: CancellationToken,
    handler: H,
) where
    H: Fn(Arc<CoordinatorDeps>, KeyValue) -> Fut + Send + Sync + Copy + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    info!(prefix, "watcher starting");
    let mut backoff = INITIAL_BACKOFF;

    while !shutdown.is_cancelled() {
        // The scan picks up keys written before we were watching - both at
        // startup and after a watch gap.
        match deps.store.get_prefix(prefix).await {
            Ok(entries) => {
                for kv in entries {
                    tokio::spawn(handler(deps.clone(), kv));
                }
            }
            Err(err) => {
                warn!(prefix, error = %err, "prefix scan failed");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }
        }

        let mut stream = match deps.store.watch_prefix(prefix).await {
            Ok(stream) => {
                backoff = INITIAL_BACKOFF;
                stream
            }
            Err(err) => {
                warn!(prefix, error = %err, "watch failed to start");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }
        };

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(prefix, "watcher stopping");
                    return;
                }
                next = stream.next() => match next {
                    Some(Ok(WatchEvent::Put(kv))) => {
                        tokio::spawn(handler(deps.clone(), kv));
                    }
                    Some(Ok(WatchEvent::Delete(_))) => {}
                    Some(Err(err)) => {
                        warn!(prefix, error = %err, "watch stream error; reconnecting");
                        break;
                    }
                    None => {
                        warn!(prefix, "watch stream ended; reconnecting");
                        break;
                    }
                }
            }
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
    info!(prefix, "watcher stopped");
}

async fn on_job_event(deps: Arc<CoordinatorDeps>, kv: KeyValue) {
    let key = kv.key;
    debug!(job_key = %key, "job event");
    match execute::execute_job(&deps, &key).await {
        Ok(()) => {}
        Err(Error::JobDoesNotExist(_)) => {
            debug!(job_key = %key, "job already handled");
        }
        Err(Error::ResourceAlreadyFailed(id)) => {
            warn!(job_key = %key, resource = %id, "resource already failed; not re-executing");
        }
        Err(Error::NotOwner) => {
            warn!(job_key = %key, "lost lock mid-execution; job will be re-picked");
        }
        Err(err) => {
            error!(job_key = %key, error = %err, "job failed");
        }
    }
}

async fn on_update_event(deps: Arc<CoordinatorDeps>, kv: KeyValue) {
    match events::signal_resource_update(&deps, &kv.key, &kv.value).await {
        Ok(()) => {}
        Err(err) => error!(key = %kv.key, error = %err, "update event handling failed"),
    }
}

async fn on_schedule_event(deps: Arc<CoordinatorDeps>, kv: KeyValue) {
    match events::change_job_schedule(&deps, &kv.key, &kv.value).await {
        Ok(()) => {}
        Err(err) => error!(key = %kv.key, error = %err, "schedule change failed"),
    }
}
