//! Dependency container for the coordinator.
//!
//! Everything a handler touches comes through here: the state store, the
//! metadata facade, the provider catalog, the runner registry, and the
//! schedule reconciler. Production wires etcd + the remote metadata +
//! Kubernetes factories; local mode and tests wire the in-memory
//! implementations. Handler code cannot tell the difference.

use std::sync::{Arc, Mutex};

use syncstore::StateStore;

use crate::config::Config;
use crate::kernel::metadata::MetadataServer;
use crate::kernel::runners::{Runner, RunnerRegistry, ScheduleReconciler};
use crate::kernel::stores::ProviderCatalog;

#[derive(Clone)]
pub struct CoordinatorDeps {
    pub store: Arc<dyn StateStore>,
    pub metadata: Arc<dyn MetadataServer>,
    pub catalog: Arc<dyn ProviderCatalog>,
    pub runners: Arc<RunnerRegistry>,
    pub schedules: Arc<dyn ScheduleReconciler>,
    /// Installed cron runners, retained for the life of the process. An
    /// in-process cron dies with its runner; Kubernetes CronJobs live
    /// server-side, but retaining those handles too costs nothing.
    pub scheduled_runners: Arc<Mutex<Vec<Arc<dyn Runner>>>>,
    pub config: Config,
}

impl CoordinatorDeps {
    pub fn retain_scheduled(&self, runner: Arc<dyn Runner>) {
        self.scheduled_runners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(runner);
    }
}
