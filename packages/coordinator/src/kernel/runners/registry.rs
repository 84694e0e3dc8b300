//! The runner registry.
//!
//! Maps runner names to factory functions `(config bytes) -> Runner`.
//! Handlers never construct runners directly; they serialize a config and
//! ask the registry, so the same handler code drives in-process runners in
//! local mode and Kubernetes jobs in production.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::common::error::{Error, Result};
use crate::kernel::runners::configs::RunnerName;
use crate::kernel::runners::runner::Runner;

/// Builds a runner from its serialized config.
pub type RunnerFactory = Box<dyn Fn(&[u8]) -> Result<Arc<dyn Runner>> + Send + Sync>;

/// Named runner factories. Duplicate registration fails; unknown names
/// fail with `JobDoesNotExist`.
#[derive(Default)]
pub struct RunnerRegistry {
    factories: RwLock<HashMap<RunnerName, RunnerFactory>>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: RunnerName, factory: RunnerFactory) -> Result<()> {
        let mut factories = self.factories.write().unwrap_or_else(|e| e.into_inner());
        if factories.contains_key(&name) {
            return Err(Error::internal(format!("runner {name} already registered")));
        }
        factories.insert(name, factory);
        Ok(())
    }

    pub fn create(&self, name: RunnerName, config: &[u8]) -> Result<Arc<dyn Runner>> {
        let factories = self.factories.read().unwrap_or_else(|e| e.into_inner());
        let factory = factories
            .get(&name)
            .ok_or_else(|| Error::JobDoesNotExist(name.to_string()))?;
        factory(config)
    }

    pub fn is_registered(&self, name: RunnerName) -> bool {
        self.factories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&name)
    }
}
