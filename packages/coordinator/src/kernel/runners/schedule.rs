//! Applying schedule changes to installed cron jobs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::common::error::Result;
use crate::common::resource::ResourceId;
use crate::kernel::runners::kubernetes::update_cron_schedule;

/// Applies a schedule change to whatever is driving the resource's update
/// job.
#[async_trait]
pub trait ScheduleReconciler: Send + Sync {
    async fn apply_schedule(&self, id: &ResourceId, schedule: &str) -> Result<()>;
}

/// Rewrites the backing Kubernetes CronJob's `spec.schedule`.
pub struct KubernetesScheduleReconciler {
    client: kube::Client,
    namespace: String,
    job_prefix: String,
}

impl KubernetesScheduleReconciler {
    pub fn new(
        client: kube::Client,
        namespace: impl Into<String>,
        job_prefix: impl Into<String>,
    ) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            job_prefix: job_prefix.into(),
        }
    }
}

#[async_trait]
impl ScheduleReconciler for KubernetesScheduleReconciler {
    async fn apply_schedule(&self, id: &ResourceId, schedule: &str) -> Result<()> {
        update_cron_schedule(
            self.client.clone(),
            &self.namespace,
            id,
            &self.job_prefix,
            schedule,
        )
        .await
    }
}

/// Records applied schedules; local mode and tests.
#[derive(Default)]
pub struct LocalScheduleReconciler {
    schedules: Mutex<HashMap<ResourceId, String>>,
}

impl LocalScheduleReconciler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn schedule_of(&self, id: &ResourceId) -> Option<String> {
        self.schedules.lock().await.get(id).cloned()
    }
}

#[async_trait]
impl ScheduleReconciler for LocalScheduleReconciler {
    async fn apply_schedule(&self, id: &ResourceId, schedule: &str) -> Result<()> {
        self.schedules
            .lock()
            .await
            .insert(id.clone(), schedule.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::resource::ResourceType;

    #[tokio::test]
    async fn local_reconciler_records_the_latest_schedule() {
        let reconciler = LocalScheduleReconciler::new();
        let id = ResourceId::new("f", "v", ResourceType::FeatureVariant);

        reconciler.apply_schedule(&id, "0 * * * *").await.unwrap();
        reconciler.apply_schedule(&id, "*/5 * * * *").await.unwrap();
        assert_eq!(
            reconciler.schedule_of(&id).await.as_deref(),
            Some("*/5 * * * *")
        );
    }
}
