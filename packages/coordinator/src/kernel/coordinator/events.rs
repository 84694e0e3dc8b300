//! Update-completion and schedule-change handlers.

use syncstore::TxnOp;
use tracing::{info, warn};

use crate::common::error::Result;
use crate::common::resource::lock_key;
use crate::kernel::coordinator::jobs::{ResourceUpdatedEvent, ScheduleChangeJob};
use crate::kernel::deps::CoordinatorDeps;
use crate::kernel::metadata::Status;

/// A scheduled update finished: mark the resource `READY` and consume the
/// event key.
pub async fn signal_resource_update(
    deps: &CoordinatorDeps,
    key: &str,
    value: &[u8],
) -> Result<()> {
    let event: ResourceUpdatedEvent = serde_json::from_slice(value)?;

    let session = deps.store.new_session(deps.config.session_ttl).await?;
    let lock = deps.store.lock(&session, &lock_key(key)).await?;

    let result = async {
        deps.metadata
            .set_status(&event.resource_id, Status::Ready, None)
            .await?;
        deps.store
            .guarded_txn(&lock, vec![TxnOp::delete(key)])
            .await?;
        info!(
            resource = %event.resource_id,
            completed = %event.completed,
            "scheduled update recorded"
        );
        Ok(())
    }
    .await;

    if let Err(err) = deps.store.unlock(&lock).await {
        warn!(key, error = %err, "unlock after update event failed");
    }
    if let Err(err) = deps.store.end_session(&session).await {
        warn!(key, error = %err, "failed to end update event session");
    }
    result
}

/// A schedule change was requested: point the backing cron job at the new
/// schedule, record it, and consume the key.
pub async fn change_job_schedule(deps: &CoordinatorDeps, key: &str, value: &[u8]) -> Result<()> {
    let change: ScheduleChangeJob = serde_json::from_slice(value)?;

    let session = deps.store.new_session(deps.config.session_ttl).await?;
    let lock = deps.store.lock(&session, &lock_key(key)).await?;

    let result = async {
        deps.schedules
            .apply_schedule(&change.resource_id, &change.schedule)
            .await?;
        deps.metadata
            .set_schedule(&change.resource_id, &change.schedule)
            .await?;
        deps.metadata
            .set_status(&change.resource_id, Status::Ready, None)
            .await?;
        deps.store
            .guarded_txn(&lock, vec![TxnOp::delete(key)])
            .await?;
        info!(
            resource = %change.resource_id,
            schedule = %change.schedule,
            "job schedule changed"
        );
        Ok(())
    }
    .await;

    if let Err(err) = deps.store.unlock(&lock).await {
        warn!(key, error = %err, "unlock after schedule change failed");
    }
    if let Err(err) = deps.store.end_session(&session).await {
        warn!(key, error = %err, "failed to end schedule change session");
    }
    result
}
