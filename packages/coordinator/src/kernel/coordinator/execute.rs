//! Job execution under the per-job lock.
//!
//! Every run gets its own session, so a lost lease has a blast radius of
//! exactly one job. All reads and writes of the job record go through the
//! owner guard: if the lease lapses mid-flight the writes fail with
//! `NotOwner`, the record is left in place, and the watch stream delivers
//! the job to the next worker.

use syncstore::{Session, TxnOp};
use tracing::{debug, error, info, warn};

use crate::common::error::{Error, Result};
use crate::common::resource::lock_key;
use crate::domains;
use crate::kernel::coordinator::jobs::JobRecord;
use crate::kernel::deps::CoordinatorDeps;
use crate::kernel::metadata::Status;

/// Run the job stored at `job_key` to completion, one attempt.
pub async fn execute_job(deps: &CoordinatorDeps, job_key: &str) -> Result<()> {
    let session = deps.store.new_session(deps.config.session_ttl).await?;
    let result = execute_with_session(deps, &session, job_key).await;
    if let Err(err) = deps.store.end_session(&session).await {
        warn!(job_key, error = %err, "failed to end job session");
    }
    result
}

async fn execute_with_session(
    deps: &CoordinatorDeps,
    session: &Session,
    job_key: &str,
) -> Result<()> {
    let lock = deps.store.lock(session, &lock_key(job_key)).await?;
    let result = execute_locked(deps, &lock, job_key).await;
    if let Err(err) = deps.store.unlock(&lock).await {
        // Lease loss releases the lock for us; anything else is worth a log.
        debug!(job_key, error = %err, "unlock after execution failed");
    }
    result
}

async fn execute_locked(
    deps: &CoordinatorDeps,
    lock: &syncstore::LockGuard,
    job_key: &str,
) -> Result<()> {
    // The key may have vanished between the watch event and here; that
    // just means another worker already finished it.
    let raw = deps
        .store
        .guarded_get(lock, job_key)
        .await?
        .ok_or_else(|| Error::JobDoesNotExist(job_key.to_string()))?;
    let mut job: JobRecord = serde_json::from_slice(&raw)?;

    if job.attempts >= deps.config.max_job_attempts {
        deps.store
            .guarded_txn(lock, vec![TxnOp::delete(job_key)])
            .await?;
        error!(
            job_key,
            attempts = job.attempts,
            "job exhausted its attempts; deleting"
        );
        return Err(Error::Internal(format!(
            "job {job_key} abandoned after {} attempts",
            job.attempts
        )));
    }

    job.attempts += 1;
    deps.store
        .guarded_txn(lock, vec![TxnOp::put(job_key, serde_json::to_vec(&job)?)])
        .await?;
    debug!(job_key, attempt = job.attempts, "executing job");

    match domains::handle(deps, &job).await {
        Ok(()) => {
            deps.store
                .guarded_txn(lock, vec![TxnOp::delete(job_key)])
                .await?;
            info!(job_key, resource = %job.resource, "job succeeded");
            Ok(())
        }
        Err(Error::ResourceAlreadyComplete(id)) => {
            // Someone already drove this resource to READY; the job is done.
            deps.store
                .guarded_txn(lock, vec![TxnOp::delete(job_key)])
                .await?;
            info!(job_key, resource = %id, "resource already complete");
            Ok(())
        }
        Err(err) if err.preserves_status() => Err(err),
        Err(err) => {
            // Record the failure; the job key stays so the watch stream
            // re-enters until attempts run out.
            if let Err(status_err) = deps
                .metadata
                .set_status(&job.resource, Status::Failed, Some(err.to_string()))
                .await
            {
                error!(job_key, error = %status_err, "failed to record FAILED status");
            }
            Err(err)
        }
    }
}
