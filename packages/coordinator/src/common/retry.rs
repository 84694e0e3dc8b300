//! Bounded retry for transient writes.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::error::{Error, Result};

/// Run `op` up to `attempts` times, sleeping `delay` between tries. The
/// last error is wrapped as internal; intermediate failures are logged.
pub async fn retry_with_delays<T, F, Fut>(
    label: &str,
    attempts: usize,
    delay: Duration,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last: Option<Error> = None;
    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                warn!(label, attempt, error = %err, "retryable operation failed");
                last = Some(err);
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    let last = last.map(|e| e.to_string()).unwrap_or_default();
    Err(Error::Internal(format!(
        "{label} failed after {attempts} attempts: {last}"
    )))
}
