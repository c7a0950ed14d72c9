use sdk::errors::{PipelineError, PipelineErrorExt};
use std::future::Future;
use std::time::Duration;

/// Run `op`, retrying once after `backoff` if it fails with a transient error
///
/// Returns the final result and the number of attempts made.
pub async fn with_single_retry<T, F, Fut>(backoff: Duration, mut op: F) -> (Result<T, PipelineError>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    match op().await {
        Err(e) if e.is_transient() => {
            tracing::warn!(
                error = %e,
                backoff_ms = backoff.as_millis() as u64,
                "Transient failure, retrying once"
            );
            tokio::time::sleep(backoff).await;
            (op().await, 2)
        }
        other => (other, 1),
    }
}
