use std::future::Future;

use floors::{FloorError, LifecycleErrorKind, RetryPolicy};
use tokio_util::sync::CancellationToken;

/// Runs `op` until it succeeds, `retryable` rejects the error, or the policy's attempts run out.
///
/// `op` receives the 1-based attempt number. Waits between attempts follow
/// [`RetryPolicy::delay_for`]. Cancelling `cancel` stops both the running attempt and any pending
/// wait, and yields a `Lifecycle` error.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut retryable: impl FnMut(&FloorError) -> bool,
    mut op: F,
) -> Result<T, FloorError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, FloorError>>,
{
    let mut attempt = 1u32;
    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            r = op(attempt) => r,
        };
        let err = match result {
            Ok(v) => return Ok(v),
            Err(e) => e,
        };
        if !retryable(&err) || !policy.should_retry(attempt) {
            return Err(err);
        }

        let delay = policy.delay_for(attempt);
        rwarn!(
            code = err.code(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            "retrying after failure"
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

pub(crate) fn cancelled() -> FloorError {
    FloorError::lifecycle(LifecycleErrorKind::Destroyed, "load cancelled")
}
