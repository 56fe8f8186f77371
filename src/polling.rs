//! Blocking on zone operations until the provider reports them finished.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::backend::{ComputeApi, OperationHandle};
use crate::error::GceError;

/// Pause between wait rounds that come back not-done.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Race `fut` against `ctx`; cancellation wins ties.
pub(crate) async fn cancellable<T>(
    ctx: &CancellationToken,
    fut: impl Future<Output = Result<T, GceError>>,
) -> Result<T, GceError> {
    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(GceError::Cancelled),
        result = fut => result,
    }
}

/// Long-poll `handle` until it is `DONE`.
///
/// A finished operation that carries provider errors becomes
/// [`GceError::OperationFailed`]. The operation itself is never retried.
pub async fn wait_for_operation<A>(
    api: &A,
    ctx: &CancellationToken,
    handle: &OperationHandle,
) -> Result<(), GceError>
where
    A: ComputeApi + ?Sized,
{
    loop {
        let operation = cancellable(ctx, api.wait_operation(handle)).await?;

        if operation.is_done() {
            if let Some(message) = operation.failure() {
                return Err(GceError::OperationFailed {
                    operation: handle.name.clone(),
                    message,
                });
            }
            tracing::debug!(operation = %handle.name, "operation done");
            return Ok(());
        }

        tracing::debug!(
            operation = %handle.name,
            status = %operation.status,
            "operation still running"
        );
        tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(GceError::Cancelled),
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::backend::fake::FakeCompute;

    fn handle() -> OperationHandle {
        OperationHandle {
            project: "p".into(),
            zone: "us-central1-a".into(),
            name: "operation-1".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_done() {
        let api = FakeCompute::new().with_pending_rounds(3);
        wait_for_operation(&api, &CancellationToken::new(), &handle())
            .await
            .unwrap();
        assert_eq!(api.wait_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn provider_error_fails_the_wait() {
        let api =
            FakeCompute::new().with_operation_error("ZONE_RESOURCE_POOL_EXHAUSTED", "no capacity");
        let err = wait_for_operation(&api, &CancellationToken::new(), &handle())
            .await
            .unwrap_err();
        assert!(matches!(err, GceError::OperationFailed { .. }));
        assert_eq!(
            err.to_string(),
            "operation operation-1 failed: ZONE_RESOURCE_POOL_EXHAUSTED: no capacity"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_polling() {
        let api = FakeCompute::new().with_pending_rounds(usize::MAX);
        let ctx = CancellationToken::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            canceller.cancel();
        });

        let err = wait_for_operation(&api, &ctx, &handle()).await.unwrap_err();
        assert!(err.is_cancelled());
        // one round per POLL_INTERVAL, give or take the boundary
        let rounds = api.wait_calls.load(Ordering::SeqCst);
        assert!((6..=7).contains(&rounds), "{rounds}");
    }

    #[tokio::test]
    async fn transport_error_is_returned() {
        let api = FakeCompute::new().fail_waits();
        let err = wait_for_operation(&api, &CancellationToken::new(), &handle())
            .await
            .unwrap_err();
        assert!(matches!(err, GceError::Api { status: 500, .. }));
    }
}
