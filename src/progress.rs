//! Liveness ticks for long-running waits.
//!
//! [`run_with_progress`] drives a unit of work and a once-per-interval ticker
//! side by side on the current task. The ticker stops as soon as the work
//! finishes or the context is cancelled, and it never produces an error of
//! its own: whatever the work returns is what the caller sees.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::GceError;

/// Interval between ticks while waiting.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Receives one call per tick interval while a wait is in progress.
pub trait TickSink: Send + Sync {
    fn tick(&self);
}

impl<F> TickSink for F
where
    F: Fn() + Send + Sync,
{
    fn tick(&self) {
        self()
    }
}

/// Run `work` while calling `on_tick` every [`TICK_INTERVAL`].
///
/// `work` receives a child of `ctx`. If `ctx` is cancelled before the work
/// completes, the work future is dropped and `Cancelled` is returned.
pub async fn run_with_progress<F, Fut, T>(
    ctx: &CancellationToken,
    on_tick: &dyn TickSink,
    work: F,
) -> Result<T, GceError>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, GceError>>,
{
    run_with_progress_every(ctx, TICK_INTERVAL, on_tick, work).await
}

pub(crate) async fn run_with_progress_every<F, Fut, T>(
    ctx: &CancellationToken,
    period: Duration,
    on_tick: &dyn TickSink,
    work: F,
) -> Result<T, GceError>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T, GceError>>,
{
    let token = ctx.child_token();
    // Cancelled exactly once, by the work unit, when it finishes.
    let done = CancellationToken::new();

    let work_unit = async {
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(GceError::Cancelled),
            result = work(token.clone()) => result,
        };
        done.cancel();
        result
    };

    let ticker = async {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = done.cancelled() => break,
                _ = interval.tick() => on_tick.tick(),
            }
        }
    };

    let (result, ()) = tokio::join!(work_unit, ticker);
    result
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fast_work_never_ticks() {
        let ctx = CancellationToken::new();
        let ticks = AtomicUsize::new(0);
        let on_tick = || {
            ticks.fetch_add(1, Ordering::SeqCst);
        };

        let value = run_with_progress(&ctx, &on_tick, |_ctx| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(42)
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_work_ticks_once_per_interval() {
        let ctx = CancellationToken::new();
        let ticks = AtomicUsize::new(0);
        let on_tick = || {
            ticks.fetch_add(1, Ordering::SeqCst);
        };

        run_with_progress(&ctx, &on_tick, |_ctx| async {
            tokio::time::sleep(Duration::from_millis(2_600)).await;
            Ok(())
        })
        .await
        .unwrap();

        assert!(ticks.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn work_error_is_returned_unchanged() {
        let ctx = CancellationToken::new();
        let noop = || {};

        let err = run_with_progress(&ctx, &noop, |_ctx| async {
            tokio::time::sleep(Duration::from_millis(1_500)).await;
            Err::<(), _>(GceError::NotFound {
                name: "sandbox".into(),
            })
        })
        .await
        .unwrap_err();

        assert_eq!(err.to_string(), "VM sandbox: not found");
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_returns_promptly() {
        let ctx = CancellationToken::new();
        let ticks = AtomicUsize::new(0);
        let on_tick = || {
            ticks.fetch_add(1, Ordering::SeqCst);
        };

        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1_500)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let err = run_with_progress(&ctx, &on_tick, |_ctx| {
            std::future::pending::<Result<(), GceError>>()
        })
        .await
        .unwrap_err();

        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_context_skips_work() {
        let ctx = CancellationToken::new();
        let ran = AtomicUsize::new(0);
        let noop = || {};
        ctx.cancel();

        let err = run_with_progress(&ctx, &noop, |_child| async {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap_err();

        assert!(matches!(err, GceError::Cancelled));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
