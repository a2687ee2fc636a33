//! Background task supervision

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Spawn a long-running background task and a monitor that reports how it ended
///
/// The returned handle cancels the task. Cancellation is logged at debug
/// level; a task that returns on its own or panics is logged as an error,
/// since every background loop here is expected to run until aborted.
pub fn spawn_supervised<F>(task_name: &'static str, future: F) -> AbortHandle
where
    F: Future<Output = ()> + Send + 'static,
{
    let handle = tokio::spawn(future);
    let abort = handle.abort_handle();

    tokio::spawn(async move {
        match handle.await {
            Ok(()) => {
                tracing::error!(
                    task = task_name,
                    "Background task terminated unexpectedly and will not be restarted"
                );
            }
            Err(e) if e.is_cancelled() => {
                tracing::debug!(task = task_name, "Background task stopped");
            }
            Err(e) => {
                tracing::error!(
                    task = task_name,
                    error = %e,
                    "Background task panicked; this indicates a bug in the task loop"
                );
            }
        }
    });

    abort
}

/// Run `tick` every `period`, starting one period from now
pub fn spawn_periodic<T, F, Fut>(
    task_name: &'static str,
    period: Duration,
    target: Arc<T>,
    tick: F,
) -> AbortHandle
where
    T: Send + Sync + 'static,
    F: Fn(Arc<T>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    spawn_supervised(task_name, async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            tick(Arc::clone(&target)).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_abort_stops_the_loop() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let abort = spawn_supervised("ticker", async move {
            loop {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        });

        tokio::time::sleep(Duration::from_millis(2500)).await;
        abort.abort();
        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 2);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }
}
