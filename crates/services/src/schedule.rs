//! Cancellable periodic tasks.
//!
//! Every background timer a session owns goes through `ScheduledTask`, so
//! stopping a session stops all of its ticks deterministically.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

/// Handle to a periodic task running on the tokio runtime.
///
/// The first tick fires one `period` after creation. Dropping the handle
/// stops the task.
pub struct ScheduledTask {
    cancel: CancellationToken,
    reset: Arc<Notify>,
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    /// Run `on_tick` every `period` until `cancel` fires or the handle is stopped.
    ///
    /// Missed ticks are skipped rather than bursted.
    pub fn every<F>(period: Duration, cancel: CancellationToken, mut on_tick: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let reset = Arc::new(Notify::new());
        let task_cancel = cancel.clone();
        let task_reset = Arc::clone(&reset);

        let handle = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    () = task_cancel.cancelled() => break,
                    () = task_reset.notified() => interval.reset(),
                    _ = interval.tick() => on_tick(),
                }
            }
        });

        Self {
            cancel,
            reset,
            handle: Some(handle),
        }
    }

    /// Push the next tick a full period into the future.
    pub fn reset(&self) {
        self.reset.notify_one();
    }

    /// Stop ticking. Idempotent.
    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(period: Duration) -> (ScheduledTask, Arc<AtomicUsize>) {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let task = ScheduledTask::every(period, CancellationToken::new(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (task, ticks)
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_once_per_period() {
        let (_task, ticks) = counting(Duration::from_secs(5));

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(10_200)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_prevents_further_ticks() {
        let (mut task, ticks) = counting(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);

        task.stop();
        assert!(task.is_stopped());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_stops_the_task() {
        let (task, ticks) = counting(Duration::from_secs(1));
        drop(task);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_postpones_next_tick() {
        let (task, ticks) = counting(Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(4)).await;
        task.reset();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0, "tick moved to t=9s");

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn parent_token_cancels_the_task() {
        let parent = CancellationToken::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let task = ScheduledTask::every(Duration::from_secs(1), parent.child_token(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        parent.cancel();
        assert!(task.is_stopped());
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }
}
