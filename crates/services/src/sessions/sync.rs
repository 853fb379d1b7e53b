use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use assess_core::model::SessionSnapshot;
use storage::repository::{ProgressStore, ProgressUpdate};

use crate::config::EngineConfig;
use crate::schedule::ScheduledTask;

/// Pushes session snapshots to the progress store in the background.
///
/// The latest snapshot lives in a watch channel. A periodic task pushes
/// whatever is current every `sync_interval`; `push_now` pushes immediately
/// and restarts the period. Each push is its own task, bounded by
/// `sync_timeout`, and failures are only logged: the next tick retries with
/// fresher data. Once stopped (explicitly or by drop) nothing else reaches
/// the store, including pushes that were still in flight.
pub struct ProgressSynchronizer {
    store: Arc<dyn ProgressStore>,
    latest: watch::Sender<ProgressUpdate>,
    cancel: CancellationToken,
    periodic: ScheduledTask,
    timeout: Duration,
}

impl ProgressSynchronizer {
    /// Start the periodic push with `initial` as the current snapshot.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(
        store: Arc<dyn ProgressStore>,
        initial: ProgressUpdate,
        config: &EngineConfig,
    ) -> Self {
        let cancel = CancellationToken::new();
        let (latest, watcher) = watch::channel(initial);
        let timeout = config.sync_timeout;

        let tick_store = Arc::clone(&store);
        let tick_cancel = cancel.clone();
        let periodic = ScheduledTask::every(config.sync_interval, cancel.child_token(), move || {
            let update = watcher.borrow().clone();
            spawn_push(Arc::clone(&tick_store), update, tick_cancel.clone(), timeout);
        });

        Self {
            store,
            latest,
            cancel,
            periodic,
            timeout,
        }
    }

    /// Replace the current snapshot; it goes out with the next tick.
    pub fn publish(&self, snapshot: SessionSnapshot) {
        if self.is_stopped() {
            return;
        }
        self.latest.send_modify(|update| update.snapshot = snapshot);
    }

    /// Replace the current snapshot and push it right away.
    pub fn push_now(&self, snapshot: SessionSnapshot) {
        if self.is_stopped() {
            return;
        }
        self.publish(snapshot);
        let update = self.latest.borrow().clone();
        spawn_push(
            Arc::clone(&self.store),
            update,
            self.cancel.clone(),
            self.timeout,
        );
        self.periodic.reset();
    }

    /// The snapshot the next push would send.
    #[must_use]
    pub fn current(&self) -> SessionSnapshot {
        self.latest.borrow().snapshot.clone()
    }

    /// Cancel the periodic task and every in-flight push. Idempotent.
    pub fn stop(&mut self) {
        self.cancel.cancel();
        self.periodic.stop();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop background pushes, then send the current snapshot one last time.
    ///
    /// Returns whether the store acknowledged it. Failures are logged like
    /// any other push.
    pub async fn flush(&mut self) -> bool {
        let update = self.latest.borrow().clone();
        self.stop();
        match tokio::time::timeout(self.timeout, self.store.update_progress(&update)).await {
            Ok(Ok(true)) => {
                debug!(
                    test_id = %update.test_id,
                    index = update.snapshot.current_question_index,
                    "final progress pushed"
                );
                true
            }
            Ok(Ok(false)) => {
                warn!(test_id = %update.test_id, "final progress push not acknowledged");
                false
            }
            Ok(Err(err)) => {
                warn!(test_id = %update.test_id, error = %err, "final progress push failed");
                false
            }
            Err(_) => {
                warn!(
                    test_id = %update.test_id,
                    timeout = ?self.timeout,
                    "final progress push timed out"
                );
                false
            }
        }
    }
}

impl Drop for ProgressSynchronizer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_push(
    store: Arc<dyn ProgressStore>,
    update: ProgressUpdate,
    cancel: CancellationToken,
    timeout: Duration,
) {
    if cancel.is_cancelled() {
        return;
    }
    tokio::spawn(async move {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(test_id = %update.test_id, "progress push cancelled");
            }
            outcome = tokio::time::timeout(timeout, store.update_progress(&update)) => {
                match outcome {
                    Ok(Ok(true)) => debug!(
                        test_id = %update.test_id,
                        index = update.snapshot.current_question_index,
                        "progress pushed"
                    ),
                    Ok(Ok(false)) => {
                        warn!(test_id = %update.test_id, "progress push not acknowledged");
                    }
                    Ok(Err(err)) => {
                        warn!(test_id = %update.test_id, error = %err, "progress push failed");
                    }
                    Err(_) => warn!(test_id = %update.test_id, ?timeout, "progress push timed out"),
                }
            }
        }
    });
}
