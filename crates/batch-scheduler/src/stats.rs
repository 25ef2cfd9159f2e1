use crate::handle::BatchHandle;
use batch_scheduler_core::{Batch, BatchId, BatchStatus};
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, warn};
use uuid::Uuid;

/// Handle returned by observer registration, used to unregister
pub type ObserverId = Uuid;

/// Receives batch snapshots after counters are refreshed
pub trait ProgressObserver: Send + Sync {
    fn notify(&self, batch_id: BatchId, batch: &Batch) -> Result<(), String>;
}

impl<F> ProgressObserver for F
where
    F: Fn(BatchId, &Batch) -> Result<(), String> + Send + Sync,
{
    fn notify(&self, batch_id: BatchId, batch: &Batch) -> Result<(), String> {
        self(batch_id, batch)
    }
}

/// Recomputes batch counters, applies the auto-pause rule and fans out progress
pub struct StatsAggregator {
    observers: RwLock<Vec<(ObserverId, Arc<dyn ProgressObserver>)>>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        StatsAggregator {
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, observer: impl ProgressObserver + 'static) -> ObserverId {
        let id = Uuid::new_v4();
        self.observers.write().push((id, Arc::new(observer)));
        id
    }

    pub fn unregister(&self, id: &ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(observer_id, _)| observer_id != id);
        observers.len() != before
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Refresh counters, pause the batch if its error rate is over threshold,
    /// and notify observers. Returns the resulting batch status.
    pub(crate) fn refresh(&self, handle: &BatchHandle) -> BatchStatus {
        let (status, auto_paused, error_rate) = handle.update(|batch| {
            batch.refresh_counters();
            let over_threshold = batch.config.auto_pause_on_errors
                && batch.error_rate > batch.config.error_threshold;
            let paused = over_threshold && batch.pause();
            (batch.status, paused, batch.error_rate)
        });

        if auto_paused {
            warn!(
                batch_id = %handle.id,
                error_rate,
                threshold = handle.config.error_threshold,
                "Error rate over threshold, batch auto-paused"
            );
        }

        self.publish(handle, status != BatchStatus::Processing);
        status
    }

    /// Notify observers, at most once per progress interval unless `force`
    pub(crate) fn publish(&self, handle: &BatchHandle, force: bool) {
        if self.observer_count() == 0 {
            return;
        }

        {
            let mut last = handle.last_notified.lock();
            if let Some(at) = *last {
                if !force && at.elapsed() < handle.config.progress_update_interval() {
                    return;
                }
            }
            *last = Some(Instant::now());
        }

        let snapshot = handle.snapshot();
        let observers = self.observers.read().clone();

        for (id, observer) in observers {
            match catch_unwind(AssertUnwindSafe(|| observer.notify(snapshot.id, &snapshot))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(observer_id = %id, batch_id = %snapshot.id, "Progress observer failed: {}", e);
                }
                Err(_) => {
                    error!(observer_id = %id, batch_id = %snapshot.id, "Progress observer panicked");
                }
            }
        }
    }
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}
