use crate::executor::ItemDispatcher;
use crate::handle::BatchHandle;
use crate::metrics::SchedulerMetrics;
use crate::queue::{PriorityQueue, QueueEntry};
use crate::stats::StatsAggregator;
use crate::strategy::ExecutionStrategy;
use batch_scheduler_core::BatchStatus;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Long-lived task driving the rounds of a single batch
pub(crate) struct BatchWorker {
    pub handle: Arc<BatchHandle>,
    pub queue: Arc<PriorityQueue>,
    pub strategy: Arc<dyn ExecutionStrategy>,
    pub dispatcher: ItemDispatcher,
    pub stats: Arc<StatsAggregator>,
    pub metrics: Arc<SchedulerMetrics>,
    pub idle_poll: Duration,
}

impl BatchWorker {
    pub async fn run(self) {
        let batch_id = self.handle.id;
        info!(batch_id = %batch_id, strategy = self.strategy.name(), "Batch worker started");

        let mut rounds = 0u64;
        while self.begin_round() {
            let entries = self.next_round();

            if entries.is_empty() {
                if self.try_finish() {
                    break;
                }
                self.idle_wait().await;
                continue;
            }

            rounds += 1;
            debug!(batch_id = %batch_id, round = rounds, items = entries.len(), "Starting round");

            self.strategy.execute(&self.dispatcher, entries).await;
            self.metrics.queue_depth.set(self.queue.len() as i64);
            self.stats.refresh(&self.handle);
        }

        let status = self.handle.status();
        self.metrics.inc_batches(status.as_str());
        info!(batch_id = %batch_id, status = status.as_str(), rounds, "Batch worker stopped");
    }

    /// Round boundary: keep going only while the batch is Processing and
    /// nothing was cancelled. The worker gives up ownership under the same
    /// lock that `Resume` inspects.
    fn begin_round(&self) -> bool {
        let cancelled = self.handle.is_cancelled();
        let (keep_going, paused_for_shutdown) = self.handle.update_state(|state| {
            if !cancelled && state.batch.status == BatchStatus::Processing {
                return (true, false);
            }
            // Shutdown cancels the token of a batch that is still Processing
            let paused = cancelled && state.batch.pause();
            state.worker_active = false;
            (false, paused)
        });

        if paused_for_shutdown {
            info!(batch_id = %self.handle.id, "Batch paused for shutdown");
            self.stats.publish(&self.handle, true);
        }
        keep_going
    }

    fn next_round(&self) -> Vec<QueueEntry> {
        let batch_id = self.handle.id;
        let tenant_id = &self.handle.tenant_id;
        let isolate = self.handle.config.tenant_isolation;

        // Batch ownership always applies; the tenant check only guards it
        self.queue.drain_matching(self.handle.config.batch_size, |entry| {
            entry.batch_id == batch_id && (!isolate || entry.tenant_id == *tenant_id)
        })
    }

    /// Complete the batch once no item can make further progress
    fn try_finish(&self) -> bool {
        let finished = self.handle.update_state(|state| {
            if state.batch.outstanding_items() > 0 || !state.batch.finish() {
                return false;
            }
            state.worker_active = false;
            true
        });

        if finished {
            self.stats.refresh(&self.handle);
        }
        finished
    }

    /// Nothing to dequeue while retries are pending
    async fn idle_wait(&self) {
        tokio::select! {
            _ = self.handle.cancel_token().cancelled() => {}
            _ = self.handle.wake.notified() => {}
            _ = tokio::time::sleep(self.idle_poll) => {}
        }
    }
}
