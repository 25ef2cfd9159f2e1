use crate::gate::ConcurrencyGate;
use crate::handle::BatchHandle;
use crate::metrics::SchedulerMetrics;
use crate::queue::{PriorityQueue, QueueEntry};
use crate::retry::RetryScheduler;
use async_trait::async_trait;
use batch_scheduler_core::{
    BatchId, BatchStatus, ItemId, ItemPayload, ItemStatus, SchedulerError,
};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Result type for units of work
pub type WorkResult = Result<Bytes, String>;

/// Caller-supplied executor that performs the actual work for an item
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn execute(&self, ctx: ExecutionContext, payload: ItemPayload) -> WorkResult;
}

/// Everything an executor learns about the item it runs
#[derive(Clone)]
pub struct ExecutionContext {
    pub item_id: ItemId,
    pub batch_id: BatchId,
    /// Zero for the first attempt
    pub attempt: u32,
    /// Fires when the batch is cancelled or the scheduler shuts down
    pub cancel: CancellationToken,
    pub progress: ProgressReporter,
}

/// Writes the latest progress report of a running item into its batch
#[derive(Clone)]
pub struct ProgressReporter {
    handle: Arc<BatchHandle>,
    item_id: ItemId,
}

impl ProgressReporter {
    pub fn report(&self, percent: f32, phase: Option<&str>) {
        self.handle.update_item(&self.item_id, |item| {
            if item.status == ItemStatus::Processing {
                item.record_progress(percent, phase.map(str::to_string));
            }
        });
    }
}

enum Outcome {
    Succeeded(Bytes),
    Failed(String),
}

/// Runs single items of one batch through the executor and records the outcome
pub struct ItemDispatcher {
    handle: Arc<BatchHandle>,
    executor: Arc<dyn UnitOfWork>,
    gate: ConcurrencyGate,
    queue: Arc<PriorityQueue>,
    retry: RetryScheduler,
    metrics: Arc<SchedulerMetrics>,
}

impl ItemDispatcher {
    pub(crate) fn new(
        handle: Arc<BatchHandle>,
        executor: Arc<dyn UnitOfWork>,
        queue: Arc<PriorityQueue>,
        retry: RetryScheduler,
        metrics: Arc<SchedulerMetrics>,
    ) -> Self {
        let gate = ConcurrencyGate::new(handle.config.max_concurrent);
        ItemDispatcher {
            handle,
            executor,
            gate,
            queue,
            retry,
            metrics,
        }
    }

    pub fn batch_id(&self) -> BatchId {
        self.handle.id
    }

    /// Error rate as of the last stats refresh
    pub fn recent_error_rate(&self) -> f64 {
        self.handle.error_rate()
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    /// Acquire a gate slot, then dispatch
    pub async fn dispatch_gated(&self, entry: QueueEntry) {
        match self.gate.acquire(self.handle.cancel_token()).await {
            Ok(permit) => {
                self.dispatch(entry).await;
                permit.release();
            }
            Err(_) => self.skip(entry),
        }
    }

    /// Run one item to completion; failures are absorbed into the item
    pub async fn dispatch(&self, entry: QueueEntry) {
        if self.handle.is_cancelled() {
            self.skip(entry);
            return;
        }

        let item_id = entry.item_id;
        let started = self
            .handle
            .update_item(&item_id, |item| {
                if item.status != ItemStatus::Queued {
                    return None;
                }
                item.start();
                Some((item.payload.clone(), item.retry_count))
            })
            .flatten();

        let Some((payload, attempt)) = started else {
            debug!(batch_id = %self.handle.id, item_id = %item_id, "Item no longer queued, skipping");
            return;
        };

        let ctx = ExecutionContext {
            item_id,
            batch_id: self.handle.id,
            attempt,
            cancel: self.handle.cancel_token().clone(),
            progress: ProgressReporter {
                handle: self.handle.clone(),
                item_id,
            },
        };

        debug!(batch_id = %self.handle.id, item_id = %item_id, attempt, "Dispatching item");
        self.metrics.items_in_flight.inc();
        let clock = Instant::now();
        let outcome = self.run_executor(ctx, payload).await;
        self.metrics.items_in_flight.dec();
        let elapsed = clock.elapsed().as_secs_f64();

        match outcome {
            Outcome::Succeeded(result) => {
                let recorded = self
                    .handle
                    .update_item(&item_id, |item| {
                        if item.status != ItemStatus::Processing {
                            return false;
                        }
                        item.complete(result);
                        true
                    })
                    .unwrap_or(false);
                if recorded {
                    self.metrics.inc_items("completed");
                    self.metrics.observe_duration("completed", elapsed);
                }
            }
            Outcome::Failed(error) => {
                warn!(batch_id = %self.handle.id, item_id = %item_id, attempt, "Item failed: {}", error);
                let recorded = self
                    .handle
                    .update_item(&item_id, |item| {
                        if item.status != ItemStatus::Processing {
                            return false;
                        }
                        item.fail(error);
                        true
                    })
                    .unwrap_or(false);
                if !recorded {
                    return;
                }
                self.metrics.observe_duration("failed", elapsed);

                let retried = self.handle.config.retry_enabled
                    && self.retry.schedule_retry(&self.handle, item_id).is_some();
                if !retried {
                    self.metrics.inc_items("failed");
                }
            }
        }
    }

    /// Execute under the per-item timeout in a separate task so panics stay contained
    async fn run_executor(&self, ctx: ExecutionContext, payload: ItemPayload) -> Outcome {
        let item_id = ctx.item_id;
        let limit = self.handle.config.timeout_per_item();
        let executor = self.executor.clone();

        let joined = tokio::spawn(async move { timeout(limit, executor.execute(ctx, payload)).await }).await;

        match joined {
            Ok(Ok(Ok(result))) => Outcome::Succeeded(result),
            Ok(Ok(Err(e))) => Outcome::Failed(SchedulerError::ItemExecution(e).to_string()),
            Ok(Err(_)) => Outcome::Failed(SchedulerError::Timeout(limit).to_string()),
            Err(e) => {
                if e.is_panic() {
                    error!(batch_id = %self.handle.id, item_id = %item_id, "Executor panicked");
                    Outcome::Failed("Executor panicked during execution".to_string())
                } else {
                    Outcome::Failed("Execution was aborted".to_string())
                }
            }
        }
    }

    /// An item that will not run this round: cancelled with its batch, or
    /// returned to the queue when the scheduler stops mid-round
    pub fn skip(&self, entry: QueueEntry) {
        let item_id = entry.item_id;
        if self.handle.status() == BatchStatus::Cancelled {
            self.handle.update_item(&item_id, |item| item.cancel());
            return;
        }
        if let Err(e) = self.queue.push(entry) {
            warn!(batch_id = %self.handle.id, item_id = %item_id, "Could not return item to queue: {}", e);
            self.handle.update_item(&item_id, |item| item.cancel());
        }
    }
}
