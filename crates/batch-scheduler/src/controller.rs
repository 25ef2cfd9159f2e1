use crate::config::SchedulerConfig;
use crate::executor::{ItemDispatcher, UnitOfWork};
use crate::handle::BatchHandle;
use crate::metrics::SchedulerMetrics;
use crate::queue::{PriorityQueue, QueueEntry};
use crate::retry::RetryScheduler;
use crate::sampler::{LoadSampler, SystemLoadSampler};
use crate::stats::{ObserverId, ProgressObserver, StatsAggregator};
use crate::strategy::strategy_for;
use crate::worker::BatchWorker;
use batch_scheduler_core::{
    Batch, BatchConfiguration, BatchId, BatchSummary, ItemSpec, PerformanceMetrics, Priority,
    Result, SchedulerError, TenantId,
};
use dashmap::DashMap;
use parking_lot::Mutex;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Public entry point: submits batches and controls their lifecycle
pub struct BatchController {
    config: SchedulerConfig,
    executor: Arc<dyn UnitOfWork>,
    queue: Arc<PriorityQueue>,
    batches: DashMap<BatchId, Arc<BatchHandle>>,
    stats: Arc<StatsAggregator>,
    retry: RetryScheduler,
    sampler: Arc<dyn LoadSampler>,
    metrics: Arc<SchedulerMetrics>,
    shutdown: CancellationToken,
    /// Held while spawning a worker and while shutdown collects them
    spawn_lock: Mutex<()>,
}

impl BatchController {
    pub fn new(config: SchedulerConfig, executor: Arc<dyn UnitOfWork>) -> Result<Self> {
        Self::with_shutdown_token(config, executor, CancellationToken::new())
    }

    /// Build a controller that also stops when `shutdown` is cancelled by the host
    pub fn with_shutdown_token(
        config: SchedulerConfig,
        executor: Arc<dyn UnitOfWork>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;

        let metrics =
            Arc::new(SchedulerMetrics::new().map_err(|e| SchedulerError::Metrics(e.to_string()))?);
        let queue = Arc::new(PriorityQueue::new(config.queue_capacity));
        let retry = RetryScheduler::new(config.retry_policy(), queue.clone(), metrics.clone());

        Ok(BatchController {
            config,
            executor,
            queue,
            batches: DashMap::new(),
            stats: Arc::new(StatsAggregator::new()),
            retry,
            sampler: Arc::new(SystemLoadSampler::new()),
            metrics,
            shutdown: shutdown.child_token(),
            spawn_lock: Mutex::new(()),
        })
    }

    /// Replace the host load source used by adaptive batches
    pub fn with_sampler(mut self, sampler: Arc<dyn LoadSampler>) -> Self {
        self.sampler = sampler;
        self
    }

    /// Create a batch, enqueue its items and start its worker.
    /// Returns as soon as the worker is spawned; must run inside a Tokio runtime.
    pub fn submit(
        &self,
        tenant_id: impl Into<TenantId>,
        items: Vec<ItemSpec>,
        config: BatchConfiguration,
        priority: Priority,
    ) -> Result<BatchId> {
        config.validate()?;

        let _spawn_guard = self.spawn_lock.lock();
        if self.is_shutting_down() {
            return Err(SchedulerError::ShuttingDown);
        }

        let tenant_id = tenant_id.into();
        let max_retries = config.max_retries;
        let mut batch = Batch::new(tenant_id.clone(), config, priority);
        for spec in items {
            let mut item = spec.build(batch.id, tenant_id.clone(), priority, max_retries);
            item.mark_queued();
            batch.push_item(item);
        }

        let entries: Vec<QueueEntry> = batch.items.iter().map(QueueEntry::from).collect();
        self.queue.push_all(entries)?;
        self.metrics.queue_depth.set(self.queue.len() as i64);

        let batch_id = batch.id;
        let total = batch.total_items;
        let mode = batch.config.mode;

        let handle = Arc::new(BatchHandle::new(batch, self.shutdown.child_token()));
        handle.update_state(|state| {
            state.batch.start();
            state.worker_active = true;
        });
        self.batches.insert(batch_id, handle.clone());
        self.spawn_worker(&handle);

        info!(
            batch_id = %batch_id,
            tenant_id = %tenant_id,
            items = total,
            mode = mode.as_str(),
            "Batch submitted"
        );
        Ok(batch_id)
    }

    fn spawn_worker(&self, handle: &Arc<BatchHandle>) {
        let dispatcher = ItemDispatcher::new(
            handle.clone(),
            self.executor.clone(),
            self.queue.clone(),
            self.retry.clone(),
            self.metrics.clone(),
        );
        let worker = BatchWorker {
            handle: handle.clone(),
            queue: self.queue.clone(),
            strategy: strategy_for(handle.config.mode, self.sampler.clone()),
            dispatcher,
            stats: self.stats.clone(),
            metrics: self.metrics.clone(),
            idle_poll: self.config.idle_poll_interval(),
        };

        let join = tokio::spawn(worker.run());
        *handle.worker.lock() = Some(join);
    }

    fn handle(&self, batch_id: &BatchId) -> Option<Arc<BatchHandle>> {
        self.batches.get(batch_id).map(|entry| entry.value().clone())
    }

    pub fn get_status(&self, batch_id: &BatchId) -> Option<Batch> {
        self.handle(batch_id).map(|handle| handle.snapshot())
    }

    pub fn list_batches(&self) -> Vec<Batch> {
        self.batches
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect()
    }

    pub fn summary(&self, batch_id: &BatchId) -> Option<BatchSummary> {
        self.handle(batch_id).map(|handle| handle.read(|batch| batch.summary()))
    }

    pub fn performance(&self, batch_id: &BatchId) -> Option<PerformanceMetrics> {
        self.handle(batch_id).map(|handle| handle.read(|batch| batch.performance()))
    }

    /// Processing → Paused. In-flight items finish; no new round starts.
    pub fn pause(&self, batch_id: &BatchId) -> bool {
        let Some(handle) = self.handle(batch_id) else {
            return false;
        };
        if !handle.update(|batch| batch.pause()) {
            return false;
        }

        info!(batch_id = %batch_id, "Batch paused");
        handle.wake.notify_one();
        self.stats.publish(&handle, true);
        true
    }

    /// Paused → Processing, restarting the worker if it already stopped
    pub fn resume(&self, batch_id: &BatchId) -> bool {
        let Some(handle) = self.handle(batch_id) else {
            return false;
        };

        let (resumed, needs_worker) = {
            let _spawn_guard = self.spawn_lock.lock();
            if self.is_shutting_down() {
                return false;
            }

            let (resumed, needs_worker) = handle.update_state(|state| {
                if !state.batch.resume() {
                    return (false, false);
                }
                let needs_worker = !state.worker_active;
                state.worker_active = true;
                (true, needs_worker)
            });
            if needs_worker {
                self.spawn_worker(&handle);
            }
            (resumed, needs_worker)
        };

        if resumed {
            info!(batch_id = %batch_id, restarted_worker = needs_worker, "Batch resumed");
            self.stats.publish(&handle, true);
        }
        resumed
    }

    /// Cancel a non-terminal batch. Running executor calls are not interrupted.
    pub fn cancel(&self, batch_id: &BatchId) -> bool {
        let Some(handle) = self.handle(batch_id) else {
            return false;
        };
        let cancelled_items = handle.update(|batch| {
            let before = batch.skipped_items;
            batch.cancel().then(|| batch.skipped_items - before)
        });
        let Some(cancelled_items) = cancelled_items else {
            return false;
        };
        self.metrics.add_items("cancelled", cancelled_items);

        handle.cancel_token().cancel();
        let removed = self.queue.remove_batch(batch_id);
        self.metrics.queue_depth.set(self.queue.len() as i64);

        info!(batch_id = %batch_id, removed_from_queue = removed, "Batch cancelled");
        self.stats.publish(&handle, true);
        true
    }

    /// Drop a finished batch from the registry
    pub fn remove(&self, batch_id: &BatchId) -> bool {
        self.batches
            .remove_if(batch_id, |_, handle| handle.status().is_terminal())
            .is_some()
    }

    pub fn register_progress_observer(&self, observer: impl ProgressObserver + 'static) -> ObserverId {
        self.stats.register(observer)
    }

    pub fn unregister_progress_observer(&self, id: &ObserverId) -> bool {
        self.stats.unregister(id)
    }

    /// Stop every worker at its next round boundary and wait for them.
    /// Batches still Processing are left Paused.
    pub async fn shutdown(&self, deadline: Duration) -> Result<()> {
        if !self.shutdown.is_cancelled() {
            info!(batches = self.batches.len(), "Shutting down batch scheduler");
        }
        let workers: Vec<_> = {
            let _spawn_guard = self.spawn_lock.lock();
            self.shutdown.cancel();
            self.batches
                .iter()
                .filter_map(|entry| entry.value().worker.lock().take())
                .collect()
        };

        match tokio::time::timeout(deadline, join_all(workers)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!("Batch worker terminated abnormally: {}", e);
                    }
                }
                info!("All batch workers stopped");
                Ok(())
            }
            Err(_) => {
                let remaining = self
                    .batches
                    .iter()
                    .filter(|entry| entry.value().worker_active())
                    .count();
                warn!(remaining, "Shutdown deadline exceeded");
                Err(SchedulerError::ShutdownTimeout { remaining })
            }
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<SchedulerMetrics> {
        self.metrics.clone()
    }
}
