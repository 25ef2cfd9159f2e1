//! Exponential-backoff retry scheduling.

use crate::handle::BatchHandle;
use crate::metrics::SchedulerMetrics;
use crate::queue::{PriorityQueue, QueueEntry};
use batch_scheduler_core::{ItemId, ItemStatus};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Backoff policy: `base_delay * 2^retry_count`, capped at `max_delay`
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        RetryPolicy {
            base_delay,
            max_delay,
        }
    }

    /// Delay before re-queueing an item that has been retried `retry_count` times
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let multiplier = 2u32.pow(retry_count.min(20)); // Prevent overflow
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Re-enqueues failed items after their backoff delay without blocking the worker
#[derive(Clone)]
pub struct RetryScheduler {
    policy: RetryPolicy,
    queue: Arc<PriorityQueue>,
    metrics: Arc<SchedulerMetrics>,
}

impl RetryScheduler {
    pub fn new(policy: RetryPolicy, queue: Arc<PriorityQueue>, metrics: Arc<SchedulerMetrics>) -> Self {
        RetryScheduler {
            policy,
            queue,
            metrics,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Move a failed item into `Retry` and start its backoff timer.
    /// Returns the delay, or `None` when the item has no retries left.
    pub(crate) fn schedule_retry(&self, handle: &Arc<BatchHandle>, item_id: ItemId) -> Option<Duration> {
        let retry_count = handle
            .update_item(&item_id, |item| item.begin_retry().then_some(item.retry_count))
            .flatten()?;
        let delay = self.policy.delay_for(retry_count);
        self.metrics.inc_items("retried");

        debug!(
            batch_id = %handle.id,
            item_id = %item_id,
            retry_count,
            delay_ms = delay.as_millis() as u64,
            "Scheduling retry"
        );

        let scheduler = self.clone();
        let handle = handle.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = handle.cancel_token().cancelled() => {
                    debug!(batch_id = %handle.id, item_id = %item_id, "Retry timer cancelled");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            scheduler.requeue(&handle, item_id);
        });

        Some(delay)
    }

    fn requeue(&self, handle: &BatchHandle, item_id: ItemId) {
        let entry = handle
            .update_item(&item_id, |item| {
                if item.status != ItemStatus::Retry {
                    return None;
                }
                item.release();
                item.mark_queued();
                Some(QueueEntry::from(&*item))
            })
            .flatten();

        let Some(entry) = entry else {
            return;
        };

        match self.queue.push(entry) {
            Ok(()) => {
                self.metrics.queue_depth.set(self.queue.len() as i64);
                debug!(batch_id = %handle.id, item_id = %item_id, "Retry re-queued");
            }
            Err(e) => {
                error!(batch_id = %handle.id, item_id = %item_id, "Failed to re-queue retry: {}", e);
                handle.update_item(&item_id, |item| {
                    item.fail(format!("Retry could not be re-queued: {}", e))
                });
                self.metrics.inc_items("failed");
            }
        }
        handle.wake.notify_one();
    }
}
