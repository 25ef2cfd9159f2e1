use batch_scheduler_core::{Result, SchedulerError};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Counting semaphore bounding simultaneous executions within one batch
#[derive(Clone)]
pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A held execution slot; dropping it frees the slot
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl GatePermit {
    pub fn release(self) {}
}

impl ConcurrencyGate {
    pub fn new(capacity: usize) -> Self {
        ConcurrencyGate {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot, giving up when `cancel` fires
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<GatePermit> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SchedulerError::Cancelled),
            permit = self.semaphore.clone().acquire_owned() => permit
                .map(|permit| GatePermit { _permit: permit })
                .map_err(|_| SchedulerError::Cancelled),
        }
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
