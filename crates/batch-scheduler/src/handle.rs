use batch_scheduler_core::{
    Batch, BatchConfiguration, BatchId, BatchStatus, ItemId, TenantId, WorkItem,
};
use parking_lot::{Mutex, RwLock};
use std::time::Instant;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) struct BatchState {
    pub batch: Batch,
    /// Set while a worker task owns the batch's rounds
    pub worker_active: bool,
}

/// Shared, lock-guarded record of one submitted batch.
/// Locks are never held across an await.
pub(crate) struct BatchHandle {
    pub id: BatchId,
    pub tenant_id: TenantId,
    pub config: BatchConfiguration,
    state: RwLock<BatchState>,
    cancel: CancellationToken,
    /// Wakes an idle worker when a retry lands back in the queue
    pub wake: Notify,
    pub worker: Mutex<Option<JoinHandle<()>>>,
    pub last_notified: Mutex<Option<Instant>>,
}

impl BatchHandle {
    pub fn new(batch: Batch, cancel: CancellationToken) -> Self {
        BatchHandle {
            id: batch.id,
            tenant_id: batch.tenant_id.clone(),
            config: batch.config.clone(),
            state: RwLock::new(BatchState {
                batch,
                worker_active: false,
            }),
            cancel,
            wake: Notify::new(),
            worker: Mutex::new(None),
            last_notified: Mutex::new(None),
        }
    }

    pub fn snapshot(&self) -> Batch {
        self.state.read().batch.clone()
    }

    pub fn status(&self) -> BatchStatus {
        self.state.read().batch.status
    }

    pub fn error_rate(&self) -> f64 {
        self.state.read().batch.error_rate
    }

    pub fn read<R>(&self, f: impl FnOnce(&Batch) -> R) -> R {
        f(&self.state.read().batch)
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut Batch) -> R) -> R {
        f(&mut self.state.write().batch)
    }

    pub fn update_state<R>(&self, f: impl FnOnce(&mut BatchState) -> R) -> R {
        f(&mut self.state.write())
    }

    pub fn update_item<R>(&self, item_id: &ItemId, f: impl FnOnce(&mut WorkItem) -> R) -> Option<R> {
        self.state.write().batch.item_mut(item_id).map(f)
    }

    pub fn worker_active(&self) -> bool {
        self.state.read().worker_active
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
