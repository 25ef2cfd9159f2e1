use crate::{BatchId, Priority, DEFAULT_MAX_RETRIES};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a work item
pub type ItemId = Uuid;

/// Tenant identity used to keep one tenant's backlog out of another's worker
pub type TenantId = String;

/// Caller-supplied work description; never interpreted by the scheduler
pub type ItemPayload = Bytes;

/// Lifecycle of a single work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemStatus {
    /// Created, not yet in the queue (or back from a retry timer)
    Pending,
    /// Sitting in the priority queue
    Queued,
    /// Handed to the unit-of-work executor
    Processing,
    /// Executor reported success
    Completed,
    /// Executor failed and no retries remain
    Failed,
    /// Waiting out a backoff delay before being re-queued
    Retry,
    /// Owning batch was cancelled before the item finished
    Cancelled,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Queued => "queued",
            ItemStatus::Processing => "processing",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
            ItemStatus::Retry => "retry",
            ItemStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemStatus::Completed | ItemStatus::Failed | ItemStatus::Cancelled
        )
    }
}

/// One unit of schedulable work with priority, status and retry bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: ItemId,
    pub batch_id: BatchId,
    pub tenant_id: TenantId,
    pub payload: ItemPayload,
    pub priority: Priority,
    pub status: ItemStatus,

    pub created_at: DateTime<Utc>,
    /// Start of the most recent attempt
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub retry_count: u32,
    pub max_retries: u32,

    pub error_message: Option<String>,
    /// Output of the last successful execution
    pub result: Option<Bytes>,

    pub progress_percent: Option<f32>,
    pub current_phase: Option<String>,
}

impl WorkItem {
    pub fn new(batch_id: BatchId, tenant_id: TenantId, payload: ItemPayload, priority: Priority) -> Self {
        WorkItem {
            id: Uuid::new_v4(),
            batch_id,
            tenant_id,
            payload,
            priority,
            status: ItemStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            error_message: None,
            result: None,
            progress_percent: None,
            current_phase: None,
        }
    }

    /// Check if a failed attempt may be retried
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// True when the most recent finished attempt failed, including
    /// items that are waiting out or re-running after a retry
    pub fn last_attempt_failed(&self) -> bool {
        match self.status {
            ItemStatus::Failed | ItemStatus::Retry => true,
            ItemStatus::Pending | ItemStatus::Queued | ItemStatus::Processing => self.retry_count > 0,
            ItemStatus::Completed | ItemStatus::Cancelled => false,
        }
    }

    /// Item was pushed onto the priority queue
    pub fn mark_queued(&mut self) {
        self.status = ItemStatus::Queued;
    }

    /// Begin an execution attempt
    pub fn start(&mut self) {
        self.status = ItemStatus::Processing;
        self.started_at = Some(Utc::now());
        self.completed_at = None;
        self.progress_percent = None;
        self.current_phase = None;
    }

    /// Mark item as completed successfully
    pub fn complete(&mut self, result: Bytes) {
        self.status = ItemStatus::Completed;
        self.result = Some(result);
        self.error_message = None;
        self.completed_at = Some(Utc::now());
    }

    /// Mark item as failed
    pub fn fail(&mut self, error: String) {
        self.status = ItemStatus::Failed;
        self.error_message = Some(error);
        self.completed_at = Some(Utc::now());
    }

    /// Move a failed item into the retry state.
    /// Returns false, leaving the item Failed, once retries are exhausted.
    pub fn begin_retry(&mut self) -> bool {
        if self.status != ItemStatus::Failed || !self.can_retry() {
            return false;
        }
        self.retry_count += 1;
        self.status = ItemStatus::Retry;
        true
    }

    /// Backoff elapsed, item is eligible for the queue again
    pub fn release(&mut self) {
        self.status = ItemStatus::Pending;
    }

    /// Cancel the item unless it already reached a terminal state.
    /// Returns true if the status changed.
    pub fn cancel(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = ItemStatus::Cancelled;
        self.completed_at = Some(Utc::now());
        true
    }

    pub fn record_progress(&mut self, percent: f32, phase: Option<String>) {
        self.progress_percent = Some(percent.clamp(0.0, 100.0));
        if phase.is_some() {
            self.current_phase = phase;
        }
    }

    /// Wall-clock time of the most recent finished attempt
    pub fn busy_duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) if end >= start => Some(end - start),
            _ => None,
        }
    }
}

/// Description of an item to submit as part of a batch
#[derive(Debug, Clone)]
pub struct ItemSpec {
    payload: ItemPayload,
    priority: Option<Priority>,
    max_retries: Option<u32>,
}

impl ItemSpec {
    pub fn new(payload: impl Into<ItemPayload>) -> Self {
        ItemSpec {
            payload: payload.into(),
            priority: None,
            max_retries: None,
        }
    }

    /// Override the batch-level priority for this item
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Override the configured retry limit for this item
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn build(
        self,
        batch_id: BatchId,
        tenant_id: TenantId,
        default_priority: Priority,
        default_max_retries: u32,
    ) -> WorkItem {
        let mut item = WorkItem::new(
            batch_id,
            tenant_id,
            self.payload,
            self.priority.unwrap_or(default_priority),
        );
        item.max_retries = self.max_retries.unwrap_or(default_max_retries);
        item
    }
}
