use crate::{BatchConfiguration, ItemId, ItemStatus, Priority, TenantId, WorkItem};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier for a batch
pub type BatchId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchStatus {
    Queued,
    Processing,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Queued => "queued",
            BatchStatus::Processing => "processing",
            BatchStatus::Paused => "paused",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
            BatchStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Cancelled
        )
    }
}

/// Item counts by status plus timing, derived on demand
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub pending: usize,
    pub queued: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub retrying: usize,
    pub cancelled: usize,
    pub average_attempts: f64,
    pub elapsed_secs: f64,
}

/// Derived performance figures; never stored as source of truth
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub throughput_per_sec: f64,
    /// Successful share of processed items
    pub efficiency: f64,
    /// Busy slot time over available slot time
    pub resource_utilization: f64,
    /// Slot-seconds spent per processed item
    pub cost_per_item: f64,
}

/// A named collection of work items submitted under one configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub tenant_id: TenantId,
    pub priority: Priority,
    pub config: BatchConfiguration,
    pub status: BatchStatus,

    /// Insertion order is kept for reporting only
    pub items: Vec<WorkItem>,
    #[serde(skip)]
    index: HashMap<ItemId, usize>,

    pub total_items: usize,
    pub processed_items: usize,
    pub successful_items: usize,
    pub failed_items: usize,
    pub skipped_items: usize,
    pub retrying_items: usize,
    pub error_rate: f64,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Batch {
    pub fn new(tenant_id: TenantId, config: BatchConfiguration, priority: Priority) -> Self {
        Batch {
            id: Uuid::new_v4(),
            tenant_id,
            priority,
            config,
            status: BatchStatus::Queued,
            items: Vec::new(),
            index: HashMap::new(),
            total_items: 0,
            processed_items: 0,
            successful_items: 0,
            failed_items: 0,
            skipped_items: 0,
            retrying_items: 0,
            error_rate: 0.0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn push_item(&mut self, item: WorkItem) {
        self.index.insert(item.id, self.items.len());
        self.items.push(item);
        self.total_items = self.items.len();
    }

    /// Position of an item. The index is not serialized, so a batch read back
    /// from a snapshot (or with `items` edited directly) falls back to a scan.
    fn position(&self, id: &ItemId) -> Option<usize> {
        match self.index.get(id) {
            Some(&i) if self.items.get(i).is_some_and(|item| item.id == *id) => Some(i),
            _ => self.items.iter().position(|item| item.id == *id),
        }
    }

    fn reindex(&mut self) {
        self.index = self
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| (item.id, i))
            .collect();
    }

    pub fn item(&self, id: &ItemId) -> Option<&WorkItem> {
        self.position(id).and_then(|i| self.items.get(i))
    }

    pub fn item_mut(&mut self, id: &ItemId) -> Option<&mut WorkItem> {
        if self.index.len() != self.items.len() {
            self.reindex();
        }
        let i = self.position(id)?;
        self.items.get_mut(i)
    }

    /// Recompute aggregate counters by scanning the items
    pub fn refresh_counters(&mut self) {
        let mut successful = 0;
        let mut failed = 0;
        let mut skipped = 0;
        let mut retrying = 0;
        let mut failing = 0;

        for item in &self.items {
            match item.status {
                ItemStatus::Completed => successful += 1,
                ItemStatus::Failed => failed += 1,
                ItemStatus::Cancelled => skipped += 1,
                ItemStatus::Retry => retrying += 1,
                _ => {}
            }
            if item.last_attempt_failed() {
                failing += 1;
            }
        }

        self.total_items = self.items.len();
        self.successful_items = successful;
        self.failed_items = failed;
        self.skipped_items = skipped;
        self.retrying_items = retrying;
        self.processed_items = successful + failed;
        // Failed attempts still being retried count against the batch until they succeed
        self.error_rate = failing as f64 / (successful + failing).max(1) as f64;
    }

    /// Items that can still make progress
    pub fn outstanding_items(&self) -> usize {
        self.items.iter().filter(|i| !i.status.is_terminal()).count()
    }

    /// Queued → Processing
    pub fn start(&mut self) -> bool {
        if self.status != BatchStatus::Queued {
            return false;
        }
        self.status = BatchStatus::Processing;
        self.started_at = Some(Utc::now());
        true
    }

    /// Processing → Paused
    pub fn pause(&mut self) -> bool {
        if self.status != BatchStatus::Processing {
            return false;
        }
        self.status = BatchStatus::Paused;
        true
    }

    /// Paused → Processing
    pub fn resume(&mut self) -> bool {
        if self.status != BatchStatus::Paused {
            return false;
        }
        self.status = BatchStatus::Processing;
        true
    }

    /// Any non-terminal state → Cancelled; unfinished items become Cancelled too
    pub fn cancel(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = BatchStatus::Cancelled;
        for item in &mut self.items {
            item.cancel();
        }
        self.completed_at = Some(Utc::now());
        self.refresh_counters();
        true
    }

    /// Processing → Completed, or Failed when nothing succeeded
    pub fn finish(&mut self) -> bool {
        if self.status != BatchStatus::Processing {
            return false;
        }
        self.refresh_counters();
        self.status = if self.successful_items == 0 && self.failed_items > 0 {
            BatchStatus::Failed
        } else {
            BatchStatus::Completed
        };
        self.completed_at = Some(Utc::now());
        true
    }

    fn elapsed_secs(&self) -> f64 {
        let Some(start) = self.started_at else {
            return 0.0;
        };
        let end = self.completed_at.unwrap_or_else(Utc::now);
        ((end - start).num_milliseconds().max(0) as f64) / 1000.0
    }

    pub fn summary(&self) -> BatchSummary {
        let mut summary = BatchSummary {
            elapsed_secs: self.elapsed_secs(),
            ..Default::default()
        };
        let mut attempts = 0u64;

        for item in &self.items {
            match item.status {
                ItemStatus::Pending => summary.pending += 1,
                ItemStatus::Queued => summary.queued += 1,
                ItemStatus::Processing => summary.processing += 1,
                ItemStatus::Completed => summary.completed += 1,
                ItemStatus::Failed => summary.failed += 1,
                ItemStatus::Retry => summary.retrying += 1,
                ItemStatus::Cancelled => summary.cancelled += 1,
            }
            if item.started_at.is_some() {
                attempts += u64::from(item.retry_count) + 1;
            }
        }

        if !self.items.is_empty() {
            summary.average_attempts = attempts as f64 / self.items.len() as f64;
        }
        summary
    }

    pub fn performance(&self) -> PerformanceMetrics {
        let elapsed = self.elapsed_secs();
        let processed = self
            .items
            .iter()
            .filter(|i| matches!(i.status, ItemStatus::Completed | ItemStatus::Failed))
            .count();
        let successful = self
            .items
            .iter()
            .filter(|i| i.status == ItemStatus::Completed)
            .count();
        let busy_secs: f64 = self
            .items
            .iter()
            .filter_map(|i| i.busy_duration())
            .map(|d| d.num_milliseconds().max(0) as f64 / 1000.0)
            .sum();

        let slot_secs = elapsed * self.config.max_concurrent as f64;

        PerformanceMetrics {
            throughput_per_sec: if elapsed > 0.0 { processed as f64 / elapsed } else { 0.0 },
            efficiency: successful as f64 / processed.max(1) as f64,
            resource_utilization: if slot_secs > 0.0 {
                (busy_secs / slot_secs).clamp(0.0, 1.0)
            } else {
                0.0
            },
            cost_per_item: slot_secs / processed.max(1) as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn batch_with(statuses: &[ItemStatus]) -> Batch {
        let mut batch = Batch::new("tenant".to_string(), BatchConfiguration::default(), Priority::Normal);
        for status in statuses {
            let mut item = WorkItem::new(batch.id, batch.tenant_id.clone(), Bytes::new(), Priority::Normal);
            item.status = *status;
            batch.push_item(item);
        }
        batch
    }

    #[test]
    fn test_refresh_counters() {
        let mut batch = batch_with(&[
            ItemStatus::Completed,
            ItemStatus::Completed,
            ItemStatus::Completed,
            ItemStatus::Completed,
            ItemStatus::Failed,
            ItemStatus::Retry,
            ItemStatus::Queued,
        ]);
        batch.refresh_counters();

        assert_eq!(batch.total_items, 7);
        assert_eq!(batch.successful_items, 4);
        assert_eq!(batch.failed_items, 1);
        assert_eq!(batch.retrying_items, 1);
        assert_eq!(batch.processed_items, 5);
        // One terminal failure plus one item waiting on a retry, over six attempted
        assert!((batch.error_rate - 2.0 / 6.0).abs() < 1e-9);
        assert_eq!(batch.outstanding_items(), 2);
    }

    #[test]
    fn test_error_rate_counts_retried_failures() {
        let mut statuses = vec![ItemStatus::Completed; 6];
        statuses.extend(vec![ItemStatus::Retry; 2]);
        statuses.extend(vec![ItemStatus::Queued; 2]);
        let mut batch = batch_with(&statuses);
        // Two failures already back in the queue for another attempt
        batch.items[8].retry_count = 1;
        batch.items[9].retry_count = 1;
        batch.refresh_counters();

        assert_eq!(batch.failed_items, 0);
        assert_eq!(batch.retrying_items, 2);
        assert!((batch.error_rate - 0.4).abs() < 1e-9);

        // Once the retries succeed the rate reflects terminal outcomes only
        for item in &mut batch.items[6..] {
            item.status = ItemStatus::Completed;
        }
        batch.refresh_counters();
        assert_eq!(batch.error_rate, 0.0);
    }

    #[test]
    fn test_error_rate_with_nothing_processed() {
        let mut batch = batch_with(&[ItemStatus::Queued]);
        batch.refresh_counters();
        assert_eq!(batch.error_rate, 0.0);
    }

    #[test]
    fn test_status_transitions() {
        let mut batch = batch_with(&[ItemStatus::Queued]);
        assert!(!batch.pause());
        assert!(batch.start());
        assert!(!batch.start());
        assert!(batch.pause());
        assert!(!batch.pause());
        assert!(batch.resume());
        assert!(!batch.resume());
        assert!(batch.cancel());
        assert!(!batch.cancel());
        assert!(!batch.resume());
        assert_eq!(batch.items[0].status, ItemStatus::Cancelled);
        assert_eq!(batch.skipped_items, 1);
    }

    #[test]
    fn test_finish_outcome() {
        let mut partial = batch_with(&[ItemStatus::Completed, ItemStatus::Failed]);
        partial.start();
        assert!(partial.finish());
        assert_eq!(partial.status, BatchStatus::Completed);

        let mut all_failed = batch_with(&[ItemStatus::Failed, ItemStatus::Failed]);
        all_failed.start();
        assert!(all_failed.finish());
        assert_eq!(all_failed.status, BatchStatus::Failed);
    }

    #[test]
    fn test_item_lookup() {
        let mut batch = batch_with(&[ItemStatus::Queued, ItemStatus::Queued]);
        let id = batch.items[1].id;
        batch.item_mut(&id).unwrap().status = ItemStatus::Processing;
        assert_eq!(batch.item(&id).unwrap().status, ItemStatus::Processing);
        assert!(batch.item(&Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_item_lookup_after_deserialize() {
        let mut batch = batch_with(&[ItemStatus::Completed, ItemStatus::Failed]);
        batch.refresh_counters();
        let id = batch.items[1].id;

        let json = serde_json::to_string(&batch).unwrap();
        let mut restored: Batch = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.item(&id).unwrap().status, ItemStatus::Failed);
        restored.item_mut(&id).unwrap().status = ItemStatus::Cancelled;
        assert_eq!(restored.item(&id).unwrap().status, ItemStatus::Cancelled);
        assert_eq!(restored.failed_items, 1);
        assert!(restored.item(&Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_summary_and_performance() {
        let mut batch = batch_with(&[ItemStatus::Completed, ItemStatus::Failed, ItemStatus::Retry]);
        let now = Utc::now();
        batch.started_at = Some(now - chrono::Duration::seconds(10));
        batch.completed_at = Some(now);
        for item in &mut batch.items {
            item.started_at = Some(now - chrono::Duration::seconds(5));
            item.completed_at = Some(now);
        }
        batch.items[2].retry_count = 1;

        let summary = batch.summary();
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.retrying, 1);
        assert!((summary.average_attempts - 4.0 / 3.0).abs() < 1e-9);
        assert!((summary.elapsed_secs - 10.0).abs() < 1e-9);

        let perf = batch.performance();
        assert!((perf.throughput_per_sec - 0.2).abs() < 1e-9);
        assert!((perf.efficiency - 0.5).abs() < 1e-9);
        // 15 busy seconds over 10s * 5 slots
        assert!((perf.resource_utilization - 0.3).abs() < 1e-9);
        assert!((perf.cost_per_item - 25.0).abs() < 1e-9);
    }
}
