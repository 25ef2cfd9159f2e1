use batch_scheduler_core::{
    BatchId, ItemId, Priority, Result, SchedulerError, TenantId, WorkItem,
};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Default bound on the number of queued items
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Reference to a queued work item; the item itself stays in its batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub item_id: ItemId,
    pub batch_id: BatchId,
    pub tenant_id: TenantId,
    pub priority: Priority,
}

impl From<&WorkItem> for QueueEntry {
    fn from(item: &WorkItem) -> Self {
        QueueEntry {
            item_id: item.id,
            batch_id: item.batch_id,
            tenant_id: item.tenant_id.clone(),
            priority: item.priority,
        }
    }
}

/// Heap slot ordered by (priority, insertion sequence)
struct SequencedEntry {
    seq: u64,
    entry: QueueEntry,
}

impl PartialEq for SequencedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for SequencedEntry {}

impl PartialOrd for SequencedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SequencedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: the lowest (priority, seq) must compare greatest
        (other.entry.priority, other.seq).cmp(&(self.entry.priority, self.seq))
    }
}

struct QueueInner {
    heap: BinaryHeap<SequencedEntry>,
    next_seq: u64,
}

impl QueueInner {
    fn push(&mut self, entry: QueueEntry) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(SequencedEntry { seq, entry });
    }
}

/// Bounded priority queue shared by every batch worker and the retry path
pub struct PriorityQueue {
    inner: Mutex<QueueInner>,
    capacity: usize,
}

impl PriorityQueue {
    pub fn new(capacity: usize) -> Self {
        PriorityQueue {
            inner: Mutex::new(QueueInner {
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
            capacity,
        }
    }

    /// Push an entry, failing when the queue is at capacity
    pub fn push(&self, entry: QueueEntry) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.heap.len() >= self.capacity {
            return Err(SchedulerError::QueueFull {
                capacity: self.capacity,
            });
        }
        inner.push(entry);
        Ok(())
    }

    /// Push every entry or none of them
    pub fn push_all(&self, entries: Vec<QueueEntry>) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.heap.len() + entries.len() > self.capacity {
            return Err(SchedulerError::QueueFull {
                capacity: self.capacity,
            });
        }
        for entry in entries {
            inner.push(entry);
        }
        Ok(())
    }

    /// Pop the lowest (priority, sequence) entry
    pub fn pop(&self) -> Option<QueueEntry> {
        self.inner.lock().heap.pop().map(|slot| slot.entry)
    }

    /// Pop up to `max` entries accepted by `filter`, in queue order.
    /// Rejected entries go back with their original sequence numbers.
    pub fn drain_matching<F>(&self, max: usize, filter: F) -> Vec<QueueEntry>
    where
        F: Fn(&QueueEntry) -> bool,
    {
        let mut inner = self.inner.lock();
        let mut taken = Vec::with_capacity(max.min(inner.heap.len()));
        let mut skipped = Vec::new();

        while taken.len() < max {
            let Some(slot) = inner.heap.pop() else {
                break;
            };
            if filter(&slot.entry) {
                taken.push(slot.entry);
            } else {
                skipped.push(slot);
            }
        }

        inner.heap.extend(skipped);
        taken
    }

    /// Drop every entry that belongs to a batch
    pub fn remove_batch(&self, batch_id: &BatchId) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.heap.len();
        inner.heap.retain(|slot| slot.entry.batch_id != *batch_id);
        before - inner.heap.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().heap.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn entry(batch_id: BatchId, tenant: &str, priority: Priority) -> QueueEntry {
        QueueEntry {
            item_id: Uuid::new_v4(),
            batch_id,
            tenant_id: tenant.to_string(),
            priority,
        }
    }

    fn priority_from(index: u8) -> Priority {
        Priority::try_from(index % 5 + 1).unwrap()
    }

    #[test]
    fn test_priority_ordering() {
        let queue = PriorityQueue::default();
        let batch = Uuid::new_v4();

        let low = entry(batch, "t", Priority::Low);
        let urgent = entry(batch, "t", Priority::Urgent);
        let normal = entry(batch, "t", Priority::Normal);

        queue.push(low.clone()).unwrap();
        queue.push(urgent.clone()).unwrap();
        queue.push(normal.clone()).unwrap();

        assert_eq!(queue.pop().unwrap().item_id, urgent.item_id);
        assert_eq!(queue.pop().unwrap().item_id, normal.item_id);
        assert_eq!(queue.pop().unwrap().item_id, low.item_id);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_fifo_within_priority() {
        let queue = PriorityQueue::default();
        let batch = Uuid::new_v4();
        let entries: Vec<_> = (0..20).map(|_| entry(batch, "t", Priority::Normal)).collect();

        for e in &entries {
            queue.push(e.clone()).unwrap();
        }
        for e in &entries {
            assert_eq!(queue.pop().unwrap().item_id, e.item_id);
        }
    }

    #[test]
    fn test_bounded_capacity() {
        let queue = PriorityQueue::new(3);
        let batch = Uuid::new_v4();

        for _ in 0..3 {
            queue.push(entry(batch, "t", Priority::Normal)).unwrap();
        }
        let overflow = queue.push(entry(batch, "t", Priority::Normal));
        assert!(matches!(overflow, Err(SchedulerError::QueueFull { capacity: 3 })));

        queue.pop().unwrap();
        assert!(queue.push(entry(batch, "t", Priority::Normal)).is_ok());
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_push_all_is_atomic() {
        let queue = PriorityQueue::new(4);
        let batch = Uuid::new_v4();
        queue.push(entry(batch, "t", Priority::Normal)).unwrap();

        let many: Vec<_> = (0..4).map(|_| entry(batch, "t", Priority::Normal)).collect();
        assert!(queue.push_all(many).is_err());
        assert_eq!(queue.len(), 1);

        let fits: Vec<_> = (0..3).map(|_| entry(batch, "t", Priority::Normal)).collect();
        assert!(queue.push_all(fits).is_ok());
        assert_eq!(queue.len(), 4);
    }

    #[test]
    fn test_drain_matching_leaves_other_tenants() {
        let queue = PriorityQueue::default();
        let batch_a = Uuid::new_v4();
        let batch_b = Uuid::new_v4();

        let b_urgent = entry(batch_b, "tenant-b", Priority::Urgent);
        let a_first = entry(batch_a, "tenant-a", Priority::Normal);
        let a_second = entry(batch_a, "tenant-a", Priority::Normal);
        queue.push(a_first.clone()).unwrap();
        queue.push(b_urgent.clone()).unwrap();
        queue.push(a_second.clone()).unwrap();

        let drained = queue.drain_matching(10, |e| e.tenant_id == "tenant-a");
        let ids: Vec<_> = drained.iter().map(|e| e.item_id).collect();
        assert_eq!(ids, vec![a_first.item_id, a_second.item_id]);

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().unwrap().item_id, b_urgent.item_id);
    }

    #[test]
    fn test_drain_respects_max_and_keeps_sequence() {
        let queue = PriorityQueue::default();
        let batch = Uuid::new_v4();
        let other = Uuid::new_v4();

        let foreign = entry(other, "t", Priority::Normal);
        let mine: Vec<_> = (0..3).map(|_| entry(batch, "t", Priority::Normal)).collect();
        let late_foreign = entry(other, "t", Priority::Normal);

        queue.push(foreign.clone()).unwrap();
        for e in &mine {
            queue.push(e.clone()).unwrap();
        }
        queue.push(late_foreign.clone()).unwrap();

        let drained = queue.drain_matching(2, |e| e.batch_id == batch);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].item_id, mine[0].item_id);

        // The skipped entry keeps its place ahead of later pushes
        assert_eq!(queue.pop().unwrap().item_id, foreign.item_id);
        assert_eq!(queue.pop().unwrap().item_id, mine[2].item_id);
        assert_eq!(queue.pop().unwrap().item_id, late_foreign.item_id);
    }

    #[test]
    fn test_remove_batch() {
        let queue = PriorityQueue::default();
        let batch_a = Uuid::new_v4();
        let batch_b = Uuid::new_v4();
        for _ in 0..3 {
            queue.push(entry(batch_a, "t", Priority::Normal)).unwrap();
        }
        queue.push(entry(batch_b, "t", Priority::Normal)).unwrap();

        assert_eq!(queue.remove_batch(&batch_a), 3);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.pop().unwrap().batch_id, batch_b);
        assert!(queue.is_empty());
    }

    proptest! {
        #[test]
        fn prop_pop_order_is_priority_then_fifo(priorities in proptest::collection::vec(0u8..5, 0..200)) {
            let queue = PriorityQueue::new(1000);
            let batch = Uuid::new_v4();
            let mut pushed = Vec::new();

            for (index, p) in priorities.iter().enumerate() {
                let e = entry(batch, "t", priority_from(*p));
                pushed.push((e.priority, index, e.item_id));
                queue.push(e).unwrap();
            }

            pushed.sort_by_key(|(priority, index, _)| (*priority, *index));
            for (_, _, id) in pushed {
                prop_assert_eq!(queue.pop().map(|e| e.item_id), Some(id));
            }
            prop_assert!(queue.is_empty());
        }
    }
}
