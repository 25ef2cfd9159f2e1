mod batch;
mod config;
mod error;
mod item;
mod priority;

pub use batch::{Batch, BatchId, BatchStatus, BatchSummary, PerformanceMetrics};
pub use config::{BatchConfiguration, ExecutionMode};
pub use error::{Result, SchedulerError};
pub use item::{ItemId, ItemPayload, ItemSpec, ItemStatus, TenantId, WorkItem};
pub use priority::Priority;

/// Default number of retries granted to a work item.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
