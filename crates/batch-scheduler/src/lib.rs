pub mod config;
pub mod controller;
pub mod executor;
pub mod gate;
pub mod metrics;
pub mod queue;
pub mod retry;
pub mod sampler;
pub mod stats;
pub mod strategy;

mod handle;
mod worker;

pub use config::{RetrySettings, SchedulerConfig};
pub use controller::BatchController;
pub use executor::{ExecutionContext, ItemDispatcher, ProgressReporter, UnitOfWork, WorkResult};
pub use gate::{ConcurrencyGate, GatePermit};
pub use metrics::SchedulerMetrics;
pub use queue::{PriorityQueue, QueueEntry};
pub use retry::{RetryPolicy, RetryScheduler};
pub use sampler::{FixedLoad, LoadSampler, SystemLoadSampler};
pub use stats::{ObserverId, ProgressObserver, StatsAggregator};
pub use strategy::{
    strategy_for, AdaptiveStrategy, ConcurrentStrategy, ExecutionStrategy, HybridStrategy,
    SequentialStrategy,
};

pub use batch_scheduler_core::*;
