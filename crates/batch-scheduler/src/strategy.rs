use crate::executor::ItemDispatcher;
use crate::queue::QueueEntry;
use crate::sampler::LoadSampler;
use async_trait::async_trait;
use batch_scheduler_core::ExecutionMode;
use futures::future::join_all;
use std::sync::Arc;
use tracing::debug;

/// Host load above which the adaptive strategy falls back to sequential
pub const ADAPTIVE_LOAD_LIMIT: f64 = 0.8;
/// Recent error rate above which the adaptive strategy falls back to sequential
pub const ADAPTIVE_ERROR_LIMIT: f64 = 0.2;

/// Drives one round of dequeued items to completion.
/// Item failures are absorbed by the dispatcher; strategies never fail.
#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, dispatcher: &ItemDispatcher, entries: Vec<QueueEntry>);
}

/// One item at a time, in round order
pub struct SequentialStrategy;

#[async_trait]
impl ExecutionStrategy for SequentialStrategy {
    fn name(&self) -> &'static str {
        "sequential"
    }

    async fn execute(&self, dispatcher: &ItemDispatcher, entries: Vec<QueueEntry>) {
        for entry in entries {
            dispatcher.dispatch(entry).await;
        }
    }
}

/// Every item through the concurrency gate at once; waits for all of them
pub struct ConcurrentStrategy;

#[async_trait]
impl ExecutionStrategy for ConcurrentStrategy {
    fn name(&self) -> &'static str {
        "concurrent"
    }

    async fn execute(&self, dispatcher: &ItemDispatcher, entries: Vec<QueueEntry>) {
        join_all(entries.into_iter().map(|entry| dispatcher.dispatch_gated(entry))).await;
    }
}

/// Urgent and high priority items sequentially first, the rest concurrently
pub struct HybridStrategy;

#[async_trait]
impl ExecutionStrategy for HybridStrategy {
    fn name(&self) -> &'static str {
        "hybrid"
    }

    async fn execute(&self, dispatcher: &ItemDispatcher, entries: Vec<QueueEntry>) {
        let (urgent, rest): (Vec<_>, Vec<_>) =
            entries.into_iter().partition(|entry| entry.priority.is_urgent());

        debug!(
            batch_id = %dispatcher.batch_id(),
            urgent = urgent.len(),
            rest = rest.len(),
            "Hybrid round"
        );

        SequentialStrategy.execute(dispatcher, urgent).await;
        ConcurrentStrategy.execute(dispatcher, rest).await;
    }
}

/// Picks sequential or concurrent each round from host load and recent errors
pub struct AdaptiveStrategy {
    sampler: Arc<dyn LoadSampler>,
}

impl AdaptiveStrategy {
    pub fn new(sampler: Arc<dyn LoadSampler>) -> Self {
        AdaptiveStrategy { sampler }
    }

    pub fn prefers_sequential(load: f64, error_rate: f64) -> bool {
        load > ADAPTIVE_LOAD_LIMIT || error_rate > ADAPTIVE_ERROR_LIMIT
    }
}

#[async_trait]
impl ExecutionStrategy for AdaptiveStrategy {
    fn name(&self) -> &'static str {
        "adaptive"
    }

    async fn execute(&self, dispatcher: &ItemDispatcher, entries: Vec<QueueEntry>) {
        let load = self.sampler.system_load();
        let error_rate = dispatcher.recent_error_rate();
        let sequential = Self::prefers_sequential(load, error_rate);

        debug!(
            batch_id = %dispatcher.batch_id(),
            load,
            error_rate,
            sequential,
            "Adaptive round"
        );

        if sequential {
            SequentialStrategy.execute(dispatcher, entries).await;
        } else {
            ConcurrentStrategy.execute(dispatcher, entries).await;
        }
    }
}

/// Strategy for a batch, chosen once at submission
pub fn strategy_for(mode: ExecutionMode, sampler: Arc<dyn LoadSampler>) -> Arc<dyn ExecutionStrategy> {
    match mode {
        ExecutionMode::Sequential => Arc::new(SequentialStrategy),
        ExecutionMode::Concurrent => Arc::new(ConcurrentStrategy),
        ExecutionMode::Hybrid => Arc::new(HybridStrategy),
        ExecutionMode::Adaptive => Arc::new(AdaptiveStrategy::new(sampler)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::FixedLoad;

    #[test]
    fn test_adaptive_thresholds() {
        assert!(!AdaptiveStrategy::prefers_sequential(0.5, 0.1));
        assert!(AdaptiveStrategy::prefers_sequential(0.81, 0.0));
        assert!(AdaptiveStrategy::prefers_sequential(0.1, 0.25));
        assert!(!AdaptiveStrategy::prefers_sequential(0.8, 0.2));
    }

    #[test]
    fn test_strategy_selection() {
        let sampler: Arc<dyn LoadSampler> = Arc::new(FixedLoad(0.1));
        assert_eq!(strategy_for(ExecutionMode::Sequential, sampler.clone()).name(), "sequential");
        assert_eq!(strategy_for(ExecutionMode::Concurrent, sampler.clone()).name(), "concurrent");
        assert_eq!(strategy_for(ExecutionMode::Hybrid, sampler.clone()).name(), "hybrid");
        assert_eq!(strategy_for(ExecutionMode::Adaptive, sampler).name(), "adaptive");
    }
}
