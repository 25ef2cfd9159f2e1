use crate::{Result, SchedulerError, DEFAULT_MAX_RETRIES};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the items of one scheduling round are dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Concurrent,
    Sequential,
    Hybrid,
    Adaptive,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Concurrent => "concurrent",
            ExecutionMode::Sequential => "sequential",
            ExecutionMode::Hybrid => "hybrid",
            ExecutionMode::Adaptive => "adaptive",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "concurrent" => Some(ExecutionMode::Concurrent),
            "sequential" => Some(ExecutionMode::Sequential),
            "hybrid" => Some(ExecutionMode::Hybrid),
            "adaptive" => Some(ExecutionMode::Adaptive),
            _ => None,
        }
    }
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::Concurrent
    }
}

/// Per-batch scheduling configuration, immutable once the batch is submitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfiguration {
    /// Items pulled from the queue per scheduling round
    pub batch_size: usize,
    /// Simultaneous executions allowed within the batch
    pub max_concurrent: usize,
    pub timeout_per_item_ms: u64,
    pub mode: ExecutionMode,
    pub retry_enabled: bool,
    /// Retry limit for items that do not set their own
    pub max_retries: u32,
    pub auto_pause_on_errors: bool,
    /// Error rate above which the batch auto-pauses
    pub error_threshold: f64,
    pub progress_update_interval_ms: u64,
    /// Also require a dequeued entry's tenant to match the batch's tenant.
    /// Workers only ever take entries of their own batch, and every entry of a
    /// batch carries its tenant, so turning this off never lets a worker run
    /// another batch's or tenant's items. It is a consistency check, not a
    /// scheduling mode.
    pub tenant_isolation: bool,
}

impl Default for BatchConfiguration {
    fn default() -> Self {
        BatchConfiguration {
            batch_size: 10,
            max_concurrent: 5,
            timeout_per_item_ms: 300_000, // 5 minutes
            mode: ExecutionMode::Concurrent,
            retry_enabled: true,
            max_retries: DEFAULT_MAX_RETRIES,
            auto_pause_on_errors: true,
            error_threshold: 0.30,
            progress_update_interval_ms: 1_000,
            tenant_isolation: true,
        }
    }
}

impl BatchConfiguration {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size < 1 {
            return Err(SchedulerError::InvalidConfig(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if self.max_concurrent < 1 {
            return Err(SchedulerError::InvalidConfig(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.timeout_per_item_ms == 0 {
            return Err(SchedulerError::InvalidConfig(
                "timeout_per_item_ms must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.error_threshold) {
            return Err(SchedulerError::InvalidConfig(format!(
                "error_threshold must be within [0, 1] (got {})",
                self.error_threshold
            )));
        }
        Ok(())
    }

    pub fn timeout_per_item(&self) -> Duration {
        Duration::from_millis(self.timeout_per_item_ms)
    }

    pub fn progress_update_interval(&self) -> Duration {
        Duration::from_millis(self.progress_update_interval_ms)
    }
}
