use crate::queue::DEFAULT_QUEUE_CAPACITY;
use crate::retry::RetryPolicy;
use batch_scheduler_core::{BatchConfiguration, Result, SchedulerError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Process-wide scheduler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub queue_capacity: usize,
    /// How long a worker with nothing to dequeue waits before looking again
    pub idle_poll_interval_ms: u64,
    pub retry: RetrySettings,
    pub shutdown_timeout_secs: u64,
    /// Configuration applied by hosts that do not supply their own
    pub default_batch: BatchConfiguration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            base_delay_ms: 30_000,
            max_delay_ms: 300_000,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            idle_poll_interval_ms: 250,
            retry: RetrySettings::default(),
            shutdown_timeout_secs: 30,
            default_batch: BatchConfiguration::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: SchedulerConfig =
            serde_yaml::from_str(contents).map_err(|e| SchedulerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(SchedulerError::Config(
                "queue_capacity must be positive".to_string(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(SchedulerError::Config(
                "retry.base_delay_ms exceeds retry.max_delay_ms".to_string(),
            ));
        }
        self.default_batch
            .validate()
            .map_err(|e| SchedulerError::Config(e.to_string()))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.retry.base_delay_ms),
            Duration::from_millis(self.retry.max_delay_ms),
        )
    }

    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.idle_poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
