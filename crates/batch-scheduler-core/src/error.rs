use crate::BatchId;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("Invalid batch configuration: {0}")]
    InvalidConfig(String),

    #[error("Batch not found: {0}")]
    BatchNotFound(BatchId),

    #[error("Scheduler is shutting down")]
    ShuttingDown,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Item execution failed: {0}")]
    ItemExecution(String),

    #[error("Item execution timed out after {0:?}")]
    Timeout(Duration),

    #[error("Shutdown deadline exceeded, {remaining} batch workers still active")]
    ShutdownTimeout { remaining: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Metrics error: {0}")]
    Metrics(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
