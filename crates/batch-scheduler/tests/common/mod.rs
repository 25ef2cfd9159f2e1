#![allow(dead_code)]

use async_trait::async_trait;
use batch_scheduler::{
    Batch, BatchController, BatchId, ExecutionContext, ItemPayload, ItemSpec, SchedulerConfig,
    UnitOfWork, WorkResult,
};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Instrumented executor: records calls, tracks concurrency, fails on demand
#[derive(Default)]
pub struct TestWork {
    pub delay: Duration,
    pub failing: HashSet<String>,
    pub fail_all: bool,
    pub calls: Mutex<Vec<(BatchId, String)>>,
    pub attempts: Mutex<HashMap<String, usize>>,
    pub running: AtomicUsize,
    pub max_running: AtomicUsize,
}

impl TestWork {
    pub fn succeeding(delay: Duration) -> Self {
        TestWork {
            delay,
            ..Default::default()
        }
    }

    pub fn failing_on(names: &[&str], delay: Duration) -> Self {
        TestWork {
            delay,
            failing: names.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn always_failing() -> Self {
        TestWork {
            fail_all: true,
            ..Default::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn attempts_of(&self, name: &str) -> usize {
        self.attempts.lock().get(name).copied().unwrap_or(0)
    }

    pub fn order(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(_, name)| name.clone()).collect()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UnitOfWork for TestWork {
    async fn execute(&self, ctx: ExecutionContext, payload: ItemPayload) -> WorkResult {
        let name = String::from_utf8_lossy(&payload).to_string();
        self.calls.lock().push((ctx.batch_id, name.clone()));
        *self.attempts.lock().entry(name.clone()).or_insert(0) += 1;

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.running.fetch_sub(1, Ordering::SeqCst);

        if self.fail_all || self.failing.contains(&name) {
            Err(format!("{} failed", name))
        } else {
            Ok(Bytes::from(format!("{} done", name)))
        }
    }
}

/// Scheduler settings with millisecond-scale retry delays
pub fn fast_config() -> SchedulerConfig {
    let mut config = SchedulerConfig::default();
    config.idle_poll_interval_ms = 10;
    config.retry.base_delay_ms = 5;
    config.retry.max_delay_ms = 40;
    config
}

pub fn controller(work: Arc<TestWork>) -> BatchController {
    BatchController::new(fast_config(), work).unwrap()
}

pub fn specs(prefix: &str, count: usize) -> Vec<ItemSpec> {
    (1..=count)
        .map(|i| ItemSpec::new(Bytes::from(format!("{}-{}", prefix, i))))
        .collect()
}

/// Poll until the batch satisfies `done`, panicking after five seconds
pub async fn wait_for<F>(controller: &BatchController, batch_id: &BatchId, done: F) -> Batch
where
    F: Fn(&Batch) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let batch = controller.get_status(batch_id).expect("batch registered");
        if done(&batch) {
            return batch;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("batch did not reach expected state, status {:?}", batch.status);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_terminal(controller: &BatchController, batch_id: &BatchId) -> Batch {
    wait_for(controller, batch_id, |b| b.status.is_terminal()).await
}

pub async fn wait_until_calls(work: &TestWork, calls: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while work.call_count() < calls {
        if tokio::time::Instant::now() > deadline {
            panic!("expected {} executor calls, saw {}", calls, work.call_count());
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
