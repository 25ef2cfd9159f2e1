use anyhow::Context;
use async_trait::async_trait;
use batch_scheduler::{
    BatchController, ExecutionContext, ItemPayload, SchedulerConfig, UnitOfWork, WorkResult,
};
use batch_scheduler_core::{Batch, BatchId, BatchStatus, ExecutionMode, ItemSpec, Priority};
use bytes::Bytes;
use clap::{Parser, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Table};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "bs-runner")]
#[command(about = "Run simulated batches through the batch scheduler", long_about = None)]
struct Args {
    /// Path to scheduler configuration file (YAML)
    #[arg(long)]
    config: Option<String>,

    /// Number of tenants, one batch each
    #[arg(short, long, default_value = "2")]
    tenants: usize,

    /// Items per batch
    #[arg(short, long, default_value = "25")]
    items: usize,

    /// Execution mode, overriding the config file
    #[arg(short, long, value_enum)]
    mode: Option<ModeArg>,

    /// Per-attempt failure probability of the simulated work
    #[arg(long, default_value = "0.1")]
    failure_rate: f64,

    /// Upper bound of simulated work duration in milliseconds
    #[arg(long, default_value = "200")]
    max_work_ms: u64,

    /// Resume batches that were auto-paused instead of leaving them paused
    #[arg(long)]
    auto_resume: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Print final batches as JSON instead of a table
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Sequential,
    Concurrent,
    Hybrid,
    Adaptive,
}

impl From<ModeArg> for ExecutionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Sequential => ExecutionMode::Sequential,
            ModeArg::Concurrent => ExecutionMode::Concurrent,
            ModeArg::Hybrid => ExecutionMode::Hybrid,
            ModeArg::Adaptive => ExecutionMode::Adaptive,
        }
    }
}

/// Sleeps for a random duration in a few phases and fails at random
struct SimulatedWork {
    failure_rate: f64,
    max_work_ms: u64,
}

#[async_trait]
impl UnitOfWork for SimulatedWork {
    async fn execute(&self, ctx: ExecutionContext, payload: ItemPayload) -> WorkResult {
        let (work_ms, fails) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_range(1..=self.max_work_ms.max(1)),
                rng.gen_bool(self.failure_rate.clamp(0.0, 1.0)),
            )
        };

        let step = Duration::from_millis(work_ms / 4);
        for (i, phase) in ["fetch", "transform", "store", "verify"].iter().enumerate() {
            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err("cancelled".to_string()),
                _ = tokio::time::sleep(step) => {}
            }
            ctx.progress.report((i + 1) as f32 * 25.0, Some(*phase));
        }

        if fails {
            return Err(format!(
                "simulated failure on attempt {} of {}",
                ctx.attempt + 1,
                String::from_utf8_lossy(&payload)
            ));
        }
        Ok(Bytes::from(format!("processed in {}ms", work_ms)))
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}

fn log_progress(batch_id: BatchId, batch: &Batch) -> Result<(), String> {
    info!(
        batch_id = %batch_id,
        status = batch.status.as_str(),
        processed = batch.processed_items,
        total = batch.total_items,
        failed = batch.failed_items,
        retrying = batch.retrying_items,
        "Batch progress"
    );
    Ok(())
}

fn render_table(batches: &[Batch]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        "Batch", "Tenant", "Status", "Done", "Failed", "Skipped", "Error Rate", "Items/s",
    ]);

    for batch in batches {
        let performance = batch.performance();
        table.add_row(vec![
            batch.id.to_string(),
            batch.tenant_id.clone(),
            batch.status.as_str().to_string(),
            format!("{}/{}", batch.successful_items, batch.total_items),
            batch.failed_items.to_string(),
            batch.skipped_items.to_string(),
            format!("{:.1}%", batch.error_rate * 100.0),
            format!("{:.2}", performance.throughput_per_sec),
        ]);
    }
    table
}

fn settled(batch: &Batch) -> bool {
    batch.status.is_terminal() || batch.status == BatchStatus::Paused
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let mut config = match &args.config {
        Some(path) => SchedulerConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => SchedulerConfig::default(),
    };
    if let Some(mode) = args.mode {
        config.default_batch.mode = mode.into();
    }
    let shutdown_timeout = config.shutdown_timeout();
    let batch_config = config.default_batch.clone();

    let shutdown = CancellationToken::new();
    let executor = Arc::new(SimulatedWork {
        failure_rate: args.failure_rate,
        max_work_ms: args.max_work_ms,
    });
    let controller = BatchController::with_shutdown_token(config, executor, shutdown.clone())?;
    controller.register_progress_observer(log_progress);

    let mut batch_ids = Vec::with_capacity(args.tenants);
    for t in 0..args.tenants {
        let tenant = format!("tenant-{}", t + 1);
        let items = (0..args.items)
            .map(|i| {
                let spec = ItemSpec::new(Bytes::from(format!("{}/item-{}", tenant, i + 1)));
                if i % 10 == 0 {
                    spec.priority(Priority::High)
                } else {
                    spec
                }
            })
            .collect();
        let batch_id = controller.submit(tenant, items, batch_config.clone(), Priority::Normal)?;
        batch_ids.push(batch_id);
    }

    let signal = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        signal.cancel();
    });

    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let batches: Vec<Batch> = batch_ids
            .iter()
            .filter_map(|id| controller.get_status(id))
            .collect();

        if args.auto_resume {
            for batch in batches.iter().filter(|b| b.status == BatchStatus::Paused) {
                warn!(batch_id = %batch.id, error_rate = batch.error_rate, "Resuming auto-paused batch");
                controller.resume(&batch.id);
            }
        }
        let done = if args.auto_resume {
            batches.iter().all(|b| b.status.is_terminal())
        } else {
            batches.iter().all(settled)
        };
        if done {
            break;
        }
    }

    if let Err(e) = controller.shutdown(shutdown_timeout).await {
        warn!("Shutdown incomplete: {}", e);
    }

    let batches: Vec<Batch> = batch_ids
        .iter()
        .filter_map(|id| controller.get_status(id))
        .collect();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&batches)?);
    } else {
        println!("{}", render_table(&batches));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_flag_values() {
        let args = Args::try_parse_from(["bs-runner", "--mode", "hybrid"]).unwrap();
        assert_eq!(args.mode.map(ExecutionMode::from), Some(ExecutionMode::Hybrid));

        let args = Args::try_parse_from(["bs-runner"]).unwrap();
        assert!(args.mode.is_none());

        assert!(Args::try_parse_from(["bs-runner", "--mode", "eventually"]).is_err());
    }
}
