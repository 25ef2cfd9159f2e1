use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

/// Prometheus metrics for the scheduler
pub struct SchedulerMetrics {
    pub registry: Registry,

    // Item outcomes: completed, failed, retried, cancelled
    pub items_total: IntCounterVec,

    pub items_in_flight: IntGauge,
    pub queue_depth: IntGauge,

    pub item_duration: HistogramVec,

    // Batches reaching a terminal or paused state
    pub batches_total: IntCounterVec,
}

impl SchedulerMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let items_total = IntCounterVec::new(
            Opts::new("bs_items_total", "Work item outcomes"),
            &["outcome"],
        )?;
        registry.register(Box::new(items_total.clone()))?;

        let items_in_flight =
            IntGauge::new("bs_items_in_flight", "Unit-of-work calls currently running")?;
        registry.register(Box::new(items_in_flight.clone()))?;

        let queue_depth = IntGauge::new("bs_queue_depth", "Entries waiting in the priority queue")?;
        registry.register(Box::new(queue_depth.clone()))?;

        let item_duration = HistogramVec::new(
            HistogramOpts::new(
                "bs_item_duration_seconds",
                "Unit-of-work execution time in seconds",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(item_duration.clone()))?;

        let batches_total = IntCounterVec::new(
            Opts::new("bs_batches_total", "Batches by final worker status"),
            &["status"],
        )?;
        registry.register(Box::new(batches_total.clone()))?;

        Ok(SchedulerMetrics {
            registry,
            items_total,
            items_in_flight,
            queue_depth,
            item_duration,
            batches_total,
        })
    }

    pub fn inc_items(&self, outcome: &str) {
        self.items_total.with_label_values(&[outcome]).inc();
    }

    pub fn add_items(&self, outcome: &str, count: usize) {
        self.items_total.with_label_values(&[outcome]).inc_by(count as u64);
    }

    pub fn observe_duration(&self, outcome: &str, duration_secs: f64) {
        self.item_duration
            .with_label_values(&[outcome])
            .observe(duration_secs);
    }

    pub fn inc_batches(&self, status: &str) {
        self.batches_total.with_label_values(&[status]).inc();
    }

    /// Encode all metrics in the text exposition format
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
