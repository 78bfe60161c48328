use prometheus_client::metrics::counter::Counter;
use prometheus_client::registry::Registry;
use tokio::sync::OnceCell;

#[derive(Clone)]
pub struct IngestMetrics {
    pub runs_completed: Counter,
    pub intervals_opened: Counter,
    pub intervals_closed: Counter,
    pub ingest_inconsistencies: Counter,
}

impl IngestMetrics {
    fn init() -> Self {
        Self {
            runs_completed: Counter::default(),
            intervals_opened: Counter::default(),
            intervals_closed: Counter::default(),
            ingest_inconsistencies: Counter::default(),
        }
    }

    pub fn register(registry: &mut Registry) -> Self {
        let metrics = Self::init();

        registry.register(
            "runs_completed",
            "Total number of completed reconciliation runs",
            metrics.runs_completed.clone(),
        );
        registry.register(
            "intervals_opened",
            "Total number of visibility intervals opened",
            metrics.intervals_opened.clone(),
        );
        registry.register(
            "intervals_closed",
            "Total number of visibility intervals closed",
            metrics.intervals_closed.clone(),
        );
        registry.register(
            "ingest_inconsistencies",
            "Total number of skipped feed inconsistencies",
            metrics.ingest_inconsistencies.clone(),
        );

        metrics
    }
}

pub static INGEST_METRICS: OnceCell<IngestMetrics> = OnceCell::const_new();
