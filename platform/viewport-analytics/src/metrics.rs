use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Pipeline counters, each registered on a private registry
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    // Counters
    pub events_dispatched_total: IntCounterVec,
    pub secret_lookups_total: IntCounterVec,
    pub missing_metadata_total: IntCounter,

    // Histograms
    pub secret_lookup_duration_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let events_dispatched_total = IntCounterVec::new(
            Opts::new("analytics_events_dispatched_total", "Analytics events sent to the collection endpoint"),
            &["event_type", "result"], // result: ok|error
        )
        .expect("metric");

        let secret_lookups_total = IntCounterVec::new(
            Opts::new("analytics_secret_lookups_total", "Product secret key lookups"),
            &["result"], // ok|error|timeout
        )
        .expect("metric");

        let missing_metadata_total = IntCounter::with_opts(Opts::new(
            "analytics_missing_metadata_total",
            "Visible elements without cached product metadata",
        ))
        .expect("metric");

        let secret_lookup_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "analytics_secret_lookup_duration_seconds",
            "Product secret key lookup duration seconds",
        ))
        .expect("metric");

        registry
            .register(Box::new(events_dispatched_total.clone()))
            .expect("register");
        registry
            .register(Box::new(secret_lookups_total.clone()))
            .expect("register");
        registry
            .register(Box::new(missing_metadata_total.clone()))
            .expect("register");
        registry
            .register(Box::new(secret_lookup_duration_seconds.clone()))
            .expect("register");

        Self {
            registry,
            events_dispatched_total,
            secret_lookups_total,
            missing_metadata_total,
            secret_lookup_duration_seconds,
        }
    }

    /// Prometheus text exposition of every metric
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
