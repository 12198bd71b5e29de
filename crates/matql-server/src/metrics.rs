use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Prometheus collectors for the materialization pipeline
pub struct Metrics {
    registry: Registry,
    materializations: IntCounterVec,
    rows: IntCounter,
    duration: Histogram,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let materializations = IntCounterVec::new(
            Opts::new("matql_materializations_total", "Materialization requests by outcome"),
            &["outcome"],
        )?;
        let rows = IntCounter::new("matql_rows_materialized_total", "Rows written to destination tables")?;
        let duration = Histogram::with_opts(
            HistogramOpts::new(
                "matql_materialization_duration_seconds",
                "Wall time of a materialization, source query included",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]),
        )?;

        registry.register(Box::new(materializations.clone()))?;
        registry.register(Box::new(rows.clone()))?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            registry,
            materializations,
            rows,
            duration,
        })
    }

    pub fn record_success(&self, rows: u64, seconds: f64) {
        self.materializations.with_label_values(&["success"]).inc();
        self.rows.inc_by(rows);
        self.duration.observe(seconds);
    }

    /// `outcome` is the error kind reported to the caller
    pub fn record_failure(&self, outcome: &str, seconds: f64) {
        self.materializations.with_label_values(&[outcome]).inc();
        self.duration.observe(seconds);
    }

    /// Text exposition format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
