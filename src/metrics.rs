//! Prometheus instrumentation for the sequencer/integrator/follower loops,
//! exposed as text exposition format on the `/metrics` HTTP route.

use prometheus::{Encoder, Histogram, HistogramOpts, IntGauge, Opts, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    pub queue_depth: IntGauge,
    pub batch_size: Histogram,
    pub integration_latency_seconds: Histogram,
    pub follower_lag: IntGauge,
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        let registry = Registry::new();

        let queue_depth = IntGauge::with_opts(Opts::new(
            "sequencer_queue_depth",
            "Entries currently queued, awaiting batch assignment",
        ))
        .expect("static metric options are valid");
        let batch_size = Histogram::with_opts(
            HistogramOpts::new("sequencer_batch_size", "Number of entries per committed batch")
                .buckets(vec![1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0, 256.0]),
        )
        .expect("static metric options are valid");
        let integration_latency_seconds = Histogram::with_opts(HistogramOpts::new(
            "sequencer_integration_latency_seconds",
            "Wall-clock time to integrate one batch",
        ))
        .expect("static metric options are valid");
        let follower_lag = IntGauge::with_opts(Opts::new(
            "sequencer_follower_lag",
            "Integrated size minus the antispam follower's processed position",
        ))
        .expect("static metric options are valid");

        registry
            .register(Box::new(queue_depth.clone()))
            .and_then(|()| registry.register(Box::new(batch_size.clone())))
            .and_then(|()| registry.register(Box::new(integration_latency_seconds.clone())))
            .and_then(|()| registry.register(Box::new(follower_lag.clone())))
            .expect("metric names are unique within this registry");

        Self {
            registry,
            queue_depth,
            batch_size,
            integration_latency_seconds,
            follower_lag,
        }
    }

    /// Renders every registered metric in Prometheus text exposition format.
    #[must_use]
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        encoder
            .encode(&families, &mut buf)
            .expect("encoding gathered metric families never fails");
        String::from_utf8(buf).expect("prometheus text exposition is always valid utf-8")
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
