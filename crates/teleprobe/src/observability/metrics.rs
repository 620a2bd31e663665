use super::GLOBAL_LABELS;
use serde::Deserialize;
use std::net::SocketAddr;

/// Histogram buckets to measure the distribution of request durations in seconds
pub(crate) const DEFAULT_DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

#[derive(Deserialize)]
struct MetricsConfig {
    /// Address of the prometheus scraping endpoint. Metrics aren't exported
    /// if it isn't set.
    metrics_addr: Option<SocketAddr>,
}

pub fn init_metrics() {
    let config: MetricsConfig = crate::config::from_env_or_panic("");

    let Some(addr) = config.metrics_addr else {
        return;
    };

    let mut builder = metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets(DEFAULT_DURATION_BUCKETS)
        .unwrap_or_else(|err| panic!("BUG: invalid histogram buckets: {err:#?}"));

    for (key, value) in GLOBAL_LABELS {
        builder = builder.add_global_label(*key, *value);
    }

    builder
        .install()
        .unwrap_or_else(|err| panic!("BUG: failed to initialize the metrics listener: {err:#?}"));
}
