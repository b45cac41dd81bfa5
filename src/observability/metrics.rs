//! # Metrics
//!
//! Prometheus exporter behind the `metrics` facade. The recorder is global,
//! so it is installed at most once per process and every center started in
//! the same process shares the handle.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

use crate::core::error::{CenterError, CenterResult};

const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

static HANDLE: OnceLock<Result<PrometheusHandle, String>> = OnceLock::new();

/// Install the Prometheus recorder (once) and return its handle
pub fn install_metrics() -> CenterResult<PrometheusHandle> {
    HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .set_buckets_for_metric(
                    Matcher::Suffix("duration_seconds".to_string()),
                    LATENCY_BUCKETS,
                )
                .map_err(|e| e.to_string())?
                .install_recorder()
                .map_err(|e| e.to_string())
        })
        .clone()
        .map_err(|e| CenterError::internal(format!("Failed to install metrics recorder: {}", e)))
}

/// Record one proxied request
pub fn record_proxy_request(route: &str, status: u16, elapsed: Duration) {
    counter!(
        "center_proxy_requests_total",
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("center_proxy_request_duration_seconds", "route" => route.to_string())
        .record(elapsed.as_secs_f64());
}
