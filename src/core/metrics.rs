//! Prometheus metrics for monitoring the proxy server.

use prometheus::{
    register_gauge_vec, register_histogram_vec, register_int_counter_vec, Encoder, GaugeVec,
    HistogramVec, IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

/// Container for all application metrics.
pub struct Metrics {
    /// Total number of requests by method, route and status
    pub request_count: IntCounterVec,

    /// Request duration histogram in seconds (time to response headers)
    pub request_duration: HistogramVec,

    /// Number of currently active requests by route
    pub active_requests: GaugeVec,

    /// Upstream transport failures by kind (connect, timeout, other)
    pub upstream_errors: IntCounterVec,

    /// Usage counter updates by result (ok, error)
    pub usage_increments: IntCounterVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Initialize the metrics registry.
///
/// Subsequent calls return the same instance.
pub fn init_metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let request_count = register_int_counter_vec!(
            "azure_proxy_requests_total",
            "Total number of requests",
            &["method", "route", "status_code"]
        )
        .expect("Failed to register request_count metric");

        let request_duration = register_histogram_vec!(
            "azure_proxy_request_duration_seconds",
            "Time until response headers are sent, in seconds",
            &["method", "route"],
            vec![0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]
        )
        .expect("Failed to register request_duration metric");

        let active_requests = register_gauge_vec!(
            "azure_proxy_active_requests",
            "Number of active requests",
            &["route"]
        )
        .expect("Failed to register active_requests metric");

        let upstream_errors = register_int_counter_vec!(
            "azure_proxy_upstream_errors_total",
            "Upstream transport failures",
            &["kind"]
        )
        .expect("Failed to register upstream_errors metric");

        let usage_increments = register_int_counter_vec!(
            "azure_proxy_usage_increments_total",
            "User usage counter updates",
            &["result"]
        )
        .expect("Failed to register usage_increments metric");

        Metrics {
            request_count,
            request_duration,
            active_requests,
            upstream_errors,
            usage_increments,
        }
    })
}

/// Get the global metrics instance, initializing it on first use.
pub fn get_metrics() -> &'static Metrics {
    init_metrics()
}

/// Render all registered metrics in the Prometheus text format.
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
