//! Prometheus metrics, registered once into the default registry and served
//! as text exposition on the metrics listener.

use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, Encoder as _, IntCounter,
    IntCounterVec, IntGauge, TextEncoder,
};
use std::sync::LazyLock;

pub(crate) static METRICS: LazyLock<ProxyMetrics> = LazyLock::new(ProxyMetrics::new);

pub(crate) struct ProxyMetrics {
    /// Requests served, per method and ingress surface.
    pub requests_total: IntCounterVec,
    /// Dedup cache hits, per origin (peer name, "flashbots" or "local").
    pub requests_duplicate: IntCounterVec,
    /// JSON-RPC parse failures, per method.
    pub json_rpc_parse_errors: IntCounterVec,
    /// Semantic validation failures, per method.
    pub validation_errors: IntCounterVec,
    /// Requests dropped because a queue was full, per queue.
    pub queue_dropped: IntCounterVec,
    /// Successful outbound RPC deliveries, per target.
    pub rpc_success: IntCounterVec,
    /// Failed outbound RPC deliveries, per target and reason.
    pub rpc_failure: IntCounterVec,
    /// The current number of connected peers.
    pub peer_count: IntGauge,
    /// Failed peer registry refreshes.
    pub peer_refresh_failures: IntCounter,
    /// Failed peer certificate fetches.
    pub peer_cert_fetch_failures: IntCounterVec,
    /// The current number of fingerprints in the dedup cache.
    pub dedup_cache_entries: IntGauge,
    /// Archive records drained without a configured sink.
    pub archive_skipped: IntCounter,
}

impl ProxyMetrics {
    fn new() -> Self {
        Self {
            requests_total: register_int_counter_vec!(
                "meshproxy_requests_total",
                "Requests served per method and ingress surface",
                &["method", "endpoint"]
            )
            .expect("to register metric"),
            requests_duplicate: register_int_counter_vec!(
                "meshproxy_requests_duplicate_total",
                "Dedup cache hits per origin",
                &["origin"]
            )
            .expect("to register metric"),
            json_rpc_parse_errors: register_int_counter_vec!(
                "meshproxy_json_rpc_parse_errors_total",
                "JSON-RPC parse failures per method",
                &["method"]
            )
            .expect("to register metric"),
            validation_errors: register_int_counter_vec!(
                "meshproxy_validation_errors_total",
                "Semantic validation failures per method",
                &["method"]
            )
            .expect("to register metric"),
            queue_dropped: register_int_counter_vec!(
                "meshproxy_queue_dropped_total",
                "Requests dropped because a queue was full",
                &["queue"]
            )
            .expect("to register metric"),
            rpc_success: register_int_counter_vec!(
                "meshproxy_peer_rpc_success_total",
                "Successful outbound RPC deliveries per target",
                &["target"]
            )
            .expect("to register metric"),
            rpc_failure: register_int_counter_vec!(
                "meshproxy_peer_rpc_failure_total",
                "Failed outbound RPC deliveries per target and reason",
                &["target", "reason"]
            )
            .expect("to register metric"),
            peer_count: register_int_gauge!(
                "meshproxy_peer_count",
                "The current number of connected peers"
            )
            .expect("to register metric"),
            peer_refresh_failures: register_int_counter!(
                "meshproxy_peer_refresh_failures_total",
                "Failed peer registry refreshes"
            )
            .expect("to register metric"),
            peer_cert_fetch_failures: register_int_counter_vec!(
                "meshproxy_peer_cert_fetch_failures_total",
                "Failed peer certificate fetches per peer",
                &["peer"]
            )
            .expect("to register metric"),
            dedup_cache_entries: register_int_gauge!(
                "meshproxy_dedup_cache_entries",
                "The current number of fingerprints in the dedup cache"
            )
            .expect("to register metric"),
            archive_skipped: register_int_counter!(
                "meshproxy_archive_skipped_total",
                "Archive records drained without a configured sink"
            )
            .expect("to register metric"),
        }
    }
}

/// Render all registered metrics in the Prometheus text format.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buf = Vec::new();
    if let Err(error) = encoder.encode(&families, &mut buf) {
        tracing::error!(?error, "failed to encode metrics");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_and_render() {
        METRICS.requests_total.with_label_values(&["eth_sendBundle", "local"]).inc();
        let rendered = render();
        assert!(rendered.contains("meshproxy_requests_total"));
    }
}
