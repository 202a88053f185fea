//! stag-metrics -- Prometheus metric vectors for the STAG service.
//!
//! All metrics share the `stag_` prefix and live in a dedicated registry so
//! multiple instances can coexist in one process (useful in tests).

use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

/// The full metric set for the service.
pub struct Metrics {
    registry: Registry,

    // HTTP
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,

    // WebSocket
    pub ws_connections_active: IntGaugeVec,
    pub ws_messages_total: IntCounterVec,

    // Database
    pub db_operations_total: IntCounterVec,
    pub db_operation_duration_seconds: HistogramVec,

    // Business
    pub anchors_total: IntCounterVec,
    pub meshes_total: IntCounterVec,
    pub compression_ratio: GaugeVec,
    pub storage_size_bytes: IntGaugeVec,
    pub mesh_dedup_saved_bytes: IntCounterVec,
}

impl Metrics {
    /// Create and register the metric set in a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("stag_http_requests_total", "Total number of HTTP requests"),
            &["method", "endpoint", "status"],
        )?;
        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "stag_http_request_duration_seconds",
                "HTTP request duration in seconds",
            ),
            &["method", "endpoint"],
        )?;

        let ws_connections_active = IntGaugeVec::new(
            Opts::new(
                "stag_ws_connections_active",
                "Number of active WebSocket connections",
            ),
            &["session_id"],
        )?;
        let ws_messages_total = IntCounterVec::new(
            Opts::new("stag_ws_messages_total", "Total number of WebSocket messages"),
            &["direction", "type", "status"],
        )?;

        let db_operations_total = IntCounterVec::new(
            Opts::new("stag_db_operations_total", "Total number of database operations"),
            &["operation", "collection", "status"],
        )?;
        let db_operation_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "stag_db_operation_duration_seconds",
                "Database operation duration in seconds",
            ),
            &["operation", "collection"],
        )?;

        let anchors_total = IntCounterVec::new(
            Opts::new("stag_anchors_total", "Total number of anchors processed"),
            &["session_id", "operation"],
        )?;
        let meshes_total = IntCounterVec::new(
            Opts::new("stag_meshes_total", "Total number of meshes processed"),
            &["session_id", "type", "operation"],
        )?;
        let compression_ratio = GaugeVec::new(
            Opts::new("stag_compression_ratio", "Current compression ratio"),
            &["session_id"],
        )?;
        let storage_size_bytes = IntGaugeVec::new(
            Opts::new("stag_storage_size_bytes", "Total storage size in bytes"),
            &["type"],
        )?;
        let mesh_dedup_saved_bytes = IntCounterVec::new(
            Opts::new(
                "stag_mesh_dedup_saved_bytes",
                "Bytes saved through mesh deduplication",
            ),
            &["session_id"],
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;
        registry.register(Box::new(ws_connections_active.clone()))?;
        registry.register(Box::new(ws_messages_total.clone()))?;
        registry.register(Box::new(db_operations_total.clone()))?;
        registry.register(Box::new(db_operation_duration_seconds.clone()))?;
        registry.register(Box::new(anchors_total.clone()))?;
        registry.register(Box::new(meshes_total.clone()))?;
        registry.register(Box::new(compression_ratio.clone()))?;
        registry.register(Box::new(storage_size_bytes.clone()))?;
        registry.register(Box::new(mesh_dedup_saved_bytes.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            ws_connections_active,
            ws_messages_total,
            db_operations_total,
            db_operation_duration_seconds,
            anchors_total,
            meshes_total,
            compression_ratio,
            storage_size_bytes,
            mesh_dedup_saved_bytes,
        })
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        if encoder.encode(&self.registry.gather(), &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_and_renders() {
        let metrics = Metrics::new().unwrap();
        metrics
            .http_requests_total
            .with_label_values(&["GET", "/health", "200"])
            .inc();
        metrics
            .ws_connections_active
            .with_label_values(&["s1"])
            .set(3);

        let text = metrics.render();
        assert!(text.contains("stag_http_requests_total"));
        assert!(text.contains("stag_ws_connections_active{session_id=\"s1\"} 3"));
    }

    #[test]
    fn instances_are_independent() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.anchors_total.with_label_values(&["s1", "ingest"]).inc();
        assert!(!b.render().contains("stag_anchors_total{"));
    }
}
