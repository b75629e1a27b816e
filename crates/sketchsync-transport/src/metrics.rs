//! Prometheus metrics for sketchsync
//!
//! Metrics are exposed in Prometheus text format via HTTP.

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Sketchsync metrics collector
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    // Connection metrics
    pub connections_total: IntCounterVec,
    pub connections_active: IntGaugeVec,

    // Message metrics
    pub messages_total: IntCounterVec,
    pub message_errors: IntCounterVec,
    pub message_duration_seconds: HistogramVec,

    // Document metrics
    pub documents_open: IntGauge,
    pub views_attached: IntGauge,

    // Fan-out and rendering
    pub updates_forwarded: IntCounter,
    pub renders_total: IntCounter,
    pub render_duration_seconds: Histogram,

    pub rate_limited_requests: IntCounter,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let connections_total = IntCounterVec::new(
            Opts::new("sketchsync_connections_total", "Total number of view connections"),
            &["transport"],
        )?;
        let connections_active = IntGaugeVec::new(
            Opts::new("sketchsync_connections_active", "Number of active view connections"),
            &["transport"],
        )?;

        let messages_total = IntCounterVec::new(
            Opts::new("sketchsync_messages_total", "Total view messages processed"),
            &["message"],
        )?;
        let message_errors = IntCounterVec::new(
            Opts::new("sketchsync_message_errors_total", "Total view messages answered with an error"),
            &["message", "code"],
        )?;
        let message_duration_seconds = HistogramVec::new(
            HistogramOpts::new("sketchsync_message_duration_seconds", "View message processing duration")
                .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["message"],
        )?;

        let documents_open = IntGauge::new("sketchsync_documents_open", "Documents resident in the authority")?;
        let views_attached = IntGauge::new("sketchsync_views_attached", "Views attached across documents")?;

        let updates_forwarded = IntCounter::new(
            "sketchsync_updates_forwarded_total",
            "Log updates forwarded to views",
        )?;
        let renders_total = IntCounter::new("sketchsync_renders_total", "Materialize requests served")?;
        let render_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("sketchsync_render_duration_seconds", "Materialize duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;

        let rate_limited_requests = IntCounter::new(
            "sketchsync_rate_limited_requests_total",
            "Total view messages rejected due to rate limiting",
        )?;

        registry.register(Box::new(connections_total.clone()))?;
        registry.register(Box::new(connections_active.clone()))?;
        registry.register(Box::new(messages_total.clone()))?;
        registry.register(Box::new(message_errors.clone()))?;
        registry.register(Box::new(message_duration_seconds.clone()))?;
        registry.register(Box::new(documents_open.clone()))?;
        registry.register(Box::new(views_attached.clone()))?;
        registry.register(Box::new(updates_forwarded.clone()))?;
        registry.register(Box::new(renders_total.clone()))?;
        registry.register(Box::new(render_duration_seconds.clone()))?;
        registry.register(Box::new(rate_limited_requests.clone()))?;

        Ok(Self {
            registry,
            connections_total,
            connections_active,
            messages_total,
            message_errors,
            message_duration_seconds,
            documents_open,
            views_attached,
            updates_forwarded,
            renders_total,
            render_duration_seconds,
            rate_limited_requests,
        })
    }

    /// Record a new connection
    pub fn record_connection(&self, transport: &str) {
        self.connections_total.with_label_values(&[transport]).inc();
        self.connections_active.with_label_values(&[transport]).inc();
    }

    /// Record a connection closed
    pub fn record_disconnection(&self, transport: &str) {
        self.connections_active.with_label_values(&[transport]).dec();
    }

    /// Record a processed view message
    pub fn record_message(&self, message: &str, duration_secs: f64) {
        self.messages_total.with_label_values(&[message]).inc();
        self.message_duration_seconds
            .with_label_values(&[message])
            .observe(duration_secs);
    }

    /// Record an error reply
    pub fn record_error(&self, message: &str, code: &str) {
        self.message_errors.with_label_values(&[message, code]).inc();
    }

    pub fn record_render(&self, duration_secs: f64) {
        self.renders_total.inc();
        self.render_duration_seconds.observe(duration_secs);
    }

    /// Update authority gauges
    pub fn set_authority_stats(&self, documents: usize, views: usize) {
        self.documents_open.set(documents as i64);
        self.views_attached.set(views as i64);
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

/// HTTP server for metrics endpoint
pub struct MetricsServer {
    metrics: Arc<Metrics>,
    addr: SocketAddr,
}

impl MetricsServer {
    pub fn new(metrics: Arc<Metrics>, addr: SocketAddr) -> Self {
        Self { metrics, addr }
    }

    /// Run the metrics HTTP server
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "Metrics server listening on http://{}/metrics", self.addr);

        loop {
            match listener.accept().await {
                Ok((mut stream, _)) => {
                    let metrics = self.metrics.clone();

                    tokio::spawn(async move {
                        let mut buf = [0u8; 1024];
                        let n = match stream.read(&mut buf).await {
                            Ok(n) if n > 0 => n,
                            _ => return,
                        };

                        let request = String::from_utf8_lossy(&buf[..n]);
                        let response = if request.starts_with("GET /metrics") || request.starts_with("GET / ") {
                            let body = metrics.export();
                            format!(
                                "HTTP/1.1 200 OK\r\n\
                                 Content-Type: text/plain; version=0.0.4; charset=utf-8\r\n\
                                 Content-Length: {}\r\n\
                                 \r\n\
                                 {}",
                                body.len(),
                                body
                            )
                        } else if request.starts_with("GET /health") {
                            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\nOK".to_string()
                        } else {
                            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n".to_string()
                        };
                        let _ = stream.write_all(response.as_bytes()).await;
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept metrics connection");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_contains_recorded_values() {
        let metrics = Metrics::new().unwrap();
        metrics.record_connection("tcp");
        metrics.record_message("submit_edit", 0.001);
        metrics.record_error("request_undo", "NOTHING_TO_UNDO");
        metrics.set_authority_stats(2, 3);

        let text = metrics.export();
        assert!(text.contains("sketchsync_connections_active{transport=\"tcp\"} 1"));
        assert!(text.contains("sketchsync_messages_total{message=\"submit_edit\"} 1"));
        assert!(text.contains("code=\"NOTHING_TO_UNDO\""));
        assert!(text.contains("sketchsync_views_attached 3"));
    }
}
