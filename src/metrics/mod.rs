use crate::error::{GatewayError, Result};
use crate::rate_limit::types::Outcome;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Metrics service for collecting and exposing Prometheus metrics
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Install the global Prometheus recorder.
    ///
    /// Fails if a recorder is already installed in this process.
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            GatewayError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        Self::register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    /// Wrap an existing handle (e.g. one built with `build_recorder`)
    pub fn from_handle(handle: PrometheusHandle) -> Self {
        Self {
            handle: Arc::new(handle),
        }
    }

    /// Register all metrics with descriptions
    fn register_metrics() {
        // Admission metrics
        describe_counter!(
            "gateway_rate_limit_decisions_total",
            "Rate limit decisions by backend and outcome"
        );
        describe_counter!(
            "gateway_rate_limit_backend_errors_total",
            "Shared store failures and timeouts during rate limit checks"
        );

        // Forwarding metrics
        describe_counter!(
            "gateway_forward_requests_total",
            "Requests forwarded to target services by response status"
        );
        describe_histogram!(
            "gateway_forward_duration_seconds",
            "Forwarding latencies in seconds"
        );

        debug!("All metrics registered with descriptions");
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Metrics endpoint handler
pub async fn metrics_handler(State(service): State<MetricsService>) -> impl IntoResponse {
    let body = service.render();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

/// Record one admission decision
pub fn record_rate_limit_decision(backend: &str, outcome: Outcome) {
    let labels = [
        ("backend", backend.to_string()),
        ("outcome", outcome.as_str().to_string()),
    ];
    counter!("gateway_rate_limit_decisions_total", &labels).increment(1);
}

/// Record a shared store failure or timeout
pub fn record_rate_limit_backend_error(store: &str) {
    let labels = [("store", store.to_string())];
    counter!("gateway_rate_limit_backend_errors_total", &labels).increment(1);
}

/// Record a forwarded request; `status` is what the caller received
pub fn record_forward_request(status: u16, duration: Duration) {
    let labels = [("status", status.to_string())];
    counter!("gateway_forward_requests_total", &labels).increment(1);
    histogram!("gateway_forward_duration_seconds").record(duration.as_secs_f64());
}
