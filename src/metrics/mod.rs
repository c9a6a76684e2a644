use crate::error::{LimiterError, Result};
use crate::rate_limit::types::Classification;
use axum::{
    body::Body,
    extract::State,
    http::{Response, StatusCode},
    response::IntoResponse,
};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Metrics service for collecting and exposing Prometheus metrics
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Create a new metrics service
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            LimiterError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        Self::register_metrics();

        info!("Metrics service initialized successfully");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    /// Register all metrics with descriptions
    fn register_metrics() {
        describe_counter!(
            "iplimit_classifications_total",
            "Total number of classified requests by result"
        );
        describe_counter!(
            "iplimit_counter_errors_total",
            "Total number of failed window counter calls"
        );
        describe_counter!(
            "iplimit_threshold_refresh_total",
            "Total number of threshold refresh attempts by outcome"
        );
        describe_gauge!("iplimit_threshold", "Threshold currently in effect");
        describe_histogram!(
            "iplimit_classify_duration_seconds",
            "Time spent classifying a request"
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
    let metrics = service.render();
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(Body::from(metrics))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

/// Record a classification outcome
pub fn record_classification(classification: Classification) {
    counter!("iplimit_classifications_total", "result" => classification.as_str()).increment(1);
}

/// Record a failed window counter call
pub fn record_counter_error() {
    counter!("iplimit_counter_errors_total").increment(1);
}

/// Record a threshold refresh attempt
pub fn record_refresh(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!("iplimit_threshold_refresh_total", "outcome" => outcome).increment(1);
}

/// Record the threshold now in effect
pub fn set_threshold(threshold: u64) {
    gauge!("iplimit_threshold").set(threshold as f64);
}

/// Timer for measuring classification duration
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Record the elapsed time
    pub fn record(self) {
        histogram!("iplimit_classify_duration_seconds").record(self.elapsed());
    }

    /// Get the elapsed time in seconds
    pub fn elapsed(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}
