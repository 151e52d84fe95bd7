//! Metrics and observability utilities
//!
//! Prometheus metrics with standardized naming for retrieval, the agent
//! pipeline, and HTTP serving.

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use std::time::Instant;

/// Metrics prefix for all DocPilot metrics
pub const METRICS_PREFIX: &str = "docpilot";

/// Histogram buckets for request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005, // 5ms
    0.010, // 10ms
    0.025, // 25ms
    0.050, // 50ms
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.500, // 2.5s
    5.000, // 5s
    10.00, // 10s
    30.00, // 30s
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Request metrics
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    // Retrieval metrics
    describe_counter!(
        format!("{}_retrieval_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of hybrid retrieval queries"
    );

    describe_histogram!(
        format!("{}_retrieval_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Hybrid retrieval latency in seconds"
    );

    describe_counter!(
        format!("{}_retrieval_degraded_total", METRICS_PREFIX),
        Unit::Count,
        "Retrievals served from a single leg after the other failed"
    );

    describe_gauge!(
        format!("{}_retrieval_results_count", METRICS_PREFIX),
        Unit::Count,
        "Number of documents returned from retrieval"
    );

    // Embedding metrics
    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API requests"
    );

    describe_counter!(
        format!("{}_embedding_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API errors"
    );

    // Agent pipeline metrics
    describe_counter!(
        format!("{}_turns_total", METRICS_PREFIX),
        Unit::Count,
        "Total conversation turns processed"
    );

    describe_counter!(
        format!("{}_routes_total", METRICS_PREFIX),
        Unit::Count,
        "Router decisions by label"
    );

    describe_histogram!(
        format!("{}_turn_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Full turn latency in seconds"
    );

    describe_counter!(
        format!("{}_research_steps_total", METRICS_PREFIX),
        Unit::Count,
        "Total research steps executed"
    );

    describe_counter!(
        format!("{}_summarizations_total", METRICS_PREFIX),
        Unit::Count,
        "Conversation summarizations by outcome"
    );

    // Checkpoint metrics
    describe_counter!(
        format!("{}_checkpoint_errors_total", METRICS_PREFIX),
        Unit::Count,
        "Total checkpoint store failures"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Record one hybrid retrieval
pub fn record_retrieval(duration_secs: f64, query_type: &str, result_count: usize, degraded: bool) {
    counter!(
        format!("{}_retrieval_queries_total", METRICS_PREFIX),
        "query_type" => query_type.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_retrieval_duration_seconds", METRICS_PREFIX),
        "query_type" => query_type.to_string()
    )
    .record(duration_secs);

    gauge!(format!("{}_retrieval_results_count", METRICS_PREFIX)).set(result_count as f64);

    if degraded {
        counter!(format!("{}_retrieval_degraded_total", METRICS_PREFIX)).increment(1);
    }
}

/// Record one embedding API call by outcome
pub fn record_embedding(success: bool) {
    counter!(format!("{}_embedding_requests_total", METRICS_PREFIX)).increment(1);
    if !success {
        counter!(format!("{}_embedding_errors_total", METRICS_PREFIX)).increment(1);
    }
}

/// Record the steps of one executed research plan
pub fn record_research_steps(count: usize) {
    counter!(format!("{}_research_steps_total", METRICS_PREFIX)).increment(count as u64);
}

/// Record one checkpoint store failure
pub fn record_checkpoint_error() {
    counter!(format!("{}_checkpoint_errors_total", METRICS_PREFIX)).increment(1);
}

/// Record one router decision
pub fn record_route(label: &str) {
    counter!(
        format!("{}_routes_total", METRICS_PREFIX),
        "label" => label.to_string()
    )
    .increment(1);
}

/// Record one completed turn
pub fn record_turn(duration_secs: f64, outcome: &str) {
    counter!(
        format!("{}_turns_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    histogram!(format!("{}_turn_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}
