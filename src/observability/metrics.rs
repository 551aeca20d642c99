//! Metrics collection and exposition.
//!
//! # Metrics
//! - `http_requests_total` (counter): requests by method, status
//! - `http_request_duration_seconds` (histogram)
//! - `job_runs_total` (counter): periodic job runs by job, outcome
//! - `job_duration_seconds` (histogram): periodic job duration by job
//! - `queue_jobs_completed_total` / `queue_jobs_failed_total` (counters)
//! - `websocket_connections` (gauge): open realtime connections
//! - `shutdown_step_duration_seconds` (histogram): teardown step timing
//! - `service_shutting_down` (gauge): 1 once shutdown began
//!
//! Recording is a no-op until `init_metrics` installs the exporter.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Count one HTTP request and observe its latency.
pub fn record_request(method: &str, status: u16, start: Instant) {
    counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("http_request_duration_seconds", "method" => method.to_string())
        .record(start.elapsed().as_secs_f64());
}

/// Count one periodic job run by outcome and observe its duration.
pub fn record_job_run(job: &str, outcome: &'static str, duration: Duration) {
    counter!("job_runs_total", "job" => job.to_string(), "outcome" => outcome).increment(1);
    histogram!("job_duration_seconds", "job" => job.to_string()).record(duration.as_secs_f64());
}

/// Count one finished queue job.
pub fn record_queue_job(queue: &str, success: bool) {
    if success {
        counter!("queue_jobs_completed_total", "queue" => queue.to_string()).increment(1);
    } else {
        counter!("queue_jobs_failed_total", "queue" => queue.to_string()).increment(1);
    }
}

/// Set the open realtime connection gauge.
pub fn set_websocket_connections(count: usize) {
    gauge!("websocket_connections", "gateway" => "main").set(count as f64);
}

/// Observe how long a teardown step took.
pub fn record_shutdown_step(step: &'static str, outcome: &'static str, duration: Duration) {
    histogram!("shutdown_step_duration_seconds", "step" => step, "outcome" => outcome)
        .record(duration.as_secs_f64());
}

/// Set the shutdown gauge to 1 or 0.
pub fn set_shutting_down(value: bool) {
    gauge!("service_shutting_down").set(if value { 1.0 } else { 0.0 });
}
