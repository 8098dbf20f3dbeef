//! Metrics implementation using Prometheus.

use agent_relay_core::{AcquireStrategy, CloseReason, Error, Operation, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Initialize Prometheus recorder and return the handle.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::internal(format!("Failed to install Prometheus recorder: {}", e)))?;

    tracing::info!("Prometheus metrics recorder initialized");
    Ok(handle)
}

/// Count a session acquire and record how long it took.
pub fn track_acquire(bot_id: &str, strategy: AcquireStrategy, latency_sec: f64) {
    metrics::counter!(
        "session_acquire_total",
        "bot" => bot_id.to_string(),
        "strategy" => strategy.as_str()
    )
    .increment(1);

    metrics::histogram!(
        "session_acquire_duration_seconds",
        "strategy" => strategy.as_str()
    )
    .record(latency_sec);
}

pub fn track_session_closed(reason: CloseReason) {
    metrics::counter!("session_closed_total", "reason" => reason.as_str()).increment(1);
}

pub fn set_live_sessions(count: usize) {
    metrics::gauge!("session_live").set(count as f64);
}

pub fn track_disconnect_failure(bot_id: &str) {
    metrics::counter!("session_disconnect_failures_total", "bot" => bot_id.to_string())
        .increment(1);
}

pub fn track_policy_violation(bot_id: &str, operation: Operation) {
    metrics::counter!(
        "policy_violations_total",
        "bot" => bot_id.to_string(),
        "operation" => operation.as_str()
    )
    .increment(1);
}

pub fn track_file_registered() {
    metrics::counter!("file_links_registered_total").increment(1);
}

pub fn track_files_swept(count: usize) {
    metrics::counter!("file_links_expired_total").increment(count as u64);
}
