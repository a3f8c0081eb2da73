//! Prometheus metrics recording and endpoint.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus metrics recorder and return the handle for rendering.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

/// Record the number of open WebSocket connections.
pub fn set_connections(count: usize) {
    metrics::gauge!("ws_connections_active").set(count as f64);
}

/// Record a WS method request with its duration.
pub fn record_request(method: &str, duration_secs: f64) {
    let labels = [("method", method.to_string())];
    metrics::counter!("ws_requests_total", &labels).increment(1);
    metrics::histogram!("ws_request_duration_seconds", &labels).record(duration_secs);
}

/// Record a rejected or failed controller command.
pub fn record_error(kind: &str) {
    let labels = [("kind", kind.to_string())];
    metrics::counter!("command_errors_total", &labels).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        // The metrics crate falls back to a no-op recorder.
        set_connections(3);
        record_request("controller_input", 0.002);
        record_error("invalid_command");
    }

    #[test]
    fn test_install_prometheus_recorder() {
        // Only one recorder per process; a second install reports an error.
        if let Ok(handle) = install_prometheus_recorder() {
            set_connections(1);
            assert!(handle.render().contains("ws_connections_active"));
        }
    }
}
