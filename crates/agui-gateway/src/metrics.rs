//! Prometheus metrics recording and endpoint.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus metrics recorder and return the handle for rendering.
pub fn install_prometheus_recorder() -> anyhow::Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {e}"))
}

/// Record a `/ag-ui` request by outcome (`ok` or `invalid`).
pub fn record_request(outcome: &'static str) {
    metrics::counter!("agui_requests_total", "outcome" => outcome).increment(1);
}

/// Record an agent run starting.
pub fn record_run_start() {
    metrics::gauge!("agui_runs_active").increment(1.0);
}

/// Record an agent run ending.
pub fn record_run_end() {
    metrics::gauge!("agui_runs_active").decrement(1.0);
}

/// Record a run that ended with an error of the given kind.
pub fn record_run_error(kind: &'static str) {
    metrics::counter!("agui_run_errors_total", "kind" => kind).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_does_not_panic() {
        // the metrics crate falls back to a no-op recorder
        record_request("ok");
        record_run_start();
        record_run_end();
        record_run_error("timeout");
    }

    #[test]
    fn test_prometheus_render() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || record_request("invalid"));
        assert!(handle.render().contains("agui_requests_total"));
    }
}
