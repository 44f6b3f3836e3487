//! Gateway shared state.

use std::sync::Arc;

use agui_agent::Agent;
use agui_core::config::Config;

/// Shared gateway state, built once at startup and read by every request.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub agent: Arc<Agent>,
    #[cfg(feature = "metrics")]
    pub metrics: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl GatewayState {
    pub fn new(config: Arc<Config>, agent: Arc<Agent>) -> Self {
        Self {
            config,
            agent,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    /// Serve Prometheus output from this recorder handle at `/metrics`.
    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, handle: metrics_exporter_prometheus::PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
