//! Axum-based HTTP server.

use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::handler::run_handler;
use crate::state::GatewayState;

/// Build the gateway router: `/ag-ui`, `/health`, and `/metrics` when enabled.
pub fn router(state: Arc<GatewayState>) -> Router {
    let cors_enabled = state.config.cors_enabled();

    let app = Router::new()
        .route("/ag-ui", post(run_handler))
        .route("/health", get(health_handler));

    #[cfg(feature = "metrics")]
    let app = if state.metrics.is_some() {
        app.route("/metrics", get(metrics_handler))
    } else {
        app
    };

    let mut app = app.with_state(state).layer(TraceLayer::new_for_http());
    if cors_enabled {
        // Mirrors the request origin, so credentials are allowed.
        app = app.layer(CorsLayer::very_permissive());
    }
    app
}

/// Start the gateway HTTP server and serve until Ctrl+C.
pub async fn start_gateway(state: Arc<GatewayState>) -> anyhow::Result<()> {
    let addr = format!(
        "{}:{}",
        state.config.gateway_bind(),
        state.config.gateway_port()
    );
    let profile = state.agent.profile().to_string();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%profile, "Gateway listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let version = env!("CARGO_PKG_VERSION");

    axum::Json(json!({
        "status": "ok",
        "version": version,
        "profile": state.agent.profile(),
        "model": state.agent.model(),
        "tools": state.agent.tool_names(),
    }))
}

#[cfg(feature = "metrics")]
async fn metrics_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default()
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(%e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
