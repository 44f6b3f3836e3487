//! `POST /ag-ui`: decode, reconcile, run the agent, stream SSE.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use agui_agent::{AgentErrorKind, AgentEvent, RunRequest, run_agent};
use agui_core::document::reconcile_state;
use agui_protocol::{
    ConvertedHistory, RunAgentInput, SSE_CONTENT_TYPE, convert_messages, decode_run_input,
    encode_stream,
};
use agui_providers::ToolDefinition;

use crate::state::GatewayState;
use crate::transcoder::{AgUiEventContext, transcode_stream};

/// Agent events buffered between the run task and the response body.
pub const EVENT_BUFFER: usize = 64;

pub async fn run_handler(State(state): State<Arc<GatewayState>>, body: Bytes) -> Response {
    let input = match decode_run_input(&body) {
        Ok(input) => input,
        Err(e) => {
            warn!(errors = e.errors.len(), "Rejected invalid run input");
            #[cfg(feature = "metrics")]
            crate::metrics::record_request("invalid");
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                [(header::CONTENT_TYPE, "application/json")],
                e.to_json(),
            )
                .into_response();
        }
    };

    #[cfg(feature = "metrics")]
    crate::metrics::record_request("ok");

    let ctx = AgUiEventContext::new(
        input.thread_id.clone(),
        input.run_id.clone(),
        input.parent_run_id.clone(),
    );
    let request = build_run_request(input);

    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
    let cancel = CancellationToken::new();
    spawn_run(state, request, event_tx, cancel.clone());

    let frames = encode_stream(transcode_stream(ctx, event_rx, cancel.drop_guard()));
    (
        [
            (header::CONTENT_TYPE, SSE_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(frames),
    )
        .into_response()
}

/// Turn a decoded request into the agent's run input.
pub fn build_run_request(input: RunAgentInput) -> RunRequest {
    let reconciled = reconcile_state(input.state.clone());
    debug!(outcome = ?reconciled.outcome, "Reconciled client state");

    let context = input.context_addendum();
    let ConvertedHistory { transcript, system } = convert_messages(&input.messages);
    let deferred_tools = input
        .tools
        .into_iter()
        .map(|tool| ToolDefinition {
            name: tool.name,
            description: tool.description,
            parameters_schema: tool
                .parameters
                .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
        })
        .collect();

    RunRequest {
        thread_id: input.thread_id,
        run_id: input.run_id,
        state: reconciled.state,
        transcript,
        system,
        context,
        deferred_tools,
    }
}

fn spawn_run(
    state: Arc<GatewayState>,
    request: RunRequest,
    event_tx: mpsc::Sender<AgentEvent>,
    cancel: CancellationToken,
) {
    let span = info_span!("run", thread_id = %request.thread_id, run_id = %request.run_id);
    let supervisor_tx = event_tx.clone();
    let run = tokio::spawn(
        async move {
            #[cfg(feature = "metrics")]
            crate::metrics::record_run_start();

            let error_tx = event_tx.clone();
            match run_agent(&state.agent, request, event_tx, cancel).await {
                Ok(result) => {
                    #[cfg(feature = "metrics")]
                    record_run_error(&result);
                    info!(
                        duration_ms = result.meta.duration_ms,
                        aborted = result.meta.aborted,
                        "Run complete"
                    );
                }
                Err(e) => {
                    error!(%e, "Agent run failed");
                    let _ = error_tx
                        .send(AgentEvent::Error {
                            kind: AgentErrorKind::ProviderError,
                            message: e.to_string(),
                        })
                        .await;
                }
            }
        }
        .instrument(span.clone()),
    );
    tokio::spawn(supervise_run(run, supervisor_tx).instrument(span));
}

/// Wait for a run task and report it as a run error if it died early.
///
/// Holding a sender keeps the event stream open until the outcome is known,
/// so a panicked run cannot look like a clean finish.
async fn supervise_run(run: JoinHandle<()>, event_tx: mpsc::Sender<AgentEvent>) {
    let outcome = run.await;

    #[cfg(feature = "metrics")]
    crate::metrics::record_run_end();

    if let Err(e) = outcome {
        error!(panicked = e.is_panic(), "Agent run task died");
        #[cfg(feature = "metrics")]
        crate::metrics::record_run_error(AgentErrorKind::ProviderError.as_str());
        let _ = event_tx
            .send(AgentEvent::Error {
                kind: AgentErrorKind::ProviderError,
                message: "Agent run ended unexpectedly".to_string(),
            })
            .await;
    }
}

#[cfg(feature = "metrics")]
fn record_run_error(result: &agui_agent::AgentRunResult) {
    if let Some(err) = &result.meta.error {
        crate::metrics::record_run_error(err.kind.as_str());
    }
}
