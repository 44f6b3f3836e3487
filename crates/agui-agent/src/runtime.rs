//! Agent runtime loop: orchestrates LLM streaming and tool calling.

use std::collections::HashSet;
use std::future::Future;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use agui_core::transcript::{TranscriptEntry, Usage};
use agui_core::types::ContentBlock;
use agui_providers::{CompletionRequest, ToolUseChunk};
use agui_tools::{ToolContext, ToolOutput};

use crate::prompt::build_system_prompt;
use crate::{Agent, AgentErrorKind, AgentEvent, AgentRunError, AgentRunMeta, AgentRunResult, RunRequest};

/// Outcome of waiting on one suspension point.
enum Guarded<T> {
    Ready(T),
    TimedOut,
    Cancelled,
}

/// Await `fut` unless the run is cancelled or the idle timeout passes first.
async fn guarded<F: Future>(cancel: &CancellationToken, idle: Duration, fut: F) -> Guarded<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Guarded::Cancelled,
        result = tokio::time::timeout(idle, fut) => match result {
            Ok(value) => Guarded::Ready(value),
            Err(_) => Guarded::TimedOut,
        },
    }
}

struct Emitter {
    tx: mpsc::Sender<AgentEvent>,
    cancel: CancellationToken,
}

impl Emitter {
    /// Send one event, waiting for channel capacity. Returns `false` once the
    /// consumer is gone or the run is cancelled.
    async fn send(&self, event: AgentEvent) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(event) => sent.is_ok(),
        }
    }
}

struct RunTracker {
    start: Instant,
    meta: AgentRunMeta,
}

impl RunTracker {
    fn finish(mut self, text: Option<String>) -> AgentRunResult {
        self.meta.duration_ms = self.start.elapsed().as_millis() as u64;
        info!(
            duration_ms = self.meta.duration_ms,
            iterations = self.meta.iterations,
            tool_calls = self.meta.tool_calls,
            stop_reason = self.meta.stop_reason.as_deref().unwrap_or("none"),
            "Agent run finished"
        );
        AgentRunResult { text, meta: self.meta }
    }

    fn aborted(mut self) -> AgentRunResult {
        self.meta.aborted = true;
        self.meta.stop_reason = Some("aborted".into());
        info!("Agent run aborted by client");
        self.finish(None)
    }

    async fn fail(mut self, emitter: &Emitter, kind: AgentErrorKind, message: String) -> AgentRunResult {
        error!(%kind, %message, "Agent run failed");
        emitter
            .send(AgentEvent::Error {
                kind,
                message: message.clone(),
            })
            .await;
        self.meta.stop_reason = Some("error".into());
        self.meta.error = Some(AgentRunError { kind, message });
        self.finish(None)
    }
}

fn parse_tool_input(tool_use: &ToolUseChunk) -> Value {
    serde_json::from_str(&tool_use.input_json).unwrap_or_else(|e| {
        warn!(%e, tool = %tool_use.name, "Tool input is not valid JSON, using empty object");
        json!({})
    })
}

/// Run the agent loop: stream the LLM, execute tools, emit events.
///
/// Failures are reported as an [`AgentEvent::Error`] and in the returned
/// meta; the loop itself does not retry. When `cancel` fires the run stops at
/// its next suspension point and emits nothing further.
pub async fn run_agent(
    agent: &Agent,
    request: RunRequest,
    event_tx: mpsc::Sender<AgentEvent>,
    cancel: CancellationToken,
) -> anyhow::Result<AgentRunResult> {
    let emitter = Emitter {
        tx: event_tx,
        cancel: cancel.clone(),
    };
    let mut run = RunTracker {
        start: Instant::now(),
        meta: AgentRunMeta::default(),
    };

    let RunRequest {
        thread_id,
        run_id,
        state,
        mut transcript,
        system,
        context,
        deferred_tools,
    } = request;

    info!(
        %thread_id,
        %run_id,
        profile = %agent.profile,
        model = %agent.model,
        history = transcript.len(),
        "Agent run started"
    );

    let Some(credentials) = agent.credentials.as_ref() else {
        let message = format!(
            "No API key configured for provider '{}'",
            agent.provider.id()
        );
        return Ok(run.fail(&emitter, AgentErrorKind::AuthFailure, message).await);
    };

    // 1. System prompt and tool declarations, fixed for the whole run
    let system_prompt = build_system_prompt(&agent.instructions, &state, &system, context.as_deref());

    let mut definitions = agent.tool_definitions();
    let mut deferred_names = HashSet::new();
    for tool in deferred_tools {
        if agent.tools.get(&tool.name).is_some() {
            warn!(tool = %tool.name, "Client tool shadows a server tool, ignoring it");
            continue;
        }
        deferred_names.insert(tool.name.clone());
        definitions.push(tool);
    }
    let tools = (!definitions.is_empty()).then(|| agent.provider.format_tools(&definitions));

    let tool_context = ToolContext {
        thread_id,
        run_id,
        state,
        config: agent.config.clone(),
    };

    let mut final_text = None;

    // 2. Tool loop
    for iteration in 0..agent.max_tool_iterations {
        run.meta.iterations = iteration + 1;
        debug!(iteration, "Agent loop iteration");

        let completion = CompletionRequest {
            model: agent.model.clone(),
            messages: agent.provider.format_messages(transcript.entries()),
            max_tokens: agent.max_tokens,
            temperature: agent.temperature,
            tools: tools.clone(),
            system: Some(system_prompt.clone()),
        };

        let mut stream = match guarded(
            &cancel,
            agent.idle_timeout,
            agent.provider.stream(&completion, credentials),
        )
        .await
        {
            Guarded::Ready(Ok(stream)) => stream,
            Guarded::Ready(Err(e)) => {
                let kind = AgentErrorKind::from_provider_error(&e);
                return Ok(run.fail(&emitter, kind, e.to_string()).await);
            }
            Guarded::TimedOut => {
                let message = format!("Provider did not respond within {:?}", agent.idle_timeout);
                return Ok(run.fail(&emitter, AgentErrorKind::Timeout, message).await);
            }
            Guarded::Cancelled => return Ok(run.aborted()),
        };

        let mut response_text = String::new();
        let mut tool_uses: Vec<(String, String, Value)> = Vec::new();
        let mut usage: Option<Usage> = None;
        let mut stop_reason = None;

        loop {
            let chunk = match guarded(&cancel, agent.idle_timeout, stream.next()).await {
                Guarded::Ready(Some(Ok(chunk))) => chunk,
                Guarded::Ready(Some(Err(e))) => {
                    let kind = AgentErrorKind::from_provider_error(&e);
                    return Ok(run.fail(&emitter, kind, e.to_string()).await);
                }
                Guarded::Ready(None) => break,
                Guarded::TimedOut => {
                    let message = format!(
                        "No output from provider for {:?}",
                        agent.idle_timeout
                    );
                    return Ok(run.fail(&emitter, AgentErrorKind::Timeout, message).await);
                }
                Guarded::Cancelled => return Ok(run.aborted()),
            };

            if let Some(delta) = chunk.delta.filter(|d| !d.is_empty()) {
                response_text.push_str(&delta);
                if !emitter.send(AgentEvent::PartialReply { delta }).await {
                    return Ok(run.aborted());
                }
            }

            if let Some(ref tool_use) = chunk.tool_use {
                tool_uses.push((
                    tool_use.id.clone(),
                    tool_use.name.clone(),
                    parse_tool_input(tool_use),
                ));
            }

            if let Some(chunk_usage) = chunk.usage {
                let current = usage.get_or_insert_with(Usage::default);
                if let Some(input) = chunk_usage.input_tokens {
                    current.input_tokens = input;
                }
                if let Some(output) = chunk_usage.output_tokens {
                    current.output_tokens = output;
                }
            }

            if chunk.stop_reason.is_some() {
                stop_reason = chunk.stop_reason;
            }
        }
        // Closes the upstream request before tools run.
        drop(stream);

        // Append assistant response to transcript
        let mut assistant_content = Vec::new();
        if !response_text.is_empty() {
            assistant_content.push(ContentBlock::text(response_text.clone()));
        }
        for (id, name, input) in &tool_uses {
            assistant_content.push(ContentBlock::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: input.clone(),
            });
        }
        if !assistant_content.is_empty() {
            transcript.append(TranscriptEntry::Assistant {
                content: assistant_content,
                usage: usage.clone(),
                timestamp: Utc::now(),
            });
        }

        if let Some(usage) = usage {
            run.meta.input_tokens += usage.input_tokens;
            run.meta.output_tokens += usage.output_tokens;
            let event = AgentEvent::Usage {
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
            };
            if !emitter.send(event).await {
                return Ok(run.aborted());
            }
        }

        if !response_text.is_empty() {
            let event = AgentEvent::BlockReply {
                text: response_text.clone(),
                is_final: tool_uses.is_empty(),
            };
            if !emitter.send(event).await {
                return Ok(run.aborted());
            }
        }

        run.meta.stop_reason = stop_reason.clone();

        if tool_uses.is_empty() {
            final_text = (!response_text.is_empty()).then_some(response_text);
            break;
        }

        if !stop_reason
            .as_deref()
            .is_some_and(|r| agent.provider.is_tool_use_stop(r))
        {
            debug!(?stop_reason, "Tool calls without a tool-use stop reason");
        }

        // 3. Execute tools
        let mut deferred = false;
        for (id, name, input) in tool_uses {
            run.meta.tool_calls += 1;
            let call = AgentEvent::ToolCall {
                id: id.clone(),
                tool: name.clone(),
                params: input.clone(),
            };
            if !emitter.send(call).await {
                return Ok(run.aborted());
            }

            if deferred_names.contains(&name) {
                info!(tool = %name, "Deferring client tool call");
                deferred = true;
                continue;
            }

            info!(tool = %name, "Executing tool");
            let output = match agent.tools.get(&name) {
                Some(tool) => {
                    let result = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        result = tool.execute(input, &tool_context) => Some(result),
                    };
                    match result {
                        None => return Ok(run.aborted()),
                        Some(Ok(output)) => output,
                        Some(Err(e)) => {
                            warn!(%e, tool = %name, "Tool execution error");
                            ToolOutput::error(format!("Tool error: {e}"))
                        }
                    }
                }
                None => {
                    warn!(tool = %name, "Model called an unknown tool");
                    ToolOutput::error(format!("Unknown tool: {name}"))
                }
            };

            if let Some(snapshot) = output.snapshot.clone() {
                if !emitter.send(AgentEvent::StateSnapshot { snapshot }).await {
                    return Ok(run.aborted());
                }
            }

            let result = AgentEvent::ToolResult {
                id: id.clone(),
                tool: name.clone(),
                content: output.content.clone(),
                is_error: output.is_error,
            };
            if !emitter.send(result).await {
                return Ok(run.aborted());
            }

            transcript.append(TranscriptEntry::ToolResult {
                tool_use_id: id,
                tool: name,
                content: output.content,
                is_error: output.is_error,
                timestamp: Utc::now(),
            });
        }

        if deferred {
            run.meta.stop_reason = Some("deferred_tool_call".into());
            break;
        }

        if iteration + 1 == agent.max_tool_iterations {
            warn!(max = agent.max_tool_iterations, "Reached max tool iterations");
            run.meta.stop_reason = Some("max_tool_iterations".into());
        }
    }

    Ok(run.finish(final_text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use agui_core::config::Config;
    use agui_core::document::{DocumentState, ToolDescriptor};
    use agui_core::transcript::Transcript;
    use agui_providers::{
        CompletionChunk, Credentials, ScriptedProvider, ScriptedTurn, ToolDefinition, TurnEnd,
    };

    fn creds() -> Option<Credentials> {
        Some(Credentials::ApiKey {
            api_key: "test".into(),
        })
    }

    fn agent_with(provider: Arc<ScriptedProvider>, profile: &str) -> Agent {
        let config: Config =
            serde_json::from_value(json!({"agent": {"profile": profile}})).unwrap();
        Agent::from_config(Arc::new(config), provider, creds()).unwrap()
    }

    fn request(text: &str, state: DocumentState) -> RunRequest {
        RunRequest {
            thread_id: "thread-1".into(),
            run_id: "run-1".into(),
            state,
            transcript: Transcript::from_entries(vec![TranscriptEntry::user_text(text)]),
            ..RunRequest::default()
        }
    }

    async fn run(agent: &Agent, request: RunRequest) -> (AgentRunResult, Vec<AgentEvent>) {
        let (tx, mut rx) = mpsc::channel(64);
        let result = run_agent(agent, request, tx, CancellationToken::new())
            .await
            .unwrap();
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (result, events)
    }

    #[tokio::test]
    async fn test_text_only_run() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedTurn::new(vec![
            CompletionChunk::text("Hello"),
            CompletionChunk::text(" there"),
            CompletionChunk::usage(7, 2),
            CompletionChunk::stop("STOP"),
        ])]));
        let agent = agent_with(provider.clone(), "document");

        let (result, events) = run(&agent, request("hi", DocumentState::default())).await;

        assert_eq!(
            events,
            vec![
                AgentEvent::PartialReply { delta: "Hello".into() },
                AgentEvent::PartialReply { delta: " there".into() },
                AgentEvent::Usage { input_tokens: 7, output_tokens: 2 },
                AgentEvent::BlockReply { text: "Hello there".into(), is_final: true },
            ]
        );
        assert_eq!(result.text.as_deref(), Some("Hello there"));
        assert_eq!(result.meta.iterations, 1);
        assert_eq!(result.meta.input_tokens, 7);
        assert!(result.meta.error.is_none());

        let sent = provider.requests();
        assert_eq!(sent[0].model, "gemini-2.5-flash");
        assert_eq!(sent[0].system.as_deref(), Some("You are a helpful assistant"));
        assert_eq!(sent[0].tools.as_ref().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn test_sync_state_tool_round_trip() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedTurn::tool_call("call_1", "sync_state_with_frontend", json!({})),
            ScriptedTurn::text(&["The document has 5 characters."]),
        ]));
        let agent = agent_with(provider.clone(), "document");

        let (result, events) = run(&agent, request("how long?", DocumentState::new("draft"))).await;

        assert_eq!(
            events[0],
            AgentEvent::ToolCall {
                id: "call_1".into(),
                tool: "sync_state_with_frontend".into(),
                params: json!({}),
            }
        );
        assert_eq!(
            events[1],
            AgentEvent::StateSnapshot {
                snapshot: json!({"document": "draft", "frontendTools": []}),
            }
        );
        assert_eq!(
            events[2],
            AgentEvent::ToolResult {
                id: "call_1".into(),
                tool: "sync_state_with_frontend".into(),
                content: "State length: 5".into(),
                is_error: false,
            }
        );
        assert!(matches!(events.last(), Some(AgentEvent::BlockReply { is_final: true, .. })));
        assert_eq!(result.meta.iterations, 2);
        assert_eq!(result.meta.tool_calls, 1);

        // The second request carries the tool result back to the model
        let sent = provider.requests();
        assert_eq!(sent.len(), 2);
        let last = sent[1].messages.last().unwrap();
        assert_eq!(last["type"], "tool_result");
        assert_eq!(last["content"], "State length: 5");
    }

    #[tokio::test]
    async fn test_tool_errors_are_fed_back() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedTurn::new(vec![
                CompletionChunk::tool_use("c1", "call_frontend_tool", r#"{"args": {}}"#),
                CompletionChunk::tool_use("c2", "launch_rockets", "{}"),
                CompletionChunk::stop("TOOL_USE"),
            ]),
            ScriptedTurn::text(&["Sorry."]),
        ]));
        let agent = agent_with(provider, "frontend_tools");

        let (result, events) = run(&agent, request("go", DocumentState::default())).await;

        let results: Vec<(&str, bool)> = events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::ToolResult { content, is_error, .. } => Some((content.as_str(), *is_error)),
                _ => None,
            })
            .collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].0.starts_with("Tool error:"));
        assert!(results[0].1);
        assert_eq!(results[1], ("Unknown tool: launch_rockets", true));
        assert_eq!(result.text.as_deref(), Some("Sorry."));
    }

    #[tokio::test]
    async fn test_missing_credentials_fails_without_calling_provider() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedTurn::text(&["unused"])]));
        let agent = Agent::from_config(Arc::new(Config::default()), provider.clone(), None).unwrap();

        let (result, events) = run(&agent, request("hi", DocumentState::default())).await;

        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            AgentEvent::Error { kind: AgentErrorKind::AuthFailure, .. }
        ));
        assert!(provider.requests().is_empty());
        assert_eq!(result.meta.error.unwrap().kind, AgentErrorKind::AuthFailure);
    }

    #[tokio::test]
    async fn test_provider_rejection_is_classified() {
        let provider = Arc::new(ScriptedProvider::new(vec![]).rejecting(429));
        let agent = agent_with(provider, "document");

        let (_, events) = run(&agent, request("hi", DocumentState::default())).await;
        assert!(matches!(
            &events[..],
            [AgentEvent::Error { kind: AgentErrorKind::RateLimit, .. }]
        ));
    }

    #[tokio::test]
    async fn test_mid_stream_error_ends_run() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedTurn::new(vec![CompletionChunk::text("Part")])
                .ending(TurnEnd::Error("connection reset".into())),
        ]));
        let agent = agent_with(provider, "document");

        let (result, events) = run(&agent, request("hi", DocumentState::default())).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], AgentEvent::PartialReply { delta: "Part".into() });
        match &events[1] {
            AgentEvent::Error { kind, message } => {
                assert_eq!(*kind, AgentErrorKind::NetworkError);
                assert!(message.contains("connection reset"));
            }
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(result.meta.stop_reason.as_deref(), Some("error"));
    }

    #[tokio::test]
    async fn test_idle_timeout() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedTurn::new(vec![CompletionChunk::text("thinking")]).ending(TurnEnd::Stall),
        ]));
        let agent = agent_with(provider, "document").with_idle_timeout(Duration::from_millis(50));

        let (result, events) = run(&agent, request("hi", DocumentState::default())).await;
        assert!(matches!(
            events.last(),
            Some(AgentEvent::Error { kind: AgentErrorKind::Timeout, .. })
        ));
        assert_eq!(result.meta.error.unwrap().kind, AgentErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_cancellation_stops_run_silently() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedTurn::new(vec![CompletionChunk::text("a")]).ending(TurnEnd::Stall),
        ]));
        let agent = agent_with(provider, "document");
        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            canceller.cancel();
        });

        let result = run_agent(&agent, request("hi", DocumentState::default()), tx, cancel)
            .await
            .unwrap();
        assert!(result.meta.aborted);
        assert!(result.meta.error.is_none());

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events, vec![AgentEvent::PartialReply { delta: "a".into() }]);
    }

    #[tokio::test]
    async fn test_dropped_receiver_aborts() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedTurn::text(&["a", "b"])]));
        let agent = agent_with(provider, "document");
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let result = run_agent(&agent, request("hi", DocumentState::default()), tx, CancellationToken::new())
            .await
            .unwrap();
        assert!(result.meta.aborted);
    }

    #[tokio::test]
    async fn test_client_tool_call_is_deferred() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            ScriptedTurn::tool_call("c9", "highlight", json!({"color": "yellow"})),
            ScriptedTurn::text(&["should not be requested"]),
        ]));
        let agent = agent_with(provider.clone(), "frontend_tools");
        let mut req = request("highlight the title", DocumentState::default());
        req.deferred_tools.push(ToolDefinition {
            name: "highlight".into(),
            description: "Highlight text in the editor".into(),
            parameters_schema: json!({"type": "object", "properties": {"color": {"type": "string"}}}),
        });

        let (result, events) = run(&agent, req).await;

        assert_eq!(
            events,
            vec![AgentEvent::ToolCall {
                id: "c9".into(),
                tool: "highlight".into(),
                params: json!({"color": "yellow"}),
            }]
        );
        assert_eq!(result.meta.stop_reason.as_deref(), Some("deferred_tool_call"));
        assert_eq!(provider.requests().len(), 1);
        // server tools plus the client tool were declared
        assert_eq!(provider.requests()[0].tools.as_ref().map(Vec::len), Some(4));
    }

    #[tokio::test]
    async fn test_max_tool_iterations_bounds_loop() {
        let turns = (0..5)
            .map(|i| ScriptedTurn::tool_call(&format!("c{i}"), "send_counter_events", json!({})))
            .collect();
        let provider = Arc::new(ScriptedProvider::new(turns));
        let agent = agent_with(provider.clone(), "document").with_max_tool_iterations(2);

        let (result, _) = run(&agent, request("loop", DocumentState::default())).await;
        assert_eq!(provider.requests().len(), 2);
        assert_eq!(result.meta.stop_reason.as_deref(), Some("max_tool_iterations"));
        assert_eq!(result.meta.tool_calls, 2);
    }

    #[tokio::test]
    async fn test_templated_instructions_and_context_reach_provider() {
        let provider = Arc::new(ScriptedProvider::new(vec![ScriptedTurn::text(&["ok"])]));
        let agent = agent_with(provider.clone(), "frontend_tools");
        let state = DocumentState {
            document: String::new(),
            frontend_tools: vec![ToolDescriptor(
                json!({"name": "scroll_to"}).as_object().cloned().unwrap(),
            )],
        };
        let mut req = request("hi", state);
        req.system.push("Answer in French.".into());
        req.context = Some("[page]: editor".into());

        run(&agent, req).await;

        let system = provider.requests()[0].system.clone().unwrap();
        assert!(system.contains("scroll_to"));
        assert!(system.contains("Answer in French."));
        assert!(system.ends_with("[page]: editor"));
    }
}
