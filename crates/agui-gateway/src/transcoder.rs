//! Agent events to AG-UI wire events.

use futures::Stream;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::DropGuard;
use tracing::debug;

use agui_agent::AgentEvent;
use agui_protocol::Event;

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Per-run transcoding state.
///
/// Text deltas are grouped into one text message per assistant turn. Once a
/// terminal event has been produced, everything else is dropped.
#[derive(Debug)]
pub struct AgUiEventContext {
    thread_id: String,
    run_id: String,
    parent_run_id: Option<String>,
    open_message: Option<String>,
    last_message: Option<String>,
    terminated: bool,
}

impl AgUiEventContext {
    pub fn new(
        thread_id: impl Into<String>,
        run_id: impl Into<String>,
        parent_run_id: Option<String>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            run_id: run_id.into(),
            parent_run_id,
            open_message: None,
            last_message: None,
            terminated: false,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn prologue(&mut self) -> Vec<Event> {
        vec![Event::RunStarted {
            thread_id: self.thread_id.clone(),
            run_id: self.run_id.clone(),
            parent_run_id: self.parent_run_id.clone(),
        }]
    }

    /// Map one agent event to zero or more wire events.
    pub fn transcode(&mut self, event: AgentEvent) -> Vec<Event> {
        if self.terminated {
            debug!(?event, "Dropping agent event after terminal");
            return Vec::new();
        }

        let mut out = Vec::new();
        match event {
            AgentEvent::PartialReply { delta } => {
                let message_id = self.open_text(&mut out);
                out.push(Event::text_message_content(message_id, delta));
            }
            AgentEvent::BlockReply { text, .. } => {
                if self.open_message.is_none() && !text.is_empty() {
                    let message_id = self.open_text(&mut out);
                    out.push(Event::text_message_content(message_id, text));
                }
                self.close_text(&mut out);
            }
            AgentEvent::ToolCall { id, tool, params } => {
                self.close_text(&mut out);
                out.push(Event::tool_call_start(
                    id.clone(),
                    tool,
                    self.last_message.clone(),
                ));
                out.push(Event::tool_call_args(id.clone(), params.to_string()));
                out.push(Event::tool_call_end(id));
            }
            AgentEvent::ToolResult { id, content, .. } => {
                self.close_text(&mut out);
                out.push(Event::tool_call_result(new_id(), id, content));
            }
            AgentEvent::StateSnapshot { snapshot } => {
                out.push(Event::state_snapshot(snapshot));
            }
            AgentEvent::Usage {
                input_tokens,
                output_tokens,
            } => {
                out.push(Event::custom(
                    "usage",
                    json!({"inputTokens": input_tokens, "outputTokens": output_tokens}),
                ));
            }
            AgentEvent::Error { kind, message } => {
                self.close_text(&mut out);
                out.push(Event::run_error(message, Some(kind.as_str().to_string())));
            }
        }

        if out.iter().any(Event::is_terminal) {
            self.terminated = true;
        }
        out
    }

    /// Close any open message and finish the run, unless it already ended.
    pub fn epilogue(&mut self) -> Vec<Event> {
        if self.terminated {
            return Vec::new();
        }
        let mut out = Vec::new();
        self.close_text(&mut out);
        out.push(Event::run_finished(self.thread_id.clone(), self.run_id.clone()));
        self.terminated = true;
        out
    }

    fn open_text(&mut self, out: &mut Vec<Event>) -> String {
        if let Some(id) = &self.open_message {
            return id.clone();
        }
        let id = new_id();
        out.push(Event::text_message_start(id.clone()));
        self.open_message = Some(id.clone());
        self.last_message = Some(id.clone());
        id
    }

    fn close_text(&mut self, out: &mut Vec<Event>) {
        if let Some(id) = self.open_message.take() {
            out.push(Event::text_message_end(id));
        }
    }
}

/// Drive a run's agent events through the transcoder.
///
/// `guard` cancels the run when this stream is dropped, which is how a client
/// disconnect reaches the agent loop.
pub fn transcode_stream(
    mut ctx: AgUiEventContext,
    mut events: mpsc::Receiver<AgentEvent>,
    guard: DropGuard,
) -> impl Stream<Item = Event> + Send + 'static {
    async_stream::stream! {
        let _guard = guard;
        for event in ctx.prologue() {
            yield event;
        }
        while let Some(agent_event) = events.recv().await {
            for event in ctx.transcode(agent_event) {
                yield event;
            }
            if ctx.is_terminated() {
                break;
            }
        }
        for event in ctx.epilogue() {
            yield event;
        }
    }
}
