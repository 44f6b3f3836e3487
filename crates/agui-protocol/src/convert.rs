//! Conversion of AG-UI message history into a run transcript.

use agui_core::transcript::{Transcript, TranscriptEntry};
use agui_core::types::ContentBlock;
use chrono::Utc;
use serde_json::Value;
use tracing::warn;

use crate::types::{Message, Role};

/// Message history split into the model transcript and extra system text.
#[derive(Debug, Clone, Default)]
pub struct ConvertedHistory {
    pub transcript: Transcript,
    /// Content of `system` and `developer` messages, in order.
    pub system: Vec<String>,
}

/// Convert client messages into a transcript the agent loop can extend.
///
/// Tool calls from earlier assistant turns become `ToolUse` blocks and `tool`
/// messages become tool results, so a deferred frontend tool call can be
/// resumed by the next request.
pub fn convert_messages(messages: &[Message]) -> ConvertedHistory {
    let mut history = ConvertedHistory::default();

    for msg in messages {
        match msg.role {
            Role::System | Role::Developer => {
                if !msg.text().is_empty() {
                    history.system.push(msg.text().to_string());
                }
            }
            Role::User => history
                .transcript
                .append(TranscriptEntry::user_text(msg.text())),
            Role::Assistant => {
                let mut content = Vec::new();
                if !msg.text().is_empty() {
                    content.push(ContentBlock::text(msg.text()));
                }
                for call in &msg.tool_calls {
                    content.push(ContentBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.function.name.clone(),
                        input: parse_arguments(&call.function.arguments, &call.id),
                    });
                }
                if content.is_empty() {
                    continue;
                }
                history.transcript.append(TranscriptEntry::Assistant {
                    content,
                    usage: None,
                    timestamp: Utc::now(),
                });
            }
            Role::Tool => {
                let tool_use_id = msg.tool_call_id.clone().unwrap_or_default();
                let tool = history
                    .transcript
                    .tool_name_for(&tool_use_id)
                    .map(str::to_string)
                    .or_else(|| msg.name.clone())
                    .unwrap_or_else(|| "unknown".to_string());
                history.transcript.append(TranscriptEntry::ToolResult {
                    tool_use_id,
                    tool,
                    content: msg.text().to_string(),
                    is_error: false,
                    timestamp: Utc::now(),
                });
            }
        }
    }

    history
}

fn parse_arguments(arguments: &str, call_id: &str) -> Value {
    if arguments.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(arguments).unwrap_or_else(|e| {
        warn!(error = %e, call_id, "Tool call arguments are not valid JSON, passing as string");
        Value::String(arguments.to_string())
    })
}
