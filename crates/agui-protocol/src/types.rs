use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Role for AG-UI input/output messages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Developer,
    System,
    #[default]
    Assistant,
    User,
    Tool,
}

impl Role {
    pub const ALL: [&'static str; 5] = ["developer", "system", "assistant", "user", "tool"];
}

/// Function invocation carried by an assistant tool call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments.
    pub arguments: String,
}

/// Tool call made by the assistant in an earlier turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_call_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

fn function_call_type() -> String {
    "function".into()
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<Vec<T>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// AG-UI message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(
        rename = "toolCalls",
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub tool_calls: Vec<ToolCall>,
    #[serde(rename = "toolCallId", default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: None,
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::with_role(Role::Tool, content)
        }
    }

    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

/// AG-UI context entry from frontend readable values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Context {
    pub description: String,
    pub value: Value,
}

/// Tool declared by the client for this run; executes on the frontend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema for tool parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// Request to run an AG-UI agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunAgentInput {
    #[serde(rename = "threadId", default = "generate_id")]
    pub thread_id: String,
    #[serde(rename = "runId", default = "generate_id")]
    pub run_id: String,
    #[serde(rename = "parentRunId", default, skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<String>,
    pub messages: Vec<Message>,
    #[serde(default)]
    pub tools: Vec<Tool>,
    #[serde(default)]
    pub context: Vec<Context>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    #[serde(
        rename = "forwardedProps",
        alias = "forwarded_props",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub forwarded_props: Option<Value>,
}

fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl RunAgentInput {
    pub fn new(thread_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            run_id: run_id.into(),
            parent_run_id: None,
            messages: Vec::new(),
            tools: Vec::new(),
            context: Vec::new(),
            state: None,
            forwarded_props: None,
        }
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_state(mut self, state: Value) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_tool(mut self, tool: Tool) -> Self {
        self.tools.push(tool);
        self
    }

    /// Build a string from the context entries to append to the instructions.
    pub fn context_addendum(&self) -> Option<String> {
        if self.context.is_empty() {
            return None;
        }
        let lines: Vec<String> = self
            .context
            .iter()
            .map(|entry| {
                let value = match &entry.value {
                    Value::String(s) => s.clone(),
                    other => serde_json::to_string(other).unwrap_or_else(|e| {
                        warn!(error = %e, description = %entry.description, "Unserializable context value");
                        "<unserializable>".to_string()
                    }),
                };
                format!("[{}]: {}", entry.description, value)
            })
            .collect();
        Some(format!(
            "The following context is available from the frontend:\n{}",
            lines.join("\n")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_run_input_defaults() {
        let input: RunAgentInput = serde_json::from_value(json!({
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();
        assert!(!input.thread_id.is_empty());
        assert!(!input.run_id.is_empty());
        assert_ne!(input.thread_id, input.run_id);
        assert!(input.tools.is_empty());
        assert!(input.state.is_none());
        assert_eq!(input.messages[0].role, Role::User);
        assert_eq!(input.messages[0].text(), "hi");
    }

    #[test]
    fn test_message_camel_case_fields() {
        let msg: Message = serde_json::from_value(json!({
            "id": "m1",
            "role": "assistant",
            "toolCalls": [{
                "id": "call_1",
                "type": "function",
                "function": {"name": "get_weather", "arguments": "{\"location\":\"Oslo\"}"}
            }]
        }))
        .unwrap();
        assert_eq!(msg.tool_calls.len(), 1);
        assert_eq!(msg.tool_calls[0].function.name, "get_weather");
        assert!(msg.content.is_none());

        let tool_msg = Message::tool("sunny", "call_1");
        let value = serde_json::to_value(&tool_msg).unwrap();
        assert_eq!(value["toolCallId"], "call_1");
        assert_eq!(value["role"], "tool");
    }

    #[test]
    fn test_null_tool_calls_is_empty() {
        let msg: Message = serde_json::from_value(json!({
            "role": "assistant",
            "content": "hi",
            "toolCalls": null
        }))
        .unwrap();
        assert!(msg.tool_calls.is_empty());
    }

    #[test]
    fn test_forwarded_props_alias() {
        let input: RunAgentInput = serde_json::from_value(json!({
            "messages": [],
            "forwarded_props": {"mode": "fast"}
        }))
        .unwrap();
        assert_eq!(input.forwarded_props, Some(json!({"mode": "fast"})));
    }

    #[test]
    fn test_context_addendum() {
        let mut input = RunAgentInput::new("t", "r");
        assert!(input.context_addendum().is_none());

        input.context.push(Context {
            description: "selection".into(),
            value: json!("paragraph 2"),
        });
        input.context.push(Context {
            description: "cursor".into(),
            value: json!({"line": 3}),
        });
        let addendum = input.context_addendum().unwrap();
        assert!(addendum.contains("[selection]: paragraph 2"));
        assert!(addendum.contains(r#"[cursor]: {"line":3}"#));
    }
}
