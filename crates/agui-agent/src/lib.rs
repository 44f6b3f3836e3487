//! Agent runtime: a configured LLM agent and its tool-calling loop.
//!
//! The gateway builds one [`Agent`] at startup and shares it by `Arc`. Each
//! request runs [`run_agent`], which streams provider output, executes tools,
//! and emits [`AgentEvent`]s into a bounded channel.

use serde::{Deserialize, Serialize};

pub mod agent;
pub mod prompt;
pub mod runtime;

pub use agent::{Agent, RunRequest};
pub use prompt::Instructions;
pub use runtime::run_agent;

/// Events emitted by the agent runtime during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    /// Streaming text delta.
    #[serde(rename = "partial_reply")]
    PartialReply { delta: String },

    /// The complete text of one assistant turn, sent after its deltas.
    #[serde(rename = "block_reply")]
    BlockReply { text: String, is_final: bool },

    /// The model requested a tool call.
    #[serde(rename = "tool_call")]
    ToolCall {
        id: String,
        tool: String,
        params: serde_json::Value,
    },

    /// A server-side tool call has completed.
    #[serde(rename = "tool_result")]
    ToolResult {
        id: String,
        tool: String,
        content: String,
        is_error: bool,
    },

    /// Full shared state to mirror to the client.
    #[serde(rename = "state_snapshot")]
    StateSnapshot { snapshot: serde_json::Value },

    /// Token usage for the current run.
    #[serde(rename = "usage")]
    Usage {
        input_tokens: u64,
        output_tokens: u64,
    },

    /// The run failed; nothing follows.
    #[serde(rename = "error")]
    Error { kind: AgentErrorKind, message: String },
}

/// Result of a completed agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunResult {
    /// Text of the last assistant turn, if any.
    pub text: Option<String>,
    pub meta: AgentRunMeta,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRunMeta {
    pub duration_ms: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub iterations: u32,
    pub tool_calls: u32,
    pub aborted: bool,
    pub stop_reason: Option<String>,
    pub error: Option<AgentRunError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunError {
    pub kind: AgentErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentErrorKind {
    AuthFailure,
    RateLimit,
    ProviderError,
    NetworkError,
    Timeout,
}

impl AgentErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthFailure => "auth_failure",
            Self::RateLimit => "rate_limit",
            Self::ProviderError => "provider_error",
            Self::NetworkError => "network_error",
            Self::Timeout => "timeout",
        }
    }

    /// Classify a provider failure by its [`agui_providers::ProviderError`] code.
    pub fn from_provider_error(err: &anyhow::Error) -> Self {
        match err
            .downcast_ref::<agui_providers::ProviderError>()
            .map(|e| e.code())
        {
            Some("auth_failure") => Self::AuthFailure,
            Some("rate_limit") => Self::RateLimit,
            Some("network_error") => Self::NetworkError,
            _ => Self::ProviderError,
        }
    }
}

impl std::fmt::Display for AgentErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
