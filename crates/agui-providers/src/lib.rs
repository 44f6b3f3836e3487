//! LLM provider abstraction.
//!
//! A provider implements [`LlmProvider`] to turn a transcript and tool
//! declarations into a stream of [`CompletionChunk`]s. Google Gemini is the
//! only upstream; [`ScriptedProvider`] replays canned turns in-process.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use agui_core::transcript::TranscriptEntry;

pub mod google;
pub mod scripted;
pub mod sse;

pub use google::GeminiProvider;
pub use scripted::{ScriptedProvider, ScriptedTurn, TurnEnd};

/// Supported LLM API protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelApi {
    GoogleGenerativeAi,
    /// In-process providers used by tests and demos.
    Scripted,
}

/// Credentials for authenticating with an LLM provider.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Credentials {
    #[serde(rename = "api_key")]
    ApiKey { api_key: String },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiKey { .. } => f.write_str("ApiKey { api_key: \"***\" }"),
        }
    }
}

/// A request to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    /// Provider-formatted messages, see [`LlmProvider::format_messages`].
    pub messages: Vec<serde_json::Value>,
    pub max_tokens: u32,
    pub temperature: Option<f64>,
    /// Provider-formatted tools, see [`LlmProvider::format_tools`].
    pub tools: Option<Vec<serde_json::Value>>,
    pub system: Option<String>,
}

/// A streamed chunk from the LLM.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionChunk {
    pub delta: Option<String>,
    pub tool_use: Option<ToolUseChunk>,
    pub usage: Option<ChunkUsage>,
    pub stop_reason: Option<String>,
}

impl CompletionChunk {
    pub fn text(delta: impl Into<String>) -> Self {
        Self {
            delta: Some(delta.into()),
            ..Default::default()
        }
    }

    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input_json: impl Into<String>) -> Self {
        Self {
            tool_use: Some(ToolUseChunk {
                id: id.into(),
                name: name.into(),
                input_json: input_json.into(),
            }),
            ..Default::default()
        }
    }

    pub fn stop(reason: impl Into<String>) -> Self {
        Self {
            stop_reason: Some(reason.into()),
            ..Default::default()
        }
    }

    pub fn usage(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            usage: Some(ChunkUsage {
                input_tokens: Some(input_tokens),
                output_tokens: Some(output_tokens),
            }),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUseChunk {
    pub id: String,
    pub name: String,
    pub input_json: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

/// Tool declaration in provider-neutral form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// Upstream failures the agent loop distinguishes when reporting errors.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{provider} API error {status}: {body}")]
    Http {
        provider: &'static str,
        status: u16,
        body: String,
    },
    #[error("{provider} request failed: {source}")]
    Network {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("SSE stream error: {0}")]
    Stream(String),
    #[error("{0} requires ApiKey credentials")]
    Credentials(&'static str),
}

impl ProviderError {
    /// Stable error code reported to clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Http { status: 401 | 403, .. } | Self::Credentials(_) => "auth_failure",
            Self::Http { status: 429, .. } => "rate_limit",
            Self::Http { .. } => "provider_error",
            Self::Network { .. } | Self::Stream(_) => "network_error",
        }
    }
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = anyhow::Result<CompletionChunk>> + Send>>;

/// The core LLM provider trait.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider identifier (e.g., "google").
    fn id(&self) -> &str;

    /// API protocol used by this provider.
    fn api(&self) -> ModelApi;

    /// Convert tool declarations into the provider's wire shape.
    fn format_tools(&self, tools: &[ToolDefinition]) -> Vec<serde_json::Value>;

    /// Convert a transcript into the provider's message list.
    fn format_messages(&self, transcript: &[TranscriptEntry]) -> Vec<serde_json::Value>;

    /// Whether a stop reason means the model is waiting on tool results.
    fn is_tool_use_stop(&self, stop_reason: &str) -> bool;

    /// Stream a chat completion.
    async fn stream(
        &self,
        request: &CompletionRequest,
        credentials: &Credentials,
    ) -> anyhow::Result<ChunkStream>;
}
