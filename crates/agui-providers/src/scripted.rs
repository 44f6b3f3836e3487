//! In-process provider that replays pre-recorded turns.
//!
//! Each call to [`LlmProvider::stream`] consumes the next [`ScriptedTurn`].
//! Used by the agent and gateway tests in place of a live model.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use agui_core::transcript::TranscriptEntry;

use crate::google::TOOL_USE_STOP;
use crate::{
    ChunkStream, CompletionChunk, CompletionRequest, Credentials, LlmProvider, ModelApi,
    ProviderError, ToolDefinition,
};

/// How a scripted turn ends after its chunks are delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEnd {
    Complete,
    /// Yield a stream error.
    Error(String),
    /// Never yield again.
    Stall,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedTurn {
    pub chunks: Vec<CompletionChunk>,
    pub end: TurnEnd,
}

impl ScriptedTurn {
    pub fn new(chunks: Vec<CompletionChunk>) -> Self {
        Self {
            chunks,
            end: TurnEnd::Complete,
        }
    }

    /// A plain text reply, one chunk per delta.
    pub fn text(deltas: &[&str]) -> Self {
        let mut chunks: Vec<CompletionChunk> =
            deltas.iter().map(|d| CompletionChunk::text(*d)).collect();
        chunks.push(CompletionChunk::stop("STOP"));
        Self::new(chunks)
    }

    /// A single tool call.
    pub fn tool_call(id: &str, name: &str, args: Value) -> Self {
        Self::new(vec![
            CompletionChunk::tool_use(id, name, args.to_string()),
            CompletionChunk::stop(TOOL_USE_STOP),
        ])
    }

    pub fn ending(mut self, end: TurnEnd) -> Self {
        self.end = end;
        self
    }
}

/// Replays scripted turns and records every request it receives.
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    requests: Mutex<Vec<CompletionRequest>>,
    chunk_delay: Option<Duration>,
    reject_with: Option<u16>,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
            chunk_delay: None,
            reject_with: None,
        }
    }

    /// Sleep before each chunk.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Fail every request with this HTTP status before streaming.
    pub fn rejecting(mut self, status: u16) -> Self {
        self.reject_with = Some(status);
        self
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn remaining_turns(&self) -> usize {
        self.turns.lock().map(|t| t.len()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }

    fn api(&self) -> ModelApi {
        ModelApi::Scripted
    }

    fn format_tools(&self, tools: &[ToolDefinition]) -> Vec<Value> {
        tools
            .iter()
            .filter_map(|t| serde_json::to_value(t).ok())
            .collect()
    }

    fn format_messages(&self, transcript: &[TranscriptEntry]) -> Vec<Value> {
        transcript
            .iter()
            .filter_map(|e| serde_json::to_value(e).ok())
            .collect()
    }

    fn is_tool_use_stop(&self, stop_reason: &str) -> bool {
        stop_reason == TOOL_USE_STOP
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
        _credentials: &Credentials,
    ) -> anyhow::Result<ChunkStream> {
        self.requests
            .lock()
            .map_err(|_| anyhow::anyhow!("scripted provider lock poisoned"))?
            .push(request.clone());

        if let Some(status) = self.reject_with {
            return Err(ProviderError::Http {
                provider: "scripted",
                status,
                body: "rejected by script".into(),
            }
            .into());
        }

        let turn = self
            .turns
            .lock()
            .map_err(|_| anyhow::anyhow!("scripted provider lock poisoned"))?
            .pop_front()
            .unwrap_or_else(|| ScriptedTurn::text(&[]));
        let delay = self.chunk_delay;

        let stream = async_stream::stream! {
            for chunk in turn.chunks {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                yield Ok::<_, anyhow::Error>(chunk);
            }
            match turn.end {
                TurnEnd::Complete => {}
                TurnEnd::Error(message) => {
                    yield Err(anyhow::Error::from(ProviderError::Stream(message)));
                }
                TurnEnd::Stall => {
                    futures::future::pending::<()>().await;
                }
            }
        };
        Ok(Box::pin(stream))
    }
}
