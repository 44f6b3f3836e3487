//! Google Generative AI (Gemini) provider.
//!
//! Streams via `streamGenerateContent?alt=sse`. Auth is an API key in the
//! query string.

use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_stream::StreamExt;
use tracing::{debug, trace, warn};

use agui_core::transcript::TranscriptEntry;
use agui_core::types::ContentBlock;

use crate::sse::{SseEvent, parse_sse_stream};
use crate::{
    ChunkStream, ChunkUsage, CompletionChunk, CompletionRequest, Credentials, LlmProvider,
    ModelApi, ProviderError, ToolDefinition, ToolUseChunk,
};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Stop reason reported once the model has emitted function calls.
pub const TOOL_USE_STOP: &str = "TOOL_USE";

pub struct GeminiProvider {
    pub base_url: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(base_url: Option<&str>) -> Self {
        Self {
            base_url: base_url
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url, model
        )
    }
}

// --- Gemini request/response types ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiStreamChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
    /// Set on reasoning summaries, which are not part of the reply.
    #[serde(default)]
    thought: bool,
    #[serde(default)]
    function_call: Option<FunctionCallPart>,
}

#[derive(Debug, Deserialize)]
struct FunctionCallPart {
    name: String,
    #[serde(default)]
    args: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn id(&self) -> &str {
        "google"
    }

    fn api(&self) -> ModelApi {
        ModelApi::GoogleGenerativeAi
    }

    fn format_tools(&self, tools: &[ToolDefinition]) -> Vec<Value> {
        if tools.is_empty() {
            return Vec::new();
        }
        let declarations: Vec<Value> = tools
            .iter()
            .map(|t| {
                let mut decl = json!({
                    "name": t.name,
                    "description": t.description,
                });
                // Gemini rejects an object schema with no properties.
                let has_properties = t
                    .parameters_schema
                    .get("properties")
                    .and_then(Value::as_object)
                    .is_some_and(|p| !p.is_empty());
                if has_properties {
                    decl["parameters"] = t.parameters_schema.clone();
                }
                decl
            })
            .collect();

        vec![json!({ "function_declarations": declarations })]
    }

    fn format_messages(&self, transcript: &[TranscriptEntry]) -> Vec<Value> {
        let mut contents: Vec<Value> = Vec::new();
        // Consecutive tool results go back as one user turn.
        let mut responses: Vec<Value> = Vec::new();

        for entry in transcript {
            if !matches!(entry, TranscriptEntry::ToolResult { .. }) && !responses.is_empty() {
                contents.push(json!({ "role": "user", "parts": std::mem::take(&mut responses) }));
            }
            match entry {
                TranscriptEntry::User { content, .. } => {
                    let parts: Vec<Value> = content
                        .iter()
                        .filter_map(|b| match b {
                            ContentBlock::Text { text } => Some(json!({ "text": text })),
                            _ => None,
                        })
                        .collect();
                    if !parts.is_empty() {
                        contents.push(json!({ "role": "user", "parts": parts }));
                    }
                }
                TranscriptEntry::Assistant { content, .. } => {
                    let parts: Vec<Value> = content
                        .iter()
                        .filter_map(|b| match b {
                            ContentBlock::Text { text } if !text.is_empty() => {
                                Some(json!({ "text": text }))
                            }
                            ContentBlock::ToolUse { name, input, .. } => Some(json!({
                                "functionCall": { "name": name, "args": input }
                            })),
                            _ => None,
                        })
                        .collect();
                    if !parts.is_empty() {
                        contents.push(json!({ "role": "model", "parts": parts }));
                    }
                }
                TranscriptEntry::ToolResult {
                    tool, content, is_error, ..
                } => {
                    let key = if *is_error { "error" } else { "content" };
                    let mut response = serde_json::Map::new();
                    response.insert(key.to_string(), json!(content));
                    responses.push(json!({
                        "functionResponse": { "name": tool, "response": response }
                    }));
                }
            }
        }
        if !responses.is_empty() {
            contents.push(json!({ "role": "user", "parts": responses }));
        }

        contents
    }

    fn is_tool_use_stop(&self, stop_reason: &str) -> bool {
        // Gemini reports STOP even after function calls; the stream
        // rewrites the finish reason when it has seen any.
        stop_reason == TOOL_USE_STOP
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
        credentials: &Credentials,
    ) -> anyhow::Result<ChunkStream> {
        let Credentials::ApiKey { api_key } = credentials;
        if api_key.is_empty() {
            return Err(ProviderError::Credentials("Gemini").into());
        }

        let system_instruction = request
            .system
            .as_ref()
            .filter(|s| !s.is_empty())
            .map(|s| json!({ "parts": [{ "text": s }] }));

        let body = GeminiRequest {
            contents: request.messages.clone(),
            system_instruction,
            tools: request.tools.clone().filter(|t| !t.is_empty()),
            generation_config: Some(GenerationConfig {
                max_output_tokens: Some(request.max_tokens),
                temperature: request.temperature,
            }),
        };

        debug!(
            model = %request.model,
            messages = body.contents.len(),
            "Streaming Gemini API"
        );

        let response = self
            .client
            .post(self.endpoint(&request.model))
            .query(&[("key", api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|source| ProviderError::Network {
                provider: "Gemini",
                source: source.without_url(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                provider: "Gemini",
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let state = GeminiChunkState {
            sse: Box::pin(parse_sse_stream(response)),
            pending: VecDeque::new(),
            saw_tool_call: false,
        };

        let chunk_stream = futures::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(chunk) = state.pending.pop_front() {
                    return Some((Ok(chunk), state));
                }
                match state.sse.next().await {
                    Some(Ok(event)) => state.absorb(&event),
                    Some(Err(e)) => return Some((Err(e), state)),
                    None => return None,
                }
            }
        });

        Ok(Box::pin(chunk_stream))
    }
}

struct GeminiChunkState {
    sse: Pin<Box<dyn Stream<Item = anyhow::Result<SseEvent>> + Send>>,
    pending: VecDeque<CompletionChunk>,
    saw_tool_call: bool,
}

impl GeminiChunkState {
    /// Queue every chunk carried by one SSE event, in part order.
    fn absorb(&mut self, event: &SseEvent) {
        let data = event.data.trim();
        let chunk: GeminiStreamChunk = match serde_json::from_str(data) {
            Ok(c) => c,
            Err(e) => {
                warn!(%e, "Skipping unparseable Gemini chunk");
                return;
            }
        };

        let mut finish = None;
        if let Some(candidate) = chunk.candidates.into_iter().next() {
            for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
                if let Some(fc) = part.function_call {
                    self.saw_tool_call = true;
                    let input_json = fc
                        .args
                        .map(|a| a.to_string())
                        .unwrap_or_else(|| "{}".into());
                    self.pending.push_back(CompletionChunk {
                        tool_use: Some(ToolUseChunk {
                            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
                            name: fc.name,
                            input_json,
                        }),
                        ..Default::default()
                    });
                } else if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                    if part.thought {
                        trace!(len = text.len(), "Dropping Gemini thought part");
                        continue;
                    }
                    self.pending.push_back(CompletionChunk::text(text));
                }
            }
            finish = candidate.finish_reason;
        }

        if let Some(usage) = chunk.usage_metadata {
            self.pending.push_back(CompletionChunk {
                usage: Some(ChunkUsage {
                    input_tokens: Some(usage.prompt_token_count),
                    output_tokens: Some(usage.candidates_token_count),
                }),
                ..Default::default()
            });
        }

        if let Some(reason) = finish {
            if reason != "STOP" {
                debug!(reason, "Gemini finish reason");
            }
            let reason = if self.saw_tool_call {
                TOOL_USE_STOP.to_string()
            } else {
                reason
            };
            self.pending.push_back(CompletionChunk::stop(reason));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn state() -> GeminiChunkState {
        GeminiChunkState {
            sse: Box::pin(futures::stream::empty::<anyhow::Result<SseEvent>>()),
            pending: VecDeque::new(),
            saw_tool_call: false,
        }
    }

    fn sse(data: &str) -> SseEvent {
        SseEvent {
            event: None,
            data: data.to_string(),
            id: None,
        }
    }

    #[test]
    fn test_gemini_provider_creation() {
        let provider = GeminiProvider::new(Some("http://localhost:9999/"));
        assert_eq!(provider.id(), "google");
        assert_eq!(provider.api(), ModelApi::GoogleGenerativeAi);
        assert_eq!(provider.base_url, "http://localhost:9999");
        assert_eq!(
            provider.endpoint("gemini-2.5-flash"),
            "http://localhost:9999/v1beta/models/gemini-2.5-flash:streamGenerateContent?alt=sse"
        );
        assert_eq!(GeminiProvider::new(None).base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_format_tools_function_declarations() {
        let provider = GeminiProvider::new(None);
        let tools = vec![
            ToolDefinition {
                name: "get_weather".into(),
                description: "Weather for a location".into(),
                parameters_schema: json!({
                    "type": "object",
                    "properties": {"location": {"type": "string"}},
                    "required": ["location"]
                }),
            },
            ToolDefinition {
                name: "sync_state_with_frontend".into(),
                description: "Report document state".into(),
                parameters_schema: json!({"type": "object", "properties": {}}),
            },
        ];
        let formatted = provider.format_tools(&tools);
        assert_eq!(formatted.len(), 1);
        let decls = &formatted[0]["function_declarations"];
        assert_eq!(decls[0]["name"], "get_weather");
        assert_eq!(decls[0]["parameters"]["required"][0], "location");
        assert!(decls[1].get("parameters").is_none());
        assert!(provider.format_tools(&[]).is_empty());
    }

    #[test]
    fn test_format_messages_roles() {
        let provider = GeminiProvider::new(None);
        let transcript = vec![
            TranscriptEntry::user_text("Hello"),
            TranscriptEntry::Assistant {
                content: vec![ContentBlock::text("Hi there")],
                usage: None,
                timestamp: Utc::now(),
            },
        ];
        let messages = provider.format_messages(&transcript);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["parts"][0]["text"], "Hello");
        assert_eq!(messages[1]["role"], "model");
        assert_eq!(messages[1]["parts"][0]["text"], "Hi there");
    }

    #[test]
    fn test_format_messages_groups_function_responses() {
        let provider = GeminiProvider::new(None);
        let result = |id: &str, tool: &str, content: &str, is_error| TranscriptEntry::ToolResult {
            tool_use_id: id.into(),
            tool: tool.into(),
            content: content.into(),
            is_error,
            timestamp: Utc::now(),
        };
        let transcript = vec![
            TranscriptEntry::user_text("sync and weather"),
            TranscriptEntry::Assistant {
                content: vec![
                    ContentBlock::ToolUse {
                        id: "c1".into(),
                        name: "sync_state_with_frontend".into(),
                        input: json!({}),
                    },
                    ContentBlock::ToolUse {
                        id: "c2".into(),
                        name: "get_weather".into(),
                        input: json!({"location": "Oslo"}),
                    },
                ],
                usage: None,
                timestamp: Utc::now(),
            },
            result("c1", "sync_state_with_frontend", "State length: 5", false),
            result("c2", "get_weather", "upstream down", true),
            TranscriptEntry::user_text("thanks"),
        ];
        let messages = provider.format_messages(&transcript);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1]["parts"][1]["functionCall"]["args"]["location"], "Oslo");
        let responses = messages[2]["parts"].as_array().unwrap();
        assert_eq!(responses.len(), 2);
        assert_eq!(
            responses[0]["functionResponse"]["response"]["content"],
            "State length: 5"
        );
        assert_eq!(responses[1]["functionResponse"]["response"]["error"], "upstream down");
        assert_eq!(messages[3]["parts"][0]["text"], "thanks");
    }

    #[test]
    fn test_is_tool_use_stop_gemini() {
        let provider = GeminiProvider::new(None);
        assert!(provider.is_tool_use_stop(TOOL_USE_STOP));
        assert!(!provider.is_tool_use_stop("STOP"));
    }

    #[test]
    fn test_absorb_keeps_all_parts_in_order() {
        let mut state = state();
        state.absorb(&sse(
            r#"{"candidates":[{"content":{"parts":[{"text":"Hel"},{"text":"lo"}]},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":10,"candidatesTokenCount":5}}"#,
        ));
        let chunks: Vec<CompletionChunk> = state.pending.drain(..).collect();
        assert_eq!(
            chunks,
            vec![
                CompletionChunk::text("Hel"),
                CompletionChunk::text("lo"),
                CompletionChunk::usage(10, 5),
                CompletionChunk::stop("STOP"),
            ]
        );
    }

    #[test]
    fn test_absorb_function_call_rewrites_stop() {
        let mut state = state();
        state.absorb(&sse(
            r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"get_weather","args":{"location":"Oslo"}}}]}}]}"#,
        ));
        state.absorb(&sse(r#"{"candidates":[{"finishReason":"STOP"}]}"#));
        let chunks: Vec<CompletionChunk> = state.pending.drain(..).collect();
        assert_eq!(chunks.len(), 2);
        let tool = chunks[0].tool_use.as_ref().unwrap();
        assert_eq!(tool.name, "get_weather");
        assert!(tool.id.starts_with("call_"));
        let args: Value = serde_json::from_str(&tool.input_json).unwrap();
        assert_eq!(args["location"], "Oslo");
        assert_eq!(chunks[1].stop_reason.as_deref(), Some(TOOL_USE_STOP));
    }

    #[test]
    fn test_absorb_skips_thoughts_and_garbage() {
        let mut state = state();
        state.absorb(&sse("not json"));
        state.absorb(&sse(
            r#"{"candidates":[{"content":{"parts":[{"text":"pondering","thought":true},{"text":"answer"}]}}]}"#,
        ));
        let chunks: Vec<CompletionChunk> = state.pending.drain(..).collect();
        assert_eq!(chunks, vec![CompletionChunk::text("answer")]);
    }

    #[tokio::test]
    async fn test_empty_api_key_rejected() {
        let provider = GeminiProvider::new(Some("http://127.0.0.1:1"));
        let request = CompletionRequest {
            model: "gemini-2.5-flash".into(),
            messages: vec![],
            max_tokens: 16,
            temperature: None,
            tools: None,
            system: None,
        };
        let creds = Credentials::ApiKey {
            api_key: String::new(),
        };
        let err = match provider.stream(&request, &creds).await {
            Ok(_) => panic!("expected credentials error"),
            Err(e) => e,
        };
        let err = err.downcast_ref::<ProviderError>().unwrap();
        assert_eq!(err.code(), "auth_failure");
    }
}
