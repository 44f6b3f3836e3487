//! Per-run conversation transcript.
//!
//! A transcript is rebuilt from the request's message history on every run
//! and extended in memory by the agent loop. It is never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ContentBlock;

/// A single entry in a run transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TranscriptEntry {
    #[serde(rename = "user")]
    User {
        content: Vec<ContentBlock>,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "assistant")]
    Assistant {
        content: Vec<ContentBlock>,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        tool: String,
        content: String,
        is_error: bool,
        timestamp: DateTime<Utc>,
    },
}

impl TranscriptEntry {
    /// Plain-text user turn.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::User {
            content: vec![ContentBlock::text(text)],
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Ordered transcript owned by a single run.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<TranscriptEntry>) -> Self {
        Self { entries }
    }

    pub fn append(&mut self, entry: TranscriptEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up the tool name recorded for a tool-use id in earlier assistant turns.
    pub fn tool_name_for(&self, tool_use_id: &str) -> Option<&str> {
        self.entries.iter().rev().find_map(|entry| match entry {
            TranscriptEntry::Assistant { content, .. } => content.iter().find_map(|b| match b {
                ContentBlock::ToolUse { id, name, .. } if id == tool_use_id => Some(name.as_str()),
                _ => None,
            }),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_name_lookup() {
        let mut transcript = Transcript::new();
        transcript.append(TranscriptEntry::user_text("weather?"));
        transcript.append(TranscriptEntry::Assistant {
            content: vec![ContentBlock::ToolUse {
                id: "call_1".into(),
                name: "get_weather".into(),
                input: json!({"location": "Oslo"}),
            }],
            usage: None,
            timestamp: Utc::now(),
        });

        assert_eq!(transcript.tool_name_for("call_1"), Some("get_weather"));
        assert_eq!(transcript.tool_name_for("call_2"), None);
        assert_eq!(transcript.len(), 2);
    }

    #[test]
    fn test_entry_serialization_tag() {
        let entry = TranscriptEntry::user_text("hi");
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["type"], "user");
        assert_eq!(value["content"][0]["type"], "text");
        assert_eq!(value["content"][0]["text"], "hi");
    }
}
