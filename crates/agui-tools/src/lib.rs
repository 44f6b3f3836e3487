//! Tools the gateway agent can call during a run.
//!
//! Each tool implements the [`Tool`] trait. A profile selects which tools an
//! agent gets; the registry is built once at startup and never mutated.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use agui_core::config::{Config, PROFILES};
use agui_core::document::DocumentState;
use agui_core::error::{AguiError, Result};

pub mod counter;
pub mod frontend;
pub mod sync_state;
pub mod weather;

pub use counter::SendCounterEventsTool;
pub use frontend::CallFrontendToolTool;
pub use sync_state::SyncStateTool;
pub use weather::GetWeatherTool;

/// Context provided to tools during execution.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub thread_id: String,
    pub run_id: String,
    /// Document state reconciled from the request.
    pub state: DocumentState,
    pub config: Arc<Config>,
}

/// Output from a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
    /// State to mirror to the client as a snapshot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<serde_json::Value>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
            snapshot: None,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
            snapshot: None,
        }
    }

    pub fn with_snapshot(mut self, snapshot: serde_json::Value) -> Self {
        self.snapshot = Some(snapshot);
        self
    }
}

/// The core tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name as exposed to the LLM.
    fn name(&self) -> &str;

    /// JSON Schema describing the tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Human-readable description for the LLM.
    fn description(&self) -> &str;

    /// Execute the tool with the given parameters.
    async fn execute(
        &self,
        params: serde_json::Value,
        context: &ToolContext,
    ) -> anyhow::Result<ToolOutput>;
}

/// Registry of available tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A tool with the same name replaces the earlier one.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(Box::new(tool));
        self
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().find(|t| t.name() == name).map(|t| t.as_ref())
    }

    pub fn list(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Tool> {
        self.tools.iter().map(|t| t.as_ref())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Build the tool set for an agent profile.
pub fn registry_for_profile(profile: &str) -> Result<ToolRegistry> {
    match profile {
        "document" => Ok(ToolRegistry::new()
            .with(SyncStateTool)
            .with(SendCounterEventsTool)),
        "frontend_tools" => Ok(ToolRegistry::new()
            .with(SyncStateTool)
            .with(CallFrontendToolTool)
            .with(GetWeatherTool::new())),
        other => Err(AguiError::Config(format!(
            "Unknown agent profile '{other}' (expected one of: {})",
            PROFILES.join(", ")
        ))),
    }
}

#[cfg(test)]
pub(crate) fn test_context(state: DocumentState) -> ToolContext {
    ToolContext {
        thread_id: "thread-1".into(),
        run_id: "run-1".into(),
        state,
        config: Arc::new(Config::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_profile_tools() {
        let registry = registry_for_profile("document").unwrap();
        assert_eq!(
            registry.list(),
            vec!["sync_state_with_frontend", "send_counter_events"]
        );
    }

    #[test]
    fn test_frontend_tools_profile_tools() {
        let registry = registry_for_profile("frontend_tools").unwrap();
        assert_eq!(
            registry.list(),
            vec!["sync_state_with_frontend", "call_frontend_tool", "get_weather"]
        );
        assert!(registry.get("get_weather").is_some());
        assert!(registry.get("send_counter_events").is_none());
    }

    #[test]
    fn test_unknown_profile() {
        let err = registry_for_profile("chaos").err().unwrap();
        assert!(err.to_string().contains("chaos"));
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(SyncStateTool));
        registry.register(Box::new(SyncStateTool));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_schemas_are_objects() {
        for profile in PROFILES {
            let registry = registry_for_profile(profile).unwrap();
            for tool in registry.iter() {
                let schema = tool.parameters_schema();
                assert_eq!(schema["type"], "object", "{}", tool.name());
                assert!(!tool.description().is_empty());
            }
        }
    }
}
