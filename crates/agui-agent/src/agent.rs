//! Process-wide agent configuration.

use std::sync::Arc;
use std::time::Duration;

use agui_core::config::Config;
use agui_core::document::DocumentState;
use agui_core::error::Result;
use agui_core::transcript::Transcript;
use agui_providers::{Credentials, LlmProvider, ToolDefinition};
use agui_tools::{ToolRegistry, registry_for_profile};

use crate::prompt::Instructions;

/// An LLM agent: provider, instructions, and tools. Immutable once built.
pub struct Agent {
    pub(crate) provider: Arc<dyn LlmProvider>,
    pub(crate) credentials: Option<Credentials>,
    pub(crate) config: Arc<Config>,
    pub(crate) profile: String,
    pub(crate) model: String,
    pub(crate) instructions: Instructions,
    pub(crate) tools: ToolRegistry,
    pub(crate) max_tokens: u32,
    pub(crate) temperature: Option<f64>,
    pub(crate) max_tool_iterations: u32,
    pub(crate) idle_timeout: Duration,
}

impl Agent {
    /// Build the agent for the configured profile.
    ///
    /// `credentials` may be `None`; every run then ends with an
    /// `auth_failure` error instead of calling the provider.
    pub fn from_config(
        config: Arc<Config>,
        provider: Arc<dyn LlmProvider>,
        credentials: Option<Credentials>,
    ) -> Result<Self> {
        let profile = config.agent_profile();
        let tools = registry_for_profile(&profile)?;
        let instructions = Instructions::for_profile(&profile, config.instructions());
        Ok(Self {
            provider,
            credentials,
            profile,
            model: config.model(),
            instructions,
            tools,
            max_tokens: config.max_tokens(),
            temperature: config.temperature(),
            max_tool_iterations: config.max_tool_iterations().max(1),
            idle_timeout: Duration::from_secs(config.idle_timeout_secs()),
            config,
        })
    }

    pub fn with_instructions(mut self, instructions: Instructions) -> Self {
        self.instructions = instructions;
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_max_tool_iterations(mut self, max: u32) -> Self {
        self.max_tool_iterations = max.max(1);
        self
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider_id(&self) -> &str {
        self.provider.id()
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.list()
    }

    pub fn instructions(&self) -> &Instructions {
        &self.instructions
    }

    /// Definitions for the registered server-side tools.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters_schema: t.parameters_schema(),
            })
            .collect()
    }
}

/// Per-run input, owned by the spawned run task.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub thread_id: String,
    pub run_id: String,
    pub state: DocumentState,
    /// History converted from the request messages.
    pub transcript: Transcript,
    /// Extra system text supplied by the client.
    pub system: Vec<String>,
    /// Forwarded frontend context, already formatted.
    pub context: Option<String>,
    /// Client-declared tools; calls to these end the run unanswered.
    pub deferred_tools: Vec<ToolDefinition>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use agui_core::config::AgentConfig;
    use agui_providers::ScriptedProvider;

    #[test]
    fn test_from_config_defaults() {
        let agent = Agent::from_config(
            Arc::new(Config::default()),
            Arc::new(ScriptedProvider::new(vec![])),
            None,
        )
        .unwrap();
        assert_eq!(agent.profile(), "document");
        assert_eq!(agent.model(), "gemini-2.5-flash");
        assert_eq!(
            agent.tool_names(),
            vec!["sync_state_with_frontend", "send_counter_events"]
        );
        assert!(!agent.has_credentials());
        assert_eq!(agent.idle_timeout, Duration::from_secs(120));
        assert_eq!(agent.tool_definitions().len(), 2);
    }

    #[test]
    fn test_from_config_unknown_profile() {
        let config = Config {
            agent: Some(AgentConfig {
                profile: Some("nonsense".into()),
                ..AgentConfig::default()
            }),
            ..Config::default()
        };
        let result = Agent::from_config(
            Arc::new(config),
            Arc::new(ScriptedProvider::new(vec![])),
            None,
        );
        assert!(result.is_err());
    }
}
