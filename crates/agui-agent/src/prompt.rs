//! Instruction sources and system prompt assembly.

use std::sync::Arc;

use agui_core::document::DocumentState;
use tracing::warn;

/// Base instructions used by every profile unless overridden in config.
pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful assistant";

type Template = dyn Fn(&DocumentState) -> String + Send + Sync;

/// Where the agent's instructions come from.
#[derive(Clone)]
pub enum Instructions {
    /// Fixed text.
    Static(String),
    /// Rendered per run from the reconciled document state.
    Templated(Arc<Template>),
}

impl std::fmt::Debug for Instructions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(text) => f.debug_tuple("Static").field(text).finish(),
            Self::Templated(_) => f.write_str("Templated(..)"),
        }
    }
}

impl Instructions {
    pub fn templated(render: impl Fn(&DocumentState) -> String + Send + Sync + 'static) -> Self {
        Self::Templated(Arc::new(render))
    }

    /// Instructions for a named profile, with an optional base override.
    pub fn for_profile(profile: &str, base: Option<&str>) -> Self {
        let base = base.unwrap_or(DEFAULT_INSTRUCTIONS).to_string();
        match profile {
            "frontend_tools" => Self::templated(move |state| frontend_tools_instructions(&base, state)),
            _ => Self::Static(base),
        }
    }

    pub fn render(&self, state: &DocumentState) -> String {
        match self {
            Self::Static(text) => text.clone(),
            Self::Templated(render) => render(state),
        }
    }
}

/// Base text plus a listing of the frontend's tools, when it declared any.
pub fn frontend_tools_instructions(base: &str, state: &DocumentState) -> String {
    if state.frontend_tools.is_empty() {
        return base.to_string();
    }
    let listing = serde_json::to_string_pretty(&state.frontend_tools).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to render frontend tool listing");
        state.frontend_tool_names().join(", ")
    });
    format!(
        "{base}\n\nThe user's browser provides these tools:\n{listing}\n\n\
         To use one, call `call_frontend_tool` with `tool_name` set to the tool's \
         name and `args` set to its arguments. Only use tools from this list."
    )
}

/// Assemble the system prompt for one run.
pub fn build_system_prompt(
    instructions: &Instructions,
    state: &DocumentState,
    system_messages: &[String],
    context_addendum: Option<&str>,
) -> String {
    let mut parts = vec![instructions.render(state)];
    parts.extend(system_messages.iter().filter(|m| !m.is_empty()).cloned());
    if let Some(addendum) = context_addendum.filter(|a| !a.is_empty()) {
        parts.push(addendum.to_string());
    }
    parts.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use agui_core::document::ToolDescriptor;
    use serde_json::json;

    fn descriptor(value: serde_json::Value) -> ToolDescriptor {
        ToolDescriptor(value.as_object().cloned().unwrap())
    }

    #[test]
    fn test_document_profile_is_static() {
        let instructions = Instructions::for_profile("document", None);
        assert!(matches!(instructions, Instructions::Static(_)));
        assert_eq!(
            instructions.render(&DocumentState::new("ignored")),
            "You are a helpful assistant"
        );
    }

    #[test]
    fn test_frontend_profile_lists_tools() {
        let instructions = Instructions::for_profile("frontend_tools", None);
        let state = DocumentState {
            document: String::new(),
            frontend_tools: vec![descriptor(json!({"name": "highlight", "args": {"color": "string"}}))],
        };
        let text = instructions.render(&state);
        assert!(text.starts_with("You are a helpful assistant"));
        assert!(text.contains("\"highlight\""));
        assert!(text.contains("call_frontend_tool"));
    }

    #[test]
    fn test_frontend_profile_omits_empty_listing() {
        let instructions = Instructions::for_profile("frontend_tools", Some("Be terse."));
        assert_eq!(instructions.render(&DocumentState::default()), "Be terse.");
    }

    #[test]
    fn test_build_system_prompt_order() {
        let prompt = build_system_prompt(
            &Instructions::Static("Base".into()),
            &DocumentState::default(),
            &["From client".to_string(), String::new()],
            Some("[page]: editor"),
        );
        assert_eq!(prompt, "Base\n\nFrom client\n\n[page]: editor");
    }
}
