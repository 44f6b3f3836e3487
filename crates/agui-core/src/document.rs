//! Shared document state and best-effort reconciliation of client state.
//!
//! Clients send arbitrary JSON in the `state` field of a run request. The
//! reconciler turns it into a [`DocumentState`] by ordered precedence and
//! never fails: anything it cannot interpret becomes the default state.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// A tool declared by the frontend, executed client-side.
///
/// The record is opaque: it is listed in the agent instructions and echoed
/// back on dispatch, but never interpreted beyond its `name` key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolDescriptor(pub Map<String, Value>);

impl ToolDescriptor {
    pub fn name(&self) -> Option<&str> {
        self.0.get("name").and_then(Value::as_str)
    }
}

/// Document mirrored between the browser and the agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DocumentState {
    pub document: String,
    pub frontend_tools: Vec<ToolDescriptor>,
}

impl DocumentState {
    pub fn new(document: impl Into<String>) -> Self {
        Self {
            document: document.into(),
            frontend_tools: Vec::new(),
        }
    }

    /// Document length in characters.
    pub fn document_len(&self) -> usize {
        self.document.chars().count()
    }

    pub fn frontend_tool_names(&self) -> Vec<&str> {
        self.frontend_tools.iter().filter_map(|t| t.name()).collect()
    }

    pub fn declares_frontend_tool(&self, name: &str) -> bool {
        self.frontend_tools.iter().any(|t| t.name() == Some(name))
    }

    pub fn to_snapshot(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// The runtime shape of a client state payload.
#[derive(Debug, Clone, PartialEq)]
pub enum StatePayload {
    Absent,
    Mapping(Map<String, Value>),
    Typed(DocumentState),
    Other(Value),
}

impl StatePayload {
    pub fn classify(value: Option<Value>) -> Self {
        match value {
            None | Some(Value::Null) => Self::Absent,
            Some(Value::Object(map)) => Self::Mapping(map),
            Some(other) => Self::Other(other),
        }
    }
}

impl From<Option<Value>> for StatePayload {
    fn from(value: Option<Value>) -> Self {
        Self::classify(value)
    }
}

impl From<DocumentState> for StatePayload {
    fn from(state: DocumentState) -> Self {
        Self::Typed(state)
    }
}

/// Which reconciliation branch produced the state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Default,
    Mapping,
    Typed,
    Validated,
    Fallback { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub state: DocumentState,
    pub outcome: ReconcileOutcome,
}

/// Reconcile a client state payload into a [`DocumentState`].
///
/// Precedence: absent, mapping, typed, other. Only objects are validated;
/// anything that fails falls back to the default state with a warning.
pub fn reconcile_state(payload: impl Into<StatePayload>) -> Reconciled {
    let attempt = match payload.into() {
        StatePayload::Absent => Ok((DocumentState::default(), ReconcileOutcome::Default)),
        StatePayload::Mapping(map) => serde_json::from_value::<DocumentState>(Value::Object(map))
            .map(|state| (state, ReconcileOutcome::Mapping)),
        StatePayload::Typed(state) => Ok((state, ReconcileOutcome::Typed)),
        // Arrays would otherwise fill the struct positionally.
        StatePayload::Other(value @ Value::Object(_)) => {
            serde_json::from_value::<DocumentState>(value)
                .map(|state| (state, ReconcileOutcome::Validated))
        }
        StatePayload::Other(value) => Err(<serde_json::Error as serde::de::Error>::custom(format!(
            "expected a mapping, got {}",
            json_kind(&value)
        ))),
    };

    match attempt {
        Ok((state, outcome)) => {
            debug!(?outcome, document_len = state.document_len(), "Reconciled document state");
            Reconciled { state, outcome }
        }
        Err(e) => {
            warn!(%e, "Invalid client state, falling back to default document state");
            Reconciled {
                state: DocumentState::default(),
                outcome: ReconcileOutcome::Fallback {
                    reason: e.to_string(),
                },
            }
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
