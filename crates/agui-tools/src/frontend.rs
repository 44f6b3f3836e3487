//! call_frontend_tool: ask the client to run one of its declared tools.
//!
//! Nothing executes server-side. The reply only acknowledges the request;
//! the client sees the call itself in the event stream.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{Tool, ToolContext, ToolOutput};

pub struct CallFrontendToolTool;

#[derive(Deserialize)]
struct Params {
    tool_name: String,
    #[serde(default = "empty_args")]
    args: Value,
}

fn empty_args() -> Value {
    Value::Object(Default::default())
}

/// Serialize with object keys sorted at every level, so equal values give
/// equal strings whatever order the model produced them in.
pub fn canonical_json(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let ordered: BTreeMap<&String, Value> =
                    map.iter().map(|(k, v)| (k, sorted(v))).collect();
                Value::Object(ordered.into_iter().map(|(k, v)| (k.clone(), v)).collect())
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    sorted(value).to_string()
}

#[async_trait]
impl Tool for CallFrontendToolTool {
    fn name(&self) -> &str {
        "call_frontend_tool"
    }

    fn description(&self) -> &str {
        "Invoke a tool that runs in the user's browser. `tool_name` must be one of \
         the frontend tools listed in your instructions; `args` are passed to it as-is."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "tool_name": {
                    "type": "string",
                    "description": "Name of the frontend tool to invoke"
                },
                "args": {
                    "type": "object",
                    "description": "Arguments for the frontend tool"
                }
            },
            "required": ["tool_name"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        context: &ToolContext,
    ) -> anyhow::Result<ToolOutput> {
        let p: Params = serde_json::from_value(params)?;

        if !context.state.declares_frontend_tool(&p.tool_name) {
            warn!(
                tool_name = %p.tool_name,
                declared = ?context.state.frontend_tool_names(),
                "Model requested a frontend tool the client did not declare"
            );
        }

        let args = canonical_json(&p.args);
        debug!(run_id = %context.run_id, tool_name = %p.tool_name, "call_frontend_tool");
        Ok(ToolOutput::text(format!(
            "Frontend tool '{}' requested with args {args}",
            p.tool_name
        )))
    }
}
