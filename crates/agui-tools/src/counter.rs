//! send_counter_events: compatibility stub for clients that expect it.

use async_trait::async_trait;

use crate::{Tool, ToolContext, ToolOutput};

pub struct SendCounterEventsTool;

#[async_trait]
impl Tool for SendCounterEventsTool {
    fn name(&self) -> &str {
        "send_counter_events"
    }

    fn description(&self) -> &str {
        "Request counter events on the client. Not supported by this server; \
         calling it has no effect."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(
        &self,
        _params: serde_json::Value,
        _context: &ToolContext,
    ) -> anyhow::Result<ToolOutput> {
        Ok(ToolOutput::text("Counter events not emitted (compat mode)"))
    }
}
