//! sync_state_with_frontend: report the shared document back to the model.

use async_trait::async_trait;
use tracing::debug;

use crate::{Tool, ToolContext, ToolOutput};

pub struct SyncStateTool;

#[async_trait]
impl Tool for SyncStateTool {
    fn name(&self) -> &str {
        "sync_state_with_frontend"
    }

    fn description(&self) -> &str {
        "Read the document currently shared with the frontend. Returns its length and \
         mirrors the full state back to the client."
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
        context: &ToolContext,
    ) -> anyhow::Result<ToolOutput> {
        let len = context.state.document_len();
        debug!(run_id = %context.run_id, document_len = len, "sync_state_with_frontend");
        Ok(ToolOutput::text(format!("State length: {len}"))
            .with_snapshot(context.state.to_snapshot()))
    }
}
