//! FORGET tool: remove a manual memory entry by key.

use async_trait::async_trait;
use mindloop_core::error::ToolError;
use mindloop_core::tool::{Tool, ToolContext};
use mindloop_memory::MemoryStore;
use serde_json::{Value, json};

pub struct ForgetTool;

#[async_trait]
impl Tool for ForgetTool {
    fn name(&self) -> &str {
        "FORGET"
    }

    fn description(&self) -> &str {
        "Delete a saved memory. Parameter: the exact key to remove."
    }

    async fn execute(&self, parameter: &str, ctx: &ToolContext) -> Result<Value, ToolError> {
        let key = parameter.trim();
        if key.is_empty() {
            return Err(ToolError::InvalidParameter("FORGET needs a key".into()));
        }

        let removed = MemoryStore::new(ctx.storage.clone())
            .remove_memory(key)
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "FORGET".into(),
                reason: e.to_string(),
            })?;

        if !removed {
            return Err(ToolError::ExecutionFailed {
                tool_name: "FORGET".into(),
                reason: format!("no memory entry named '{key}'"),
            });
        }
        Ok(json!({ "forgotten": key }))
    }
}
