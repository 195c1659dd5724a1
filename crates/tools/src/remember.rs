//! REMEMBER tool: save a manual memory entry.
//!
//! `REMEMBER:<key>: <value>` stores under an explicit key;
//! `REMEMBER:<text>` stores under `note_<millis>`.

use async_trait::async_trait;
use chrono::Utc;
use mindloop_core::error::ToolError;
use mindloop_core::memory::{SESSION_PREFIX, is_session_key};
use mindloop_core::tool::{Tool, ToolContext};
use mindloop_memory::MemoryStore;
use serde_json::{Value, json};

use crate::split_labeled;

pub struct RememberTool;

#[async_trait]
impl Tool for RememberTool {
    fn name(&self) -> &str {
        "REMEMBER"
    }

    fn description(&self) -> &str {
        "Save something to long-term memory. Parameter: `key: value`, or just the text to remember."
    }

    async fn execute(&self, parameter: &str, ctx: &ToolContext) -> Result<Value, ToolError> {
        let text = parameter.trim();
        if text.is_empty() {
            return Err(ToolError::InvalidParameter(
                "REMEMBER needs something to save".into(),
            ));
        }

        let (key, value) = match split_labeled(text) {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (format!("note_{}", Utc::now().timestamp_millis()), text.to_string()),
        };
        if is_session_key(&key) {
            return Err(ToolError::InvalidParameter(format!(
                "keys starting with '{SESSION_PREFIX}' are reserved"
            )));
        }

        MemoryStore::new(ctx.storage.clone())
            .save_memory(&key, Value::String(value))
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "REMEMBER".into(),
                reason: e.to_string(),
            })?;

        Ok(json!({ "saved": key }))
    }
}
