//! RECALL tool: on-demand search over manual memories and session summaries.

use async_trait::async_trait;
use mindloop_core::error::ToolError;
use mindloop_core::tool::{Tool, ToolContext};
use mindloop_memory::relevance::RECALL_THRESHOLD;
use mindloop_memory::{MemoryStore, RelevanceFilter};
use serde_json::{Value, json};

/// Searches the memory entries with the recall similarity threshold.
pub struct RecallTool {
    threshold: f32,
}

impl RecallTool {
    pub fn new() -> Self {
        Self {
            threshold: RECALL_THRESHOLD,
        }
    }

    pub fn with_threshold(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl Default for RecallTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for RecallTool {
    fn name(&self) -> &str {
        "RECALL"
    }

    fn description(&self) -> &str {
        "Search long-term memory (saved notes and past session summaries). Parameter: what to look for."
    }

    async fn execute(&self, parameter: &str, ctx: &ToolContext) -> Result<Value, ToolError> {
        let query = parameter.trim();
        if query.is_empty() {
            return Err(ToolError::InvalidParameter(
                "RECALL needs a search query".into(),
            ));
        }

        let store = MemoryStore::new(ctx.storage.clone());
        let entries = store
            .capped_memory_entries()
            .await
            .map_err(|e| failed(e.to_string()))?;
        let filter = RelevanceFilter::new(ctx.embedder.clone(), self.threshold);
        let ranked = filter
            .rank(query, &entries, &store)
            .await
            .map_err(|e| failed(e.to_string()))?;

        let results: Vec<Value> = ranked
            .iter()
            .map(|c| json!({ "key": c.key, "value": c.value, "score": c.score }))
            .collect();

        Ok(json!({
            "query": query,
            "count": results.len(),
            "results": results,
        }))
    }
}

fn failed(reason: String) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: "RECALL".into(),
        reason,
    }
}
