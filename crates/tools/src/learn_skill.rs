//! LEARN_SKILL tool: add a scored behavioral directive.
//!
//! New skills start at score 50 with no usage. Re-learning an existing name
//! replaces its instruction and keeps its history.

use async_trait::async_trait;
use mindloop_core::error::ToolError;
use mindloop_core::memory::Skill;
use mindloop_core::tool::{Tool, ToolContext};
use mindloop_memory::MemoryStore;
use serde_json::{Value, json};
use tracing::info;

use crate::split_labeled;

pub struct LearnSkillTool;

#[async_trait]
impl Tool for LearnSkillTool {
    fn name(&self) -> &str {
        "LEARN_SKILL"
    }

    fn description(&self) -> &str {
        "Learn a reusable behavior to apply in future conversations. Parameter: `name: instruction`."
    }

    async fn execute(&self, parameter: &str, ctx: &ToolContext) -> Result<Value, ToolError> {
        let (name, instruction) = split_labeled(parameter.trim()).ok_or_else(|| {
            ToolError::InvalidParameter("LEARN_SKILL expects `name: instruction`".into())
        })?;

        let store = MemoryStore::new(ctx.storage.clone());
        let failed = |e: mindloop_core::error::StorageError| ToolError::ExecutionFailed {
            tool_name: "LEARN_SKILL".into(),
            reason: e.to_string(),
        };

        let mut skills = store.skills().await.map_err(failed)?;
        let refreshed = match skills.iter_mut().find(|s| s.name == name) {
            Some(existing) => {
                existing.instruction = instruction.to_string();
                true
            }
            None => {
                skills.push(Skill::new(name, instruction));
                false
            }
        };
        store.set_skills(&skills).await.map_err(failed)?;

        info!(skill = %name, refreshed, "Skill learned");
        Ok(json!({ "learned": name, "refreshed": refreshed }))
    }
}
