//! Tool dispatch and built-in memory tools for mindloop.
//!
//! The dispatcher runs the tool jobs the model requests; the built-ins let
//! the model read and curate its own memory:
//! `RECALL`, `REMEMBER`, `FORGET` and `LEARN_SKILL`.
//! Hosts register their own tools (web search, URL fetch) alongside these.

pub mod dispatcher;
pub mod forget;
pub mod learn_skill;
pub mod recall;
pub mod remember;

use mindloop_core::tool::ToolRegistry;

pub use dispatcher::{ToolDispatcher, render, render_all, summarize};

/// Longest label accepted before the `:` in `label: body` parameters.
const MAX_LABEL_CHARS: usize = 64;

/// Split `label: body` at the first colon. Both halves must be non-empty.
pub(crate) fn split_labeled(text: &str) -> Option<(&str, &str)> {
    let (label, body) = text.split_once(':')?;
    let (label, body) = (label.trim(), body.trim());
    if label.is_empty() || body.is_empty() || label.chars().count() > MAX_LABEL_CHARS {
        return None;
    }
    Some((label, body))
}

/// A registry with every built-in tool. `recall_threshold` is the minimum
/// similarity for `RECALL` results.
pub fn builtin_registry(recall_threshold: f32) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(recall::RecallTool::with_threshold(recall_threshold)));
    registry.register(Box::new(remember::RememberTool));
    registry.register(Box::new(forget::ForgetTool));
    registry.register(Box::new(learn_skill::LearnSkillTool));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_has_memory_tools() {
        let registry = builtin_registry(0.25);
        let names: Vec<_> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["FORGET", "LEARN_SKILL", "RECALL", "REMEMBER"]);
    }

    #[test]
    fn split_labeled_cases() {
        assert_eq!(split_labeled("k: v"), Some(("k", "v")));
        assert_eq!(split_labeled("time: 10:30"), Some(("time", "10:30")));
        assert_eq!(split_labeled("no colon"), None);
        assert_eq!(split_labeled(": v"), None);
        assert_eq!(split_labeled("k:"), None);
        assert_eq!(split_labeled(&format!("{}: v", "x".repeat(65))), None);
    }
}
