//! Request-level strategies built on top of the reasoning loop.
//!
//! [`decompose`] splits multi-phase requests into subtasks, runs each one
//! through the loop and synthesizes a single answer.

pub mod decompose;

pub use decompose::{Subtask, SubtaskOrchestrator, SubtaskResult, is_multi_phase, parse_plan};

#[cfg(test)]
pub(crate) mod test_helpers;
