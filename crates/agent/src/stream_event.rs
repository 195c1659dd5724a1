//! Agent-level streaming events.
//!
//! Hosts that want to watch a request as it runs pass an unbounded sender;
//! the loop emits one event per step. This is the only place think blocks
//! are surfaced: they never reach the final answer.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

/// Events emitted while a request runs.
///
/// - `thought`: contents of a think block
/// - `tool_call`: a tool job is about to be dispatched
/// - `tool_result`: a tool job resolved (rendered line)
/// - `subtask`: a decomposed subtask finished
/// - `answer`: the request finished
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentStreamEvent {
    Thought {
        iteration: usize,
        content: String,
    },

    ToolCall {
        iteration: usize,
        name: String,
        parameter: String,
    },

    ToolResult {
        iteration: usize,
        name: String,
        output: String,
        success: bool,
    },

    Subtask {
        id: String,
        task: String,
        answered: bool,
    },

    /// `content` is `None` when the loop produced no response.
    Answer {
        request_id: String,
        content: Option<String>,
        iterations: usize,
    },
}

impl AgentStreamEvent {
    /// Event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Thought { .. } => "thought",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::Subtask { .. } => "subtask",
            Self::Answer { .. } => "answer",
        }
    }
}

/// Optional event sink. Sending never fails the request.
#[derive(Clone, Default)]
pub struct EventSink(Option<UnboundedSender<AgentStreamEvent>>);

impl EventSink {
    pub fn new(sender: Option<UnboundedSender<AgentStreamEvent>>) -> Self {
        Self(sender)
    }

    pub fn emit(&self, event: AgentStreamEvent) {
        if let Some(tx) = &self.0 {
            // Receiver gone is fine
            let _ = tx.send(event);
        }
    }
}
