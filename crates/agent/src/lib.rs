//! The mindloop agent: memory-aware reasoning loop.
//!
//! A request flows through:
//!
//! 1. **Compose** a message stack from the memory tiers (narrative, recent
//!    turns, profile, summaries and saved memories, skills)
//! 2. **Call** the model with the system directive and the stack
//! 3. **Parse** think blocks and tool tags out of the reply
//! 4. **Dispatch** requested tools, append their results, loop back to 2
//! 5. **Answer** once a reply carries no tool tags, then queue background
//!    maintenance
//!
//! The loop stops at the iteration cap with [`Answer::NoResponse`].
//! Multi-phase requests may first be split into subtasks, each of which runs
//! the full loop.

pub mod context;
pub mod loop_runner;
pub mod maintenance;
pub mod patterns;
pub mod protocol;
pub mod reply;
pub mod skills;
pub mod stream_event;

pub use context::{ComposedContext, ContextComposer, LayerStats, PageContext, TurnInput};
pub use loop_runner::{AgentLoop, Answer, IterationLog, LoopOutcome, RequestResult};
pub use maintenance::{JobStatus, MaintenanceReport, MaintenanceScheduler, MaintenanceSettings};
pub use patterns::{Subtask, SubtaskOrchestrator, SubtaskResult};
pub use protocol::{ParsedOutput, Segment};
pub use stream_event::AgentStreamEvent;
