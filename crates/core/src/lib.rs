//! # mindloop core
//!
//! Domain types, traits, and error definitions for the mindloop agent core.
//! This crate has **no framework dependencies**: it defines the contracts
//! (model call, embedding, storage, tools) that the other crates implement
//! against, plus the persisted memory data model.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here. Implementations live in their
//! respective crates, so tests can swap in scripted mocks and hosts can plug in
//! their own storage or model transport.

pub mod error;
pub mod event;
pub mod memory;
pub mod message;
pub mod provider;
pub mod storage;
pub mod text;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::Error;
pub use event::{DomainEvent, EventBus};
pub use memory::{HistoryMessage, RelevanceCandidate, Skill};
pub use message::{ChatMessage, MessageStack, Role};
pub use provider::{Embedder, ModelClient, ModelSettings};
pub use storage::KeyValueStore;
pub use tool::{Tool, ToolContext, ToolDefinition, ToolJob, ToolOutcome, ToolRegistry};
