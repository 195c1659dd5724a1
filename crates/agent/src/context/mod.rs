//! Context composition for one request.
//!
//! [`composer`] builds the message stack from the memory tiers; [`budget`]
//! keeps it under the character budget before every model call.

pub mod budget;
pub mod composer;

pub use budget::{PROTECTED_TAIL, trim_to_budget};
pub use composer::{ComposedContext, ContextComposer, LayerStats, PageContext, TurnInput};
