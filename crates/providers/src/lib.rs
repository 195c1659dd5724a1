//! Model providers for mindloop.
//!
//! The agent core only sees the `ModelClient` and `Embedder` traits from
//! `mindloop-core`; this crate supplies the HTTP implementation used by the
//! CLI harness.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;
