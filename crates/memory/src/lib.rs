//! Memory system for mindloop.
//!
//! - [`similarity`]: cosine similarity over embedding vectors
//! - [`store`]: typed, cap-enforcing access to the persisted memory regions
//! - [`relevance`]: keyword and semantic ranking of memory entries
//! - [`in_memory`] / [`file_backend`]: key-value storage backends

pub mod file_backend;
pub mod in_memory;
pub mod relevance;
pub mod similarity;
pub mod store;

pub use file_backend::FileStore;
pub use in_memory::InMemoryStore;
pub use relevance::{RelevanceFilter, filter_by_keyword, filter_by_similarity};
pub use similarity::cosine_similarity;
pub use store::{EmbeddingCache, MemoryStore};
