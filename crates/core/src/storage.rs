//! Storage contract: opaque async key-value get/set.
//!
//! The host owns the store. The core only assumes atomic get/set per key and
//! read-your-writes consistency for a single caller; it does no locking of
//! its own.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::StorageError;

/// The core storage trait.
///
/// Implementations: in-memory (tests, ephemeral sessions), JSON file.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// The backend name (e.g., "memory", "file").
    fn name(&self) -> &str;

    /// Read several keys at once. Absent keys are simply missing from the map.
    async fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, StorageError>;

    /// Write every entry of `entries`, replacing existing values.
    async fn set(&self, entries: Map<String, Value>) -> Result<(), StorageError>;
}
