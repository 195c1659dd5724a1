//! Command implementations and the wiring they share.

pub mod ask;
pub mod config_cmd;
pub mod memory;

use std::sync::Arc;

use mindloop_config::AppConfig;
use mindloop_memory::{FileStore, InMemoryStore, MemoryStore};
use tracing::debug;

/// Load the config or explain why it could not be loaded.
pub fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    AppConfig::load().map_err(|e| format!("Failed to load config: {e}").into())
}

/// Open the memory store the config selects.
pub fn open_store(config: &AppConfig) -> MemoryStore {
    match config.memory.backend.as_str() {
        "memory" => {
            debug!("Using in-memory store");
            MemoryStore::new(Arc::new(InMemoryStore::new()))
        }
        _ => {
            let path = config.memory.store_path();
            debug!(path = %path.display(), "Using file store");
            MemoryStore::new(Arc::new(FileStore::new(path)))
        }
    }
}
