//! Tool trait: the abstraction over agent capabilities.
//!
//! The model requests a tool by emitting a `<<TOOL:NAME:parameter>>` tag.
//! Each request becomes a [`ToolJob`]; the registry resolves the name and the
//! tool turns the raw parameter text into a structured JSON result.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ToolError;
use crate::provider::Embedder;
use crate::storage::KeyValueStore;

/// A request to execute a tool, as parsed from a tool tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolJob {
    /// Name of the tool to execute
    pub name: String,

    /// Raw parameter text (may be empty, may span lines)
    #[serde(default)]
    pub parameter: String,
}

impl ToolJob {
    pub fn new(name: impl Into<String>, parameter: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameter: parameter.into(),
        }
    }
}

/// The outcome of one tool job. Ephemeral: rendered into the stack, then dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    /// Arbitrary structured payload
    Success(Value),
    /// Failure message, rendered as `{"error": ...}`
    Error(String),
}

impl ToolOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// The JSON form placed into the conversation.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Success(value) => value.clone(),
            Self::Error(message) => serde_json::json!({ "error": message }),
        }
    }
}

impl From<Result<Value, ToolError>> for ToolOutcome {
    fn from(result: Result<Value, ToolError>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(e) => Self::Error(e.to_string()),
        }
    }
}

/// What a tool may touch while it runs.
#[derive(Clone)]
pub struct ToolContext {
    /// The request this job belongs to
    pub request_id: String,

    /// The shared memory store
    pub storage: Arc<dyn KeyValueStore>,

    /// Embedding client, if configured
    pub embedder: Option<Arc<dyn Embedder>>,
}

/// A tool description rendered into the system directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
}

/// The core Tool trait.
///
/// Built-in memory tools live in `mindloop-tools`; hosts register their own
/// (web search, URL fetch) the same way.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique tag name of this tool (e.g., "RECALL").
    fn name(&self) -> &str;

    /// What this tool does and what its parameter means (sent to the model).
    fn description(&self) -> &str;

    /// Execute the tool with the raw parameter text.
    async fn execute(&self, parameter: &str, ctx: &ToolContext) -> Result<Value, ToolError>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
        }
    }
}

/// A registry of available tools, keyed by tag name.
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        self.tools.insert(name, tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// All tool definitions, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute one job.
    pub async fn execute(&self, job: &ToolJob, ctx: &ToolContext) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .get(&job.name)
            .ok_or_else(|| ToolError::NotFound(job.name.clone()))?;
        tool.execute(&job.parameter, ctx).await
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use serde_json::Map;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "ECHO"
        }
        fn description(&self) -> &str {
            "Echoes back the parameter"
        }
        async fn execute(&self, parameter: &str, _ctx: &ToolContext) -> Result<Value, ToolError> {
            Ok(serde_json::json!({ "echo": parameter }))
        }
    }

    struct NullStore;

    #[async_trait]
    impl KeyValueStore for NullStore {
        fn name(&self) -> &str {
            "null"
        }
        async fn get(&self, _keys: &[&str]) -> Result<Map<String, Value>, StorageError> {
            Ok(Map::new())
        }
        async fn set(&self, _entries: Map<String, Value>) -> Result<(), StorageError> {
            Ok(())
        }
    }

    fn ctx() -> ToolContext {
        ToolContext {
            request_id: "req".into(),
            storage: Arc::new(NullStore),
            embedder: None,
        }
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        assert!(registry.get("ECHO").is_some());
        assert!(registry.get("nonexistent").is_none());
        assert_eq!(registry.definitions()[0].name, "ECHO");
    }

    #[tokio::test]
    async fn registry_execute_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        let value = registry
            .execute(&ToolJob::new("ECHO", "hello world"), &ctx())
            .await
            .unwrap();
        assert_eq!(value["echo"], "hello world");
    }

    #[tokio::test]
    async fn registry_execute_missing_tool() {
        let registry = ToolRegistry::new();
        let err = registry
            .execute(&ToolJob::new("nonexistent", ""), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[test]
    fn error_outcome_renders_error_object() {
        let outcome: ToolOutcome = Err(ToolError::NotFound("X".into())).into();
        assert!(outcome.is_error());
        assert_eq!(outcome.to_value(), serde_json::json!({"error": "Unknown tool: X"}));
    }
}
