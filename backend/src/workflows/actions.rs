// Workflow Actions - Handler trait and the registry actions are dispatched through

use async_trait::async_trait;
use autoflow_shared::{ActionConfig, ActionResult};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

use super::handlers::{
    CopyFileHandler, ExtractContentHandler, GenerateEmbeddingHandler, SendNotificationHandler,
    WaitHandler,
};
use crate::integrations::Capabilities;

/// What a handler can see about the run it is part of
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub workflow_name: String,
    pub action_index: usize,
    pub trigger_payload: Value,
    /// Data returned by earlier successful actions, keyed by action index
    pub outputs: BTreeMap<usize, Value>,
}

impl ExecutionContext {
    pub fn new(execution_id: Uuid, workflow_id: Uuid, workflow_name: &str, trigger_payload: Value) -> Self {
        Self {
            execution_id,
            workflow_id,
            workflow_name: workflow_name.to_string(),
            action_index: 0,
            trigger_payload,
            outputs: BTreeMap::new(),
        }
    }

    pub fn at_action(mut self, index: usize) -> Self {
        self.action_index = index;
        self
    }
}

/// One implementation per action type.
///
/// Handlers report failure through `ActionResult::failure`; the dispatcher
/// owns retries, timeouts and attempt accounting.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Check type-specific configuration when a workflow is saved
    fn validate_config(&self, _config: &ActionConfig) -> Result<(), String> {
        Ok(())
    }

    async fn execute(&self, config: &ActionConfig, context: &ExecutionContext) -> ActionResult;
}

/// Maps action type tags to their handlers
#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in action type wired to the given capabilities
    pub fn with_builtin(capabilities: Capabilities) -> Self {
        let mut registry = Self::new();
        registry.register(
            action_types::COPY_FILE,
            Arc::new(CopyFileHandler::new(capabilities.file_store.clone())),
        );
        registry.register(
            action_types::SEND_NOTIFICATION,
            Arc::new(SendNotificationHandler::new(capabilities.notifier.clone())),
        );
        registry.register(
            action_types::EXTRACT_CONTENT,
            Arc::new(ExtractContentHandler::new(capabilities.extractor.clone())),
        );
        registry.register(
            action_types::GENERATE_EMBEDDING,
            Arc::new(GenerateEmbeddingHandler::new(capabilities.embeddings.clone())),
        );
        registry.register(action_types::WAIT, Arc::new(WaitHandler));
        registry
    }

    /// Register a handler, replacing any previous handler for the same type
    pub fn register(&mut self, action_type: &str, handler: Arc<dyn ActionHandler>) -> &mut Self {
        self.handlers.insert(action_type.to_string(), handler);
        self
    }

    pub fn get(&self, action_type: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(action_type).cloned()
    }

    pub fn contains(&self, action_type: &str) -> bool {
        self.handlers.contains_key(action_type)
    }

    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }
}

pub mod action_types {
    pub const COPY_FILE: &str = "copy_file";
    pub const SEND_NOTIFICATION: &str = "send_notification";
    pub const EXTRACT_CONTENT: &str = "extract_content";
    pub const GENERATE_EMBEDDING: &str = "generate_embedding";
    pub const WAIT: &str = "wait";
}

/// Lookups over an action's config map
pub(crate) mod config {
    use autoflow_shared::ActionConfig;

    pub fn string<'a>(config: &'a ActionConfig, key: &str) -> Option<&'a str> {
        config
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn require_string<'a>(config: &'a ActionConfig, key: &str) -> Result<&'a str, String> {
        string(config, key).ok_or_else(|| format!("'{}' is required", key))
    }

    pub fn flag(config: &ActionConfig, key: &str) -> bool {
        config.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
    }
}
