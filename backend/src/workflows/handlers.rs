// Workflow Handlers - Built-in action types backed by the injected capabilities

use async_trait::async_trait;
use autoflow_shared::{ActionConfig, ActionResult};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::actions::{config, ActionHandler, ExecutionContext};
use super::conditions::resolve_field;
use crate::integrations::{ContentExtractor, EmbeddingGenerator, FileStore, Notifier};

const DEFAULT_EVENT_FIELD: &str = "path";
const DEFAULT_CHANNEL: &str = "default";

/// Either an explicit `source_path` or, with `from_event: true`, the payload
/// field named by `event_field`.
fn validate_source(config: &ActionConfig) -> Result<(), String> {
    if config::flag(config, "from_event") || config::string(config, "source_path").is_some() {
        Ok(())
    } else {
        Err("either 'source_path' or 'from_event: true' is required".to_string())
    }
}

fn resolve_source(config: &ActionConfig, context: &ExecutionContext) -> Result<String, String> {
    if config::flag(config, "from_event") {
        let field = config::string(config, "event_field").unwrap_or(DEFAULT_EVENT_FIELD);
        return resolve_field(&context.trigger_payload, field)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| format!("event has no string field '{}'", field));
    }

    config::require_string(config, "source_path").map(str::to_string)
}

pub struct CopyFileHandler {
    store: Arc<dyn FileStore>,
}

impl CopyFileHandler {
    pub fn new(store: Arc<dyn FileStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ActionHandler for CopyFileHandler {
    fn validate_config(&self, config: &ActionConfig) -> Result<(), String> {
        config::require_string(config, "destination")?;
        validate_source(config)
    }

    async fn execute(&self, config: &ActionConfig, context: &ExecutionContext) -> ActionResult {
        let source = match resolve_source(config, context) {
            Ok(source) => source,
            Err(e) => return ActionResult::failure(&e),
        };
        let destination = match config::require_string(config, "destination") {
            Ok(destination) => destination,
            Err(e) => return ActionResult::failure(&e),
        };

        match self.store.copy(&source, destination).await {
            Ok(written) => {
                info!(execution_id = %context.execution_id, %source, destination = %written, "file copied");
                ActionResult::success(Some(json!({
                    "source": source,
                    "destination": written
                })))
            }
            Err(e) => ActionResult::failure(&format!("copy failed: {}", e)),
        }
    }
}

pub struct SendNotificationHandler {
    notifier: Arc<dyn Notifier>,
}

impl SendNotificationHandler {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

#[async_trait]
impl ActionHandler for SendNotificationHandler {
    fn validate_config(&self, config: &ActionConfig) -> Result<(), String> {
        config::require_string(config, "message").map(|_| ())
    }

    async fn execute(&self, config: &ActionConfig, _context: &ExecutionContext) -> ActionResult {
        let message = match config::require_string(config, "message") {
            Ok(message) => message,
            Err(e) => return ActionResult::failure(&e),
        };
        let channel = config::string(config, "channel").unwrap_or(DEFAULT_CHANNEL);

        match self.notifier.notify(channel, message).await {
            Ok(()) => ActionResult::success(Some(json!({
                "channel": channel,
                "message": message
            }))),
            Err(e) => ActionResult::failure(&format!("notification failed: {}", e)),
        }
    }
}

pub struct ExtractContentHandler {
    extractor: Arc<dyn ContentExtractor>,
}

impl ExtractContentHandler {
    pub fn new(extractor: Arc<dyn ContentExtractor>) -> Self {
        Self { extractor }
    }
}

#[async_trait]
impl ActionHandler for ExtractContentHandler {
    fn validate_config(&self, config: &ActionConfig) -> Result<(), String> {
        validate_source(config)
    }

    async fn execute(&self, config: &ActionConfig, context: &ExecutionContext) -> ActionResult {
        let path = match resolve_source(config, context) {
            Ok(path) => path,
            Err(e) => return ActionResult::failure(&e),
        };

        match self.extractor.extract(&path).await {
            Ok(content) => ActionResult::success(Some(json!({
                "path": path,
                "length": content.chars().count(),
                "content": content
            }))),
            Err(e) => ActionResult::failure(&format!("extraction failed: {}", e)),
        }
    }
}

pub struct GenerateEmbeddingHandler {
    embeddings: Arc<dyn EmbeddingGenerator>,
}

impl GenerateEmbeddingHandler {
    pub fn new(embeddings: Arc<dyn EmbeddingGenerator>) -> Self {
        Self { embeddings }
    }
}

#[async_trait]
impl ActionHandler for GenerateEmbeddingHandler {
    fn validate_config(&self, config: &ActionConfig) -> Result<(), String> {
        config::require_string(config, "text").map(|_| ())
    }

    async fn execute(&self, config: &ActionConfig, _context: &ExecutionContext) -> ActionResult {
        let text = match config::require_string(config, "text") {
            Ok(text) => text,
            Err(e) => return ActionResult::failure(&e),
        };

        match self.embeddings.embed(text).await {
            Ok(vector) => ActionResult::success(Some(json!({
                "dimensions": vector.len(),
                "embedding": vector
            }))),
            Err(e) => ActionResult::failure(&format!("embedding failed: {}", e)),
        }
    }
}

/// Sleeps for `seconds`
pub struct WaitHandler;

fn wait_seconds(config: &ActionConfig) -> Result<(f64, Duration), String> {
    match config.get("seconds").and_then(|v| v.as_f64()) {
        Some(seconds) if seconds.is_finite() && seconds >= 0.0 => Duration::try_from_secs_f64(seconds)
            .map(|duration| (seconds, duration))
            .map_err(|_| format!("'seconds' is too large: {}", seconds)),
        Some(_) => Err("'seconds' must be a non-negative number".to_string()),
        None => Err("'seconds' is required".to_string()),
    }
}

#[async_trait]
impl ActionHandler for WaitHandler {
    fn validate_config(&self, config: &ActionConfig) -> Result<(), String> {
        wait_seconds(config).map(|_| ())
    }

    async fn execute(&self, config: &ActionConfig, _context: &ExecutionContext) -> ActionResult {
        let (seconds, duration) = match wait_seconds(config) {
            Ok(wait) => wait,
            Err(e) => return ActionResult::failure(&e),
        };

        tokio::time::sleep(duration).await;

        ActionResult::success(Some(json!({ "waited_seconds": seconds })))
    }
}
