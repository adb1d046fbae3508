// External capabilities available to action handlers
//
// Handlers never reach out to the world directly; they go through these
// traits so the engine can be wired to real services or to local stand-ins.

pub mod local;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::CapabilityConfig;

pub use local::{HashingEmbeddingGenerator, LocalFileStore, PlainTextExtractor, TracingNotifier};

#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid path '{0}'")]
    InvalidPath(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

pub type CapabilityResult<T> = Result<T, CapabilityError>;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Copy `source` to `destination`, returning the path that was written.
    async fn copy(&self, source: &str, destination: &str) -> CapabilityResult<String>;

    async fn read(&self, path: &str) -> CapabilityResult<Vec<u8>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, channel: &str, message: &str) -> CapabilityResult<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract(&self, path: &str) -> CapabilityResult<String>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingGenerator: Send + Sync {
    async fn embed(&self, text: &str) -> CapabilityResult<Vec<f32>>;
}

/// The set of capabilities injected into the built-in handlers
#[derive(Clone)]
pub struct Capabilities {
    pub file_store: Arc<dyn FileStore>,
    pub notifier: Arc<dyn Notifier>,
    pub extractor: Arc<dyn ContentExtractor>,
    pub embeddings: Arc<dyn EmbeddingGenerator>,
}

impl Capabilities {
    /// Local implementations rooted at the configured directory
    pub fn local(config: &CapabilityConfig) -> Self {
        let file_store: Arc<dyn FileStore> = Arc::new(LocalFileStore::new(&config.file_root));

        Self {
            extractor: Arc::new(PlainTextExtractor::new(file_store.clone())),
            file_store,
            notifier: Arc::new(TracingNotifier),
            embeddings: Arc::new(HashingEmbeddingGenerator::new(config.embedding_dimensions)),
        }
    }
}
