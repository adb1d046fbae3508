// Local stand-ins for the external capabilities

use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::info;

use super::{
    CapabilityError, CapabilityResult, ContentExtractor, EmbeddingGenerator, FileStore, Notifier,
};

/// File store confined to a root directory
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Resolve a relative path under the root, refusing anything that escapes it.
    fn resolve(&self, path: &str) -> CapabilityResult<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if path.trim().is_empty()
            || relative
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(CapabilityError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn copy(&self, source: &str, destination: &str) -> CapabilityResult<String> {
        let from = self.resolve(source)?;
        let mut to = self.resolve(destination)?;

        let is_dir = destination.ends_with('/')
            || fs::metadata(&to).await.map(|m| m.is_dir()).unwrap_or(false);
        if is_dir {
            let file_name = from
                .file_name()
                .ok_or_else(|| CapabilityError::InvalidPath(source.to_string()))?;
            to = to.join(file_name);
        }

        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(&from, &to).await?;

        let written = to
            .strip_prefix(&self.root)
            .unwrap_or(&to)
            .to_string_lossy()
            .into_owned();
        Ok(written)
    }

    async fn read(&self, path: &str) -> CapabilityResult<Vec<u8>> {
        Ok(fs::read(self.resolve(path)?).await?)
    }
}

/// Notifier that only emits a log line
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, channel: &str, message: &str) -> CapabilityResult<()> {
        info!(channel, message, "notification sent");
        Ok(())
    }
}

/// Extracts text by decoding file contents as UTF-8
pub struct PlainTextExtractor {
    store: Arc<dyn FileStore>,
}

impl PlainTextExtractor {
    pub fn new(store: Arc<dyn FileStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ContentExtractor for PlainTextExtractor {
    async fn extract(&self, path: &str) -> CapabilityResult<String> {
        let bytes = self.store.read(path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Feature-hashing embedder: deterministic, dependency free, good enough for
/// similarity between short texts when no model service is wired in.
pub struct HashingEmbeddingGenerator {
    dimensions: usize,
}

impl HashingEmbeddingGenerator {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }
}

#[async_trait]
impl EmbeddingGenerator for HashingEmbeddingGenerator {
    async fn embed(&self, text: &str) -> CapabilityResult<Vec<f32>> {
        let mut vector = vec![0f32; self.dimensions];
        let mut tokens = 0usize;

        for token in text.split_whitespace() {
            let token = token
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if token.is_empty() {
                continue;
            }
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let hash = hasher.finish();
            let sign = if hash & 1 == 0 { 1.0 } else { -1.0 };
            vector[(hash >> 1) as usize % self.dimensions] += sign;
            tokens += 1;
        }

        if tokens == 0 {
            return Err(CapabilityError::InvalidInput("cannot embed empty text".into()));
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        Ok(vector)
    }
}
